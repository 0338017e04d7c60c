#![forbid(unsafe_code)]

//! Command line front end: sign XML templates and verify signed documents.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use xmldsig::keys::loader;
use xmldsig::{DsigContext, Error, Schema, SignedDocument, SigningKeySource, VerificationSource};

#[derive(Parser)]
#[command(name = "xmldsig", about = "Sign and verify XML digital signatures", version)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign every unsigned signature in an XML template
    Sign {
        /// Template XML file (with empty DigestValue/SignatureValue)
        template: PathBuf,

        /// Private key (PEM or DER, auto-detected)
        #[arg(short = 'k', long)]
        key: PathBuf,

        /// Certificate to embed in X509Certificate (PEM or DER)
        #[arg(long)]
        cert: Option<PathBuf>,

        /// Attribute name used to resolve `#id` references
        #[arg(long = "id-attr")]
        id_attr: Option<String>,

        /// Re-sign signatures that already carry a value
        #[arg(long)]
        force: bool,

        /// External content for a reference URI (URI=FILE)
        #[arg(long = "referenced-document", value_name = "URI=FILE")]
        referenced_documents: Vec<String>,

        /// Omit the XML declaration from the output
        #[arg(long = "no-declaration")]
        no_declaration: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify every signature in a signed XML document
    Verify {
        /// Input XML file
        file: PathBuf,

        /// Certificate or public key (PEM or DER, auto-detected)
        #[arg(long)]
        cert: PathBuf,

        /// Attribute name used to resolve `#id` references
        #[arg(long = "id-attr")]
        id_attr: Option<String>,

        /// Check signatures against a schema profile first
        #[arg(long, value_enum)]
        schema: Option<SchemaArg>,

        /// External content for a reference URI (URI=FILE)
        #[arg(long = "referenced-document", value_name = "URI=FILE")]
        referenced_documents: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaArg {
    Strict,
    Relaxed,
}

impl From<SchemaArg> for Schema {
    fn from(arg: SchemaArg) -> Self {
        match arg {
            SchemaArg::Strict => Schema::Strict,
            SchemaArg::Relaxed => Schema::Relaxed,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Sign {
            template,
            key,
            cert,
            id_attr,
            force,
            referenced_documents,
            no_declaration,
            output,
        } => build_context(id_attr, referenced_documents).and_then(|ctx| {
            cmd_sign(
                &template,
                &key,
                cert.as_deref(),
                ctx.with_force(force),
                !no_declaration,
                output,
            )
        }),

        Commands::Verify {
            file,
            cert,
            id_attr,
            schema,
            referenced_documents,
        } => build_context(id_attr, referenced_documents)
            .and_then(|ctx| cmd_verify(&file, &cert, schema.map(Schema::from), ctx)),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_sign(
    template: &Path,
    key: &Path,
    cert: Option<&Path>,
    ctx: DsigContext,
    emit_declaration: bool,
    output: Option<PathBuf>,
) -> Result<bool, Error> {
    let xml = read_file(template)?;
    let key = loader::load_signing_key(key, cert)?;
    tracing::info!(template = %template.display(), "signing");

    let signed = SignedDocument::with_context(xml, ctx)?
        .sign(SigningKeySource::Key(&key), emit_declaration)?;
    write_output(output, signed.as_bytes())?;
    Ok(true)
}

fn cmd_verify(
    file: &Path,
    cert: &Path,
    schema: Option<Schema>,
    ctx: DsigContext,
) -> Result<bool, Error> {
    let xml = read_file(file)?;
    let key = loader::load_key_file(cert)?;
    tracing::info!(file = %file.display(), "verifying");

    let document = SignedDocument::with_context(xml, ctx)?;
    let signatures = document.validate_signatures(VerificationSource::Key(&key), schema.as_ref())?;
    if signatures.is_empty() {
        eprintln!("INVALID: no signatures found");
        return Ok(false);
    }

    let mut valid = true;
    for signature in &signatures {
        let errors = signature.errors();
        if !errors.is_empty() {
            valid = false;
            let tags: Vec<&str> = errors.iter().map(|e| e.tag()).collect();
            eprintln!("INVALID: signature #{}: {}", signature.index(), tags.join(", "));
        }
    }
    if valid {
        println!("OK");
    }
    Ok(valid)
}

fn build_context(id_attr: Option<String>, documents: Vec<String>) -> Result<DsigContext, Error> {
    let mut ctx = DsigContext::new();
    if let Some(name) = id_attr {
        ctx = ctx.with_id_attr(name);
    }
    for spec in documents {
        let (uri, path) = spec
            .split_once('=')
            .ok_or_else(|| Error::Other(format!("expected URI=FILE, got '{spec}'")))?;
        let data = std::fs::read(path).map_err(|e| Error::Other(format!("{path}: {e}")))?;
        ctx.add_referenced_document(uri, data);
    }
    Ok(ctx)
}

// ── Utility functions ────────────────────────────────────────────────

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Other(format!("{}: {e}", path.display())))
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data).map_err(|e| Error::Other(format!("{}: {e}", p.display()))),
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(data)
                .map_err(|e| Error::Other(format!("stdout: {e}")))
        }
    }
}
