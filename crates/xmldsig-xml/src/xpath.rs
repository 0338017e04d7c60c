#![forbid(unsafe_code)]

//! XPath 1.0 subset for XML-DSig processing.
//!
//! Covers what signature processing needs: the XPath filter transform
//! (`not(ancestor-or-self::ds:Signature)` and friends) and absolute
//! location paths used as `Reference` URIs.  Supported:
//!
//! - location paths with `/`, `//`, `.`, `..`, `@` and predicates
//! - the axes `self`, `child`, `parent`, `ancestor`, `ancestor-or-self`,
//!   `descendant`, `descendant-or-self`, `attribute`, `namespace`,
//!   `following-sibling` and `preceding-sibling`
//! - `or`, `and`, comparisons, arithmetic, union
//! - the core functions needed for filtering (see [`FUNCTIONS`])
//!
//! Variables, the `following` and `preceding` axes, the string functions
//! beyond those listed (`substring*`, `translate`), the number functions
//! (`sum`, `floor`, `ceiling`, `round`) and the extension functions of the
//! XPath filter spec are not supported; expressions using them fail to
//! parse.  Expressions are parsed once; prefixes are resolved at parse
//! time against the supplied namespace bindings.  Expression trees deeper
//! than [`MAX_DEPTH`] are rejected while parsing, which also bounds the
//! recursion of evaluation.

use roxmltree::{Node, NodeType};
use std::cmp::Ordering;
use std::collections::HashMap;
use xmldsig_core::{ns, Error};

use crate::document::QualifiedNames;

/// Deepest expression tree accepted by [`XPath::parse`].
pub const MAX_DEPTH: usize = 128;

/// Function names accepted by the parser.
pub const FUNCTIONS: &[&str] = &[
    "not",
    "true",
    "false",
    "boolean",
    "number",
    "string",
    "concat",
    "contains",
    "starts-with",
    "string-length",
    "normalize-space",
    "count",
    "local-name",
    "namespace-uri",
    "name",
    "position",
    "last",
];

/// A node in the XPath data model.
#[derive(Debug, Clone, Copy)]
pub enum XNode<'a, 'input> {
    /// Root, element, text, comment or processing instruction.
    Node(Node<'a, 'input>),
    /// The `index`-th attribute of an element.
    Attribute(Node<'a, 'input>, usize),
    /// The `index`-th in-scope namespace of an element.
    Namespace(Node<'a, 'input>, usize),
}

impl<'a, 'input> XNode<'a, 'input> {
    fn owner(&self) -> Node<'a, 'input> {
        match *self {
            XNode::Node(n) | XNode::Attribute(n, _) | XNode::Namespace(n, _) => n,
        }
    }

    fn order_key(&self) -> (usize, u8, usize) {
        match *self {
            XNode::Node(n) => (n.id().get_usize(), 0, 0),
            XNode::Namespace(n, i) => (n.id().get_usize(), 1, i),
            XNode::Attribute(n, i) => (n.id().get_usize(), 2, i),
        }
    }

    /// The string-value of this node.
    pub fn string_value(&self) -> String {
        match *self {
            XNode::Node(n) => match n.node_type() {
                NodeType::Root | NodeType::Element => n
                    .descendants()
                    .filter(|d| d.is_text())
                    .filter_map(|d| d.text())
                    .collect(),
                NodeType::Text | NodeType::Comment => n.text().unwrap_or("").to_owned(),
                NodeType::PI => n.pi().and_then(|pi| pi.value).unwrap_or("").to_owned(),
            },
            XNode::Attribute(n, i) => n
                .attributes()
                .nth(i)
                .map(|a| a.value().to_owned())
                .unwrap_or_default(),
            XNode::Namespace(n, i) => n
                .namespaces()
                .nth(i)
                .map(|ns| ns.uri().to_owned())
                .unwrap_or_default(),
        }
    }

    fn local_name(&self) -> String {
        match *self {
            XNode::Node(n) => match n.node_type() {
                NodeType::Element => n.tag_name().name().to_owned(),
                NodeType::PI => n.pi().map(|pi| pi.target.to_owned()).unwrap_or_default(),
                _ => String::new(),
            },
            XNode::Attribute(n, i) => n
                .attributes()
                .nth(i)
                .map(|a| a.name().to_owned())
                .unwrap_or_default(),
            XNode::Namespace(n, i) => n
                .namespaces()
                .nth(i)
                .and_then(|ns| ns.name())
                .unwrap_or("")
                .to_owned(),
        }
    }

    fn namespace_uri(&self) -> Option<&'a str> {
        match *self {
            XNode::Node(n) if n.is_element() => n.tag_name().namespace(),
            XNode::Attribute(n, i) => n.attributes().nth(i).and_then(|a| a.namespace()),
            _ => None,
        }
    }

    fn qualified_name(&self) -> String {
        match *self {
            XNode::Node(n) if n.is_element() => QualifiedNames::of(n).element,
            XNode::Attribute(n, i) => QualifiedNames::of(n)
                .attributes
                .get(i)
                .cloned()
                .unwrap_or_else(|| self.local_name()),
            _ => self.local_name(),
        }
    }
}

impl PartialEq for XNode<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

/// A compiled XPath expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    /// Parse `expr`, resolving prefixes through `namespaces` and then the
    /// well-known XML-DSig prefixes.
    pub fn parse(expr: &str, namespaces: &HashMap<String, String>) -> Result<Self, Error> {
        let tokens = lex(expr)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            namespaces,
        };
        let parsed = parser.parse_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::Transform(format!(
                "unexpected token {tok:?} in XPath '{expr}'"
            )));
        }
        Ok(Self {
            source: expr.to_owned(),
            expr: parsed,
        })
    }

    /// The expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate as a node-set with `context` as the context node.
    pub fn select<'a, 'input>(
        &self,
        context: XNode<'a, 'input>,
    ) -> Result<Vec<XNode<'a, 'input>>, Error> {
        match eval(&self.expr, &Ctx::single(context))? {
            Value::Nodes(nodes) => Ok(nodes),
            _ => Err(Error::Transform(format!(
                "XPath '{}' does not select nodes",
                self.source
            ))),
        }
    }

    /// Evaluate and convert the result to a boolean.
    pub fn matches(&self, context: XNode<'_, '_>) -> Result<bool, Error> {
        Ok(eval(&self.expr, &Ctx::single(context))?.to_bool())
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    ColonColon,
    Star,
    Plus,
    Minus,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Literal(String),
    Number(f64),
    Name(String),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn lex(input: &str) -> Result<Vec<Token>, Error> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            ':' if next == Some(':') => {
                tokens.push(Token::ColonColon);
                i += 2;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| Error::Transform(format!("unterminated literal in XPath '{input}'")))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| Error::Transform(format!("bad number '{text}' in XPath")))?;
                tokens.push(Token::Number(value));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                // QName or prefix:* but not an axis separator.
                if chars.get(i) == Some(&':') && chars.get(i + 1) != Some(&':') {
                    match chars.get(i + 1) {
                        Some('*') => i += 2,
                        Some(&ch) if is_name_start(ch) => {
                            i += 1;
                            while i < chars.len() && is_name_char(chars[i]) {
                                i += 1;
                            }
                        }
                        _ => {}
                    }
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::Transform(format!(
                    "unexpected character '{other}' in XPath '{input}'"
                )))
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST and parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    SelfAxis,
    Child,
    Parent,
    Ancestor,
    AncestorOrSelf,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Namespace,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "self" => Axis::SelfAxis,
            "child" => Axis::Child,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "attribute" => Axis::Attribute,
            "namespace" => Axis::Namespace,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    /// `*`
    Any,
    /// `prefix:*`, holding the resolved namespace.
    AnyIn(String),
    /// A (possibly prefixed) name.  Unprefixed names are in no namespace.
    Name { ns: Option<String>, local: String },
    Node,
    Text,
    Comment,
    Pi(Option<String>),
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone)]
enum Start {
    Root,
    Context,
    Filter(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone)]
enum Expr {
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Path(Start, Vec<Step>),
    Literal(String),
    Number(f64),
    Function(String, Vec<Expr>),
}

impl Expr {
    /// Height of the expression tree; leaves count as one.
    fn height(&self) -> usize {
        1 + match self {
            Expr::Literal(_) | Expr::Number(_) => 0,
            Expr::Negate(inner) => inner.height(),
            Expr::Binary(_, l, r) | Expr::Union(l, r) => l.height().max(r.height()),
            Expr::Path(start, steps) => {
                let start = match start {
                    Start::Filter(primary, predicates) => predicates
                        .iter()
                        .map(Expr::height)
                        .fold(primary.height(), usize::max),
                    Start::Root | Start::Context => 0,
                };
                steps
                    .iter()
                    .flat_map(|step| &step.predicates)
                    .map(Expr::height)
                    .fold(start, usize::max)
            }
            Expr::Function(_, args) => args.iter().map(Expr::height).max().unwrap_or(0),
        }
    }
}

fn too_deep() -> Error {
    Error::Transform("XPath expression nested too deeply".into())
}

struct Parser<'n> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    namespaces: &'n HashMap<String, String>,
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "node" | "text" | "comment" | "processing-instruction")
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), Error> {
        match self.advance() {
            Some(tok) if tok == want => Ok(()),
            other => Err(Error::Transform(format!(
                "expected {want:?} in XPath, found {other:?}"
            ))),
        }
    }

    fn peek_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == name)
    }

    /// Children are bounded already, so the height walk stays shallow.
    fn bounded(&self, expr: Expr) -> Result<Expr, Error> {
        if expr.height() > MAX_DEPTH {
            return Err(too_deep());
        }
        Ok(expr)
    }

    fn binary(&self, op: BinOp, left: Expr, right: Expr) -> Result<Expr, Error> {
        self.bounded(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_expr(&mut self) -> Result<Expr, Error> {
        if self.depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.depth += 1;
        let expr = self.parse_or();
        self.depth -= 1;
        expr
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_and()?;
        while self.peek_name("or") {
            self.advance();
            let right = self.parse_and()?;
            left = self.binary(BinOp::Or, left, right)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_equality()?;
        while self.peek_name("and") {
            self.advance();
            let right = self.parse_equality()?;
            left = self.binary(BinOp::And, left, right)?;
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_relational()?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_unary()?;
        loop {
            // After a complete operand `*` and these names can only be operators.
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Name(n)) if n == "div" => BinOp::Div,
                Some(Token::Name(n)) if n == "mod" => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        let mut negations = 0;
        while self.peek() == Some(&Token::Minus) {
            self.advance();
            negations += 1;
        }
        let mut expr = self.parse_union()?;
        for _ in 0..negations {
            expr = self.bounded(Expr::Negate(Box::new(expr)))?;
        }
        Ok(expr)
    }

    fn parse_union(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_path()?;
        while self.peek() == Some(&Token::Pipe) {
            self.advance();
            let right = self.parse_path()?;
            left = self.bounded(Expr::Union(Box::new(left), Box::new(right)))?;
        }
        Ok(left)
    }

    fn is_step_start(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star | Token::Name(_))
        )
    }

    fn parse_path(&mut self) -> Result<Expr, Error> {
        match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                let steps = if self.is_step_start() {
                    self.parse_relative_path()?
                } else {
                    Vec::new()
                };
                self.bounded(Expr::Path(Start::Root, steps))
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                let mut steps = vec![descendant_or_self()];
                steps.extend(self.parse_relative_path()?);
                self.bounded(Expr::Path(Start::Root, steps))
            }
            Some(Token::Name(name))
                if self.peek_at(1) == Some(&Token::LParen) && !is_node_type(name) =>
            {
                self.parse_filter_path()
            }
            Some(Token::LParen | Token::Literal(_) | Token::Number(_)) => self.parse_filter_path(),
            _ if self.is_step_start() => {
                let steps = self.parse_relative_path()?;
                self.bounded(Expr::Path(Start::Context, steps))
            }
            other => Err(Error::Transform(format!(
                "unexpected token {other:?} in XPath"
            ))),
        }
    }

    fn parse_filter_path(&mut self) -> Result<Expr, Error> {
        let primary = self.parse_primary()?;
        let predicates = self.parse_predicates()?;
        let mut steps = Vec::new();
        match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                steps = self.parse_relative_path()?;
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                steps.push(descendant_or_self());
                steps.extend(self.parse_relative_path()?);
            }
            _ => {}
        }
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        self.bounded(Expr::Path(Start::Filter(Box::new(primary), predicates), steps))
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Name(name)) => {
                if !FUNCTIONS.contains(&name.as_str()) {
                    return Err(Error::Transform(format!(
                        "unsupported XPath function '{name}'"
                    )));
                }
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.parse_expr()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.advance();
                        args.push(self.parse_expr()?);
                    }
                }
                self.expect(Token::RParen)?;
                self.bounded(Expr::Function(name, args))
            }
            other => Err(Error::Transform(format!(
                "unexpected token {other:?} in XPath"
            ))),
        }
    }

    fn parse_relative_path(&mut self) -> Result<Vec<Step>, Error> {
        let mut steps = vec![self.parse_step()?];
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    steps.push(descendant_or_self());
                }
                _ => return Ok(steps),
            }
            steps.push(self.parse_step()?);
        }
    }

    fn parse_step(&mut self) -> Result<Step, Error> {
        match self.peek() {
            Some(Token::Dot) => {
                self.advance();
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Token::DotDot) => {
                self.advance();
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }

        let axis = match (self.peek(), self.peek_at(1)) {
            (Some(Token::At), _) => {
                self.advance();
                Axis::Attribute
            }
            (Some(Token::Name(name)), Some(Token::ColonColon)) => {
                let axis = Axis::from_name(name)
                    .ok_or_else(|| Error::Transform(format!("unsupported XPath axis '{name}'")))?;
                self.advance();
                self.advance();
                axis
            }
            _ => Axis::Child,
        };

        let test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, Error> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::Name(name)) => {
                if is_node_type(&name) && self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let target = match self.peek() {
                        Some(Token::Literal(t)) if name == "processing-instruction" => {
                            let t = t.clone();
                            self.advance();
                            Some(t)
                        }
                        _ => None,
                    };
                    self.expect(Token::RParen)?;
                    return Ok(match name.as_str() {
                        "node" => NodeTest::Node,
                        "text" => NodeTest::Text,
                        "comment" => NodeTest::Comment,
                        _ => NodeTest::Pi(target),
                    });
                }
                match name.split_once(':') {
                    Some((prefix, "*")) => Ok(NodeTest::AnyIn(self.resolve(prefix)?)),
                    Some((prefix, local)) => Ok(NodeTest::Name {
                        ns: Some(self.resolve(prefix)?),
                        local: local.to_owned(),
                    }),
                    None => Ok(NodeTest::Name {
                        ns: None,
                        local: name,
                    }),
                }
            }
            other => Err(Error::Transform(format!(
                "expected node test in XPath, found {other:?}"
            ))),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, Error> {
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.advance();
            predicates.push(self.parse_expr()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }

    fn resolve(&self, prefix: &str) -> Result<String, Error> {
        if prefix == "xml" {
            return Ok(ns::XML.to_owned());
        }
        self.namespaces
            .get(prefix)
            .map(String::as_str)
            .or_else(|| ns::lookup_prefix(prefix))
            .map(str::to_owned)
            .ok_or_else(|| Error::Transform(format!("undeclared XPath prefix '{prefix}'")))
    }
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Value<'a, 'input> {
    Nodes(Vec<XNode<'a, 'input>>),
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Value<'_, '_> {
    fn to_bool(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => str_to_number(s),
            Value::Nodes(_) => str_to_number(&self.to_str()),
        }
    }

    fn to_str(&self) -> String {
        match self {
            Value::Nodes(nodes) => nodes.first().map(XNode::string_value).unwrap_or_default(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.clone(),
        }
    }
}

fn str_to_number(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

struct Ctx<'a, 'input> {
    node: XNode<'a, 'input>,
    position: usize,
    size: usize,
}

impl<'a, 'input> Ctx<'a, 'input> {
    fn single(node: XNode<'a, 'input>) -> Self {
        Self {
            node,
            position: 1,
            size: 1,
        }
    }
}

fn eval<'a, 'input>(expr: &Expr, ctx: &Ctx<'a, 'input>) -> Result<Value<'a, 'input>, Error> {
    match expr {
        Expr::Literal(s) => Ok(Value::Str(s.clone())),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Negate(inner) => Ok(Value::Number(-eval(inner, ctx)?.to_number())),
        Expr::Binary(BinOp::Or, l, r) => {
            Ok(Value::Bool(eval(l, ctx)?.to_bool() || eval(r, ctx)?.to_bool()))
        }
        Expr::Binary(BinOp::And, l, r) => {
            Ok(Value::Bool(eval(l, ctx)?.to_bool() && eval(r, ctx)?.to_bool()))
        }
        Expr::Binary(op @ (BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod), l, r) => {
            let a = eval(l, ctx)?.to_number();
            let b = eval(r, ctx)?.to_number();
            Ok(Value::Number(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                _ => a % b,
            }))
        }
        Expr::Binary(op, l, r) => {
            let a = eval(l, ctx)?;
            let b = eval(r, ctx)?;
            Ok(Value::Bool(compare(*op, &a, &b)))
        }
        Expr::Union(l, r) => match (eval(l, ctx)?, eval(r, ctx)?) {
            (Value::Nodes(mut a), Value::Nodes(b)) => {
                a.extend(b);
                Ok(Value::Nodes(sort_unique(a)))
            }
            _ => Err(Error::Transform("union of non node-sets".into())),
        },
        Expr::Path(start, steps) => {
            let mut current = match start {
                Start::Root => vec![XNode::Node(ctx.node.owner().document().root())],
                Start::Context => vec![ctx.node],
                Start::Filter(primary, predicates) => match eval(primary, ctx)? {
                    Value::Nodes(nodes) => apply_predicates(nodes, predicates)?,
                    _ => return Err(Error::Transform("path step on a non node-set".into())),
                },
            };
            for step in steps {
                current = eval_step(step, &current)?;
            }
            Ok(Value::Nodes(current))
        }
        Expr::Function(name, args) => call(name, args, ctx),
    }
}

fn eval_step<'a, 'input>(
    step: &Step,
    input: &[XNode<'a, 'input>],
) -> Result<Vec<XNode<'a, 'input>>, Error> {
    let mut out = Vec::new();
    for node in input {
        let candidates: Vec<XNode<'a, 'input>> = axis_nodes(step.axis, *node)
            .into_iter()
            .filter(|n| node_test(&step.test, step.axis, n))
            .collect();
        out.extend(apply_predicates(candidates, &step.predicates)?);
    }
    Ok(sort_unique(out))
}

fn apply_predicates<'a, 'input>(
    mut nodes: Vec<XNode<'a, 'input>>,
    predicates: &[Expr],
) -> Result<Vec<XNode<'a, 'input>>, Error> {
    for predicate in predicates {
        let size = nodes.len();
        let mut kept = Vec::with_capacity(size);
        for (i, node) in nodes.into_iter().enumerate() {
            let ctx = Ctx {
                node,
                position: i + 1,
                size,
            };
            let keep = match eval(predicate, &ctx)? {
                Value::Number(n) => n == (i + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                kept.push(node);
            }
        }
        nodes = kept;
    }
    Ok(nodes)
}

fn sort_unique<'a, 'input>(mut nodes: Vec<XNode<'a, 'input>>) -> Vec<XNode<'a, 'input>> {
    nodes.sort_by_key(XNode::order_key);
    nodes.dedup_by(|a, b| a.order_key() == b.order_key());
    nodes
}

/// Nodes on `axis` from `node`, in axis order (reverse axes nearest first).
fn axis_nodes<'a, 'input>(axis: Axis, node: XNode<'a, 'input>) -> Vec<XNode<'a, 'input>> {
    let element_children = |n: Node<'a, 'input>| n.children().map(XNode::Node).collect::<Vec<_>>();
    match (axis, node) {
        (Axis::SelfAxis, _) => vec![node],
        (Axis::Child, XNode::Node(n)) => element_children(n),
        (Axis::Descendant, XNode::Node(n)) => n.descendants().skip(1).map(XNode::Node).collect(),
        (Axis::DescendantOrSelf, XNode::Node(n)) => n.descendants().map(XNode::Node).collect(),
        (Axis::DescendantOrSelf, _) => vec![node],
        (Axis::Parent, XNode::Node(n)) => n.parent().map(XNode::Node).into_iter().collect(),
        (Axis::Parent, XNode::Attribute(o, _) | XNode::Namespace(o, _)) => vec![XNode::Node(o)],
        (Axis::Ancestor, XNode::Node(n)) => n.ancestors().skip(1).map(XNode::Node).collect(),
        (Axis::Ancestor, XNode::Attribute(o, _) | XNode::Namespace(o, _)) => {
            o.ancestors().map(XNode::Node).collect()
        }
        (Axis::AncestorOrSelf, _) => {
            let mut nodes = vec![node];
            nodes.extend(axis_nodes(Axis::Ancestor, node));
            nodes
        }
        (Axis::Attribute, XNode::Node(n)) if n.is_element() => (0..n.attributes().count())
            .map(|i| XNode::Attribute(n, i))
            .collect(),
        (Axis::Namespace, XNode::Node(n)) if n.is_element() => (0..n.namespaces().count())
            .map(|i| XNode::Namespace(n, i))
            .collect(),
        (Axis::FollowingSibling, XNode::Node(n)) => {
            std::iter::successors(n.next_sibling(), |s| s.next_sibling())
                .map(XNode::Node)
                .collect()
        }
        (Axis::PrecedingSibling, XNode::Node(n)) => {
            std::iter::successors(n.prev_sibling(), |s| s.prev_sibling())
                .map(XNode::Node)
                .collect()
        }
        _ => Vec::new(),
    }
}

fn node_test(test: &NodeTest, axis: Axis, node: &XNode<'_, '_>) -> bool {
    let principal = match (axis, node) {
        (Axis::Attribute, XNode::Attribute(..)) => true,
        (Axis::Namespace, XNode::Namespace(..)) => true,
        (Axis::Attribute | Axis::Namespace, _) => false,
        (_, XNode::Node(n)) => n.is_element(),
        _ => false,
    };
    match test {
        NodeTest::Node => true,
        NodeTest::Text => matches!(node, XNode::Node(n) if n.is_text()),
        NodeTest::Comment => matches!(node, XNode::Node(n) if n.is_comment()),
        NodeTest::Pi(target) => match node {
            XNode::Node(n) => n
                .pi()
                .is_some_and(|pi| target.as_deref().map_or(true, |t| t == pi.target)),
            _ => false,
        },
        NodeTest::Any => principal,
        NodeTest::AnyIn(uri) => principal && node.namespace_uri() == Some(uri.as_str()),
        NodeTest::Name { ns, local } => {
            if !principal || node.local_name() != *local {
                return false;
            }
            match node {
                XNode::Namespace(..) => ns.is_none(),
                _ => node.namespace_uri() == ns.as_deref(),
            }
        }
    }
}

fn compare(op: BinOp, a: &Value<'_, '_>, b: &Value<'_, '_>) -> bool {
    match (a, b) {
        (Value::Nodes(xs), Value::Nodes(ys)) => xs.iter().any(|x| {
            let sx = x.string_value();
            ys.iter().any(|y| compare_strings(op, &sx, &y.string_value()))
        }),
        (Value::Nodes(xs), scalar) => compare_nodes_scalar(op, xs, scalar),
        (scalar, Value::Nodes(ys)) => compare_nodes_scalar(flip(op), ys, scalar),
        _ => compare_scalars(op, a, b),
    }
}

fn flip(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Le => BinOp::Ge,
        BinOp::Gt => BinOp::Lt,
        BinOp::Ge => BinOp::Le,
        other => other,
    }
}

fn compare_nodes_scalar(op: BinOp, nodes: &[XNode<'_, '_>], scalar: &Value<'_, '_>) -> bool {
    match scalar {
        Value::Bool(b) => compare_scalars(op, &Value::Bool(!nodes.is_empty()), &Value::Bool(*b)),
        Value::Number(n) => nodes
            .iter()
            .any(|x| compare_numbers(op, str_to_number(&x.string_value()), *n)),
        Value::Str(s) => nodes.iter().any(|x| compare_strings(op, &x.string_value(), s)),
        Value::Nodes(_) => false,
    }
}

fn compare_scalars(op: BinOp, a: &Value<'_, '_>, b: &Value<'_, '_>) -> bool {
    if matches!(op, BinOp::Eq | BinOp::Ne) {
        let equal = if matches!(a, Value::Bool(_)) || matches!(b, Value::Bool(_)) {
            a.to_bool() == b.to_bool()
        } else if matches!(a, Value::Number(_)) || matches!(b, Value::Number(_)) {
            a.to_number() == b.to_number()
        } else {
            a.to_str() == b.to_str()
        };
        return equal == (op == BinOp::Eq);
    }
    compare_numbers(op, a.to_number(), b.to_number())
}

fn compare_strings(op: BinOp, a: &str, b: &str) -> bool {
    match op {
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        _ => compare_numbers(op, str_to_number(a), str_to_number(b)),
    }
}

fn compare_numbers(op: BinOp, a: f64, b: f64) -> bool {
    match op {
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        _ => match a.partial_cmp(&b) {
            None => false,
            Some(ord) => match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            },
        },
    }
}

fn call<'a, 'input>(
    name: &str,
    args: &[Expr],
    ctx: &Ctx<'a, 'input>,
) -> Result<Value<'a, 'input>, Error> {
    let arity = |min: usize, max: usize| -> Result<(), Error> {
        if args.len() < min || args.len() > max {
            return Err(Error::Transform(format!(
                "wrong number of arguments to XPath function '{name}'"
            )));
        }
        Ok(())
    };
    let arg = |i: usize| eval(&args[i], ctx);
    // Node-set argument, or the context node when omitted.
    let first_node = |optional: bool| -> Result<Option<XNode<'a, 'input>>, Error> {
        if optional && args.is_empty() {
            return Ok(Some(ctx.node));
        }
        match eval(&args[0], ctx)? {
            Value::Nodes(nodes) => Ok(nodes.first().copied()),
            _ => Err(Error::Transform(format!(
                "XPath function '{name}' expects a node-set"
            ))),
        }
    };

    match name {
        "true" | "false" => {
            arity(0, 0)?;
            Ok(Value::Bool(name == "true"))
        }
        "not" => {
            arity(1, 1)?;
            Ok(Value::Bool(!arg(0)?.to_bool()))
        }
        "boolean" => {
            arity(1, 1)?;
            Ok(Value::Bool(arg(0)?.to_bool()))
        }
        "number" => {
            arity(0, 1)?;
            Ok(Value::Number(if args.is_empty() {
                str_to_number(&ctx.node.string_value())
            } else {
                arg(0)?.to_number()
            }))
        }
        "string" => {
            arity(0, 1)?;
            Ok(Value::Str(if args.is_empty() {
                ctx.node.string_value()
            } else {
                arg(0)?.to_str()
            }))
        }
        "concat" => {
            arity(2, usize::MAX)?;
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(&arg(i)?.to_str());
            }
            Ok(Value::Str(out))
        }
        "contains" => {
            arity(2, 2)?;
            Ok(Value::Bool(arg(0)?.to_str().contains(&arg(1)?.to_str())))
        }
        "starts-with" => {
            arity(2, 2)?;
            Ok(Value::Bool(arg(0)?.to_str().starts_with(&arg(1)?.to_str())))
        }
        "string-length" => {
            arity(0, 1)?;
            let s = if args.is_empty() {
                ctx.node.string_value()
            } else {
                arg(0)?.to_str()
            };
            Ok(Value::Number(s.chars().count() as f64))
        }
        "normalize-space" => {
            arity(0, 1)?;
            let s = if args.is_empty() {
                ctx.node.string_value()
            } else {
                arg(0)?.to_str()
            };
            Ok(Value::Str(s.split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        "count" => {
            arity(1, 1)?;
            match arg(0)? {
                Value::Nodes(nodes) => Ok(Value::Number(nodes.len() as f64)),
                _ => Err(Error::Transform("count() expects a node-set".into())),
            }
        }
        "position" => {
            arity(0, 0)?;
            Ok(Value::Number(ctx.position as f64))
        }
        "last" => {
            arity(0, 0)?;
            Ok(Value::Number(ctx.size as f64))
        }
        "local-name" => {
            arity(0, 1)?;
            Ok(Value::Str(
                first_node(true)?.map(|n| n.local_name()).unwrap_or_default(),
            ))
        }
        "namespace-uri" => {
            arity(0, 1)?;
            Ok(Value::Str(
                first_node(true)?
                    .and_then(|n| n.namespace_uri())
                    .unwrap_or("")
                    .to_owned(),
            ))
        }
        "name" => {
            arity(0, 1)?;
            Ok(Value::Str(
                first_node(true)?.map(|n| n.qualified_name()).unwrap_or_default(),
            ))
        }
        other => Err(Error::Transform(format!(
            "unsupported XPath function '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<root xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a ID="1">one</a><!--c--><a ID="2"><b>two</b></a><ds:Signature><ds:SignedInfo/></ds:Signature></root>"#;

    fn no_ns() -> HashMap<String, String> {
        HashMap::new()
    }

    fn root_of<'a, 'i>(doc: &'a roxmltree::Document<'i>) -> XNode<'a, 'i> {
        XNode::Node(doc.root())
    }

    #[test]
    fn test_absolute_path() {
        let doc = crate::parse(DOC).unwrap();
        let xp = XPath::parse("/root/a", &no_ns()).unwrap();
        let nodes = xp.select(root_of(&doc)).unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_predicates() {
        let doc = crate::parse(DOC).unwrap();
        let second = XPath::parse("/root/a[2]/b", &no_ns()).unwrap();
        let nodes = second.select(root_of(&doc)).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].string_value(), "two");

        let by_attr = XPath::parse("//a[@ID='1']", &no_ns()).unwrap();
        let nodes = by_attr.select(root_of(&doc)).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].string_value(), "one");

        let last = XPath::parse("//a[position() = last()]/@ID", &no_ns()).unwrap();
        let nodes = last.select(root_of(&doc)).unwrap();
        assert_eq!(nodes[0].string_value(), "2");
    }

    #[test]
    fn test_not_ancestor_or_self_signature() {
        let doc = crate::parse(DOC).unwrap();
        let xp = XPath::parse("not(ancestor-or-self::ds:Signature)", &no_ns()).unwrap();
        let signed_info = doc
            .descendants()
            .find(|n| n.has_tag_name("SignedInfo"))
            .unwrap();
        let b = doc.descendants().find(|n| n.has_tag_name("b")).unwrap();
        assert!(!xp.matches(XNode::Node(signed_info)).unwrap());
        assert!(xp.matches(XNode::Node(b)).unwrap());
    }

    #[test]
    fn test_custom_prefix_binding() {
        let doc = crate::parse(DOC).unwrap();
        let mut bindings = HashMap::new();
        bindings.insert("sig".to_owned(), ns::DSIG.to_owned());
        let xp = XPath::parse("count(//sig:*)", &bindings).unwrap();
        assert!(xp.matches(root_of(&doc)).unwrap());
        let xp = XPath::parse("count(//sig:*) = 2", &bindings).unwrap();
        assert!(xp.matches(root_of(&doc)).unwrap());
    }

    #[test]
    fn test_node_type_tests_and_union() {
        let doc = crate::parse(DOC).unwrap();
        let xp = XPath::parse("//comment() | //text()", &no_ns()).unwrap();
        let nodes = xp.select(root_of(&doc)).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[1].string_value(), "c");
    }

    #[test]
    fn test_unprefixed_name_is_null_namespace() {
        let doc = crate::parse(r#"<r xmlns="urn:x"><e/></r>"#).unwrap();
        let xp = XPath::parse("//e", &no_ns()).unwrap();
        assert!(xp.select(root_of(&doc)).unwrap().is_empty());
        let xp = XPath::parse("//*[local-name()='e']", &no_ns()).unwrap();
        assert_eq!(xp.select(root_of(&doc)).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!(XPath::parse("//a[", &no_ns()).is_err());
        assert!(XPath::parse("here()", &no_ns()).is_err());
        assert!(XPath::parse("//undeclared:a", &no_ns()).is_err());
        assert!(XPath::parse("'open", &no_ns()).is_err());
        for unsupported in ["substring('abc', 2)", "translate('a', 'a', 'b')", "sum(//a)", "following::a", "$var"] {
            assert!(XPath::parse(unsupported, &no_ns()).is_err(), "{unsupported}");
        }
    }

    #[test]
    fn test_nesting_limit() {
        let too_deep = |expr: &str| {
            let err = XPath::parse(expr, &no_ns()).unwrap_err();
            assert_eq!(err.to_string(), too_deep().to_string());
        };
        too_deep(&format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000)));
        too_deep(&format!("{}1", "-".repeat(20_000)));
        too_deep(&["1"; 20_000].join(" + "));
        too_deep(&format!("{}1{}", "not(".repeat(500), ")".repeat(500)));
        too_deep(&format!("//a{}{}", "[*".repeat(500), "]".repeat(500)));

        let doc = crate::parse(DOC).unwrap();
        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(XPath::parse(&nested, &no_ns()).unwrap().matches(root_of(&doc)).unwrap());
        let chain = ["1"; 100].join(" + ");
        assert!(XPath::parse(&format!("{chain} = 100"), &no_ns())
            .unwrap()
            .matches(root_of(&doc))
            .unwrap());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(2.0), "2");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }
}
