#![forbid(unsafe_code)]

//! Transform chain engine for xmldsig.
//!
//! Each `Reference` carries a sequence of transforms.  The referenced
//! content is resolved from the URI into a [`TransformData`] value, run
//! through the [`TransformChain`] and finally hashed.

pub mod enveloped;
pub mod pipeline;
pub mod uri;
pub mod xpath_filter;

pub use pipeline::{Transform, TransformChain, TransformData};
pub use uri::UriResolver;
pub use xpath_filter::XPathFilter;
