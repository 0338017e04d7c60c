#![forbid(unsafe_code)]

//! Core types shared by every crate in the xmldsig workspace: the error
//! type, algorithm URIs and namespace constants.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, Result, ValidationError};
