//! Common definitions shared by the `tileforge-*` crates: the error type,
//! the `Result` alias and the input-data verification macro.

pub mod error;
pub mod result;

pub use error::{Error, ErrorKind, OsmEntity};
pub use result::Result;
