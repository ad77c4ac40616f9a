//! Transaction data model and structural validation

mod transaction;

pub use transaction::*;
