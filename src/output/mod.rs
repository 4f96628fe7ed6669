//! Report writers for parsed images.

mod json;
mod csv;

pub use self::json::*;
pub use self::csv::*;
