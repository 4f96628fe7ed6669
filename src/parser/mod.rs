//! Reader for the COW snapshot image format.

mod header;
mod index;
mod label;
mod op;
mod result;
mod scanner;

pub use header::*;
pub use index::*;
pub use label::*;
pub use op::*;
pub use result::*;
pub use scanner::*;
