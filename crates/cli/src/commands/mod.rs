pub mod check;
pub mod record;

pub use check::*;
pub use record::*;
