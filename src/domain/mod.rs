mod liveness;
mod parse;
mod pathcode;
mod todos;
mod types;

pub use liveness::*;
pub use parse::*;
pub use pathcode::*;
pub use todos::*;
pub use types::*;
