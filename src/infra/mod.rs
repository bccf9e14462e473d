mod aggregate;
mod overrides;
mod processes;
mod source;
mod watch;

pub use aggregate::*;
pub use overrides::*;
pub use processes::*;
pub use source::*;
pub use watch::*;
