mod mutex;
mod sequence;
mod start;

pub(crate) use mutex::*;
pub use sequence::*;
pub use start::*;
