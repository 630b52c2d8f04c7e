mod debug;
mod fourcc;
mod median;
pub mod parser;
mod range;
pub mod serializer;
mod time;

pub use debug::*;
pub use fourcc::*;
pub use median::*;
pub use range::*;
pub use time::*;
