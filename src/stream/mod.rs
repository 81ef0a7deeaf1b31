// Live stream fan-out engine

mod cache;
mod engine;
mod info;
mod packet;
mod queue;
mod registry;

pub use cache::*;
pub use engine::*;
pub use info::*;
pub use packet::*;
pub use queue::*;
pub use registry::*;
