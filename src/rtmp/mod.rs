// RTMP protocol utilities

mod chunk_read;
mod command;
mod constants;
mod data;
mod handshake;
mod messages;
mod packet;

pub use chunk_read::*;
pub use command::*;
pub use constants::*;
pub use data::*;
pub use handshake::*;
pub use messages::*;
pub use packet::*;
