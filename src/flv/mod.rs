// FLV tag codec
// Payload format for RTMP audio, video and script messages

mod aac;
mod avc;
mod tag;

pub use aac::*;
pub use avc::*;
pub use tag::*;
