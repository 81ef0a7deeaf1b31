// AMF parsers and serializers

mod amf0;
mod amf3;
mod decode;
mod metadata;

pub use amf0::*;
pub use amf3::*;
pub use decode::*;
pub use metadata::*;
