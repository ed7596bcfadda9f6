pub mod capsule;
pub mod codec;
pub mod error;
pub mod frame;
pub mod h3;
pub mod payload;
pub mod stream;
pub mod varint;

pub use capsule::{
    Capsule, CapsuleDecoder, CloseInfo, ControlCapsule, DEFAULT_MAX_CAPSULE_LEN,
};
pub use codec::Cursor;
pub use error::{Error, Result};
pub use h3::Settings;
pub use payload::PayloadHeader;
