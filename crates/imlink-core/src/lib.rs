//! imlink-core: shared protocol library for the connector ↔ transfer link.
//!
//! Provides the message envelope model and its origin/destination checks,
//! length-prefixed CBOR framing, framed stream halves, and the id and token
//! generators nodes use to stamp their traffic.

pub mod codec;
pub mod error;
pub mod id;
pub mod messages;
pub mod token;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{cbor_decode, frame_encode, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
pub use error::{ImError, ImResult};
pub use id::{IdGenerator, SnowflakeIdGenerator};
pub use messages::{
    check_dest, check_from, AckMsg, ChatMsg, InternalMsg, MessageClass, Module, MsgType,
    TransferMessage, PROTOCOL_VERSION,
};
pub use token::{RandomTokenGenerator, TokenGenerator};
pub use transport::{FrameReader, FrameWriter};
