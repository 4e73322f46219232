//! Wire protocol: packet encoding and decoding, message framing, the handshake and versioning.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod packets;
pub mod version;

pub use codec::{FrameCodec, MAX_MESSAGE_SIZE};
pub use error::ProtocolError;
pub use handshake::{Handshake, HandshakeStep};
pub use packets::{Packet, PacketType};
pub use version::{LOCAL_SERVICES, PROTOCOL_VERSION};
