//! Message codec: framing for the wire protocol.
//!
//! ```text
//! +----------+--------------+----------+----------+
//! |  Magic   |   Command    |  Length  | Checksum |
//! | 4 bytes  |   12 bytes   | 4 bytes  | 4 bytes  |
//! +----------+--------------+----------+----------+
//! |                   Payload                     |
//! +-----------------------------------------------+
//! ```
//!
//! Magic and length are little-endian. The command is ASCII padded with NUL
//! bytes. The checksum is the first four bytes of SHA256d(payload).

use bytes::{Buf, BufMut, BytesMut};
use relaynet_types::hash::checksum;
use tokio_util::codec::{Decoder, Encoder};

use crate::packets::Packet;
use crate::ProtocolError;

/// Maximum payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 4_000_000;

/// magic (4) + command (12) + length (4) + checksum (4)
pub const HEADER_SIZE: usize = 24;

const COMMAND_SIZE: usize = 12;

/// Frames [`Packet`]s for one network.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    magic: u32,
    max_size: usize,
}

impl FrameCodec {
    pub fn new(magic: u32) -> Self {
        Self {
            magic,
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }
}

fn parse_command(raw: &[u8]) -> Result<String, ProtocolError> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let (cmd, padding) = raw.split_at(end);
    if cmd.is_empty() || padding.iter().any(|b| *b != 0) {
        return Err(ProtocolError::BadCommand);
    }
    if !cmd.iter().all(|b| b.is_ascii_graphic()) {
        return Err(ProtocolError::BadCommand);
    }
    Ok(cmd.iter().map(|&b| b as char).collect())
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if magic != self.magic {
            return Err(ProtocolError::BadMagic {
                expected: self.magic,
                got: magic,
            });
        }

        let command = parse_command(&src[4..4 + COMMAND_SIZE])?;
        let length = u32::from_le_bytes([src[16], src[17], src[18], src[19]]) as usize;
        let expected = [src[20], src[21], src[22], src[23]];

        if length > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let total_size = HEADER_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        if checksum(&payload) != expected {
            return Err(ProtocolError::BadChecksum { command });
        }

        Packet::decode(&command, &payload).map(Some)
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let command = item.command();
        if command.len() > COMMAND_SIZE {
            return Err(ProtocolError::CommandTooLong {
                command: command.to_string(),
            });
        }
        if command.is_empty() || !command.is_ascii() {
            return Err(ProtocolError::BadCommand);
        }
        item.check_limits()?;

        let payload = item.encode();
        if payload.len() > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }

        let mut cmd = [0u8; COMMAND_SIZE];
        cmd[..command.len()].copy_from_slice(command.as_bytes());

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u32_le(self.magic);
        dst.put_slice(&cmd);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&checksum(&payload));
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::MAX_INV;
    use relaynet_types::{Hash256, InvItem};

    const MAGIC: u32 = 0xd9b4_bef9;

    fn frame(packet: Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new(MAGIC).encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn verack_frame_bytes() {
        let buf = frame(Packet::Verack);
        assert_eq!(
            &buf[..],
            &[
                0xf9, 0xbe, 0xb4, 0xd9, b'v', b'e', b'r', b'a', b'c', b'k', 0, 0, 0, 0, 0, 0, 0,
                0, 0, 0, 0x5d, 0xf6, 0xe0, 0xe2
            ]
        );
    }

    #[test]
    fn partial_frames_wait_for_more() {
        let full = frame(Packet::Pong(42));
        let mut codec = FrameCodec::new(MAGIC);

        let mut partial = BytesMut::from(&full[..HEADER_SIZE + 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full[HEADER_SIZE + 3..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(Packet::Pong(42)));
        assert!(partial.is_empty());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut buf = frame(Packet::Ping(Some(1)));
        buf.extend_from_slice(&frame(Packet::GetAddr));
        let mut codec = FrameCodec::new(MAGIC);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::Ping(Some(1))));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::GetAddr));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut buf = frame(Packet::Verack);
        let err = FrameCodec::new(0x0709_110b).decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::BadMagic { .. }));
    }

    #[test]
    fn corrupt_payload_fails_checksum() {
        let mut buf = frame(Packet::Pong(7));
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        let err = FrameCodec::new(MAGIC).decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::BadChecksum { .. }));
    }

    #[test]
    fn oversized_length_rejected_before_payload_arrives() {
        let mut buf = frame(Packet::Verack);
        buf[16..20].copy_from_slice(&((MAX_MESSAGE_SIZE as u32) + 1).to_le_bytes());
        let err = FrameCodec::new(MAGIC).decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn command_padding_must_be_nul() {
        let mut buf = frame(Packet::Verack);
        buf[14] = b'x';
        let err = FrameCodec::new(MAGIC).decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::BadCommand));
    }

    #[test]
    fn authchallenge_does_not_fit_a_frame() {
        let mut buf = BytesMut::new();
        let err = FrameCodec::new(MAGIC)
            .encode(Packet::AuthChallenge([3; 32]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::CommandTooLong { ref command } if command == "authchallenge"));
        assert!(buf.is_empty());

        // The 12-byte commands next to it still frame.
        let mut buf = frame(Packet::AuthPropose([4; 32]));
        assert_eq!(
            FrameCodec::new(MAGIC).decode(&mut buf).unwrap(),
            Some(Packet::AuthPropose([4; 32]))
        );
    }

    #[test]
    fn over_cap_inventory_is_not_framed() {
        let item = InvItem::tx(Hash256::new([1; 32]));
        let items = vec![item; MAX_INV + 1];
        let mut buf = BytesMut::new();
        let err = FrameCodec::new(MAGIC)
            .encode(Packet::Inv(items), &mut buf)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::LimitExceeded { what: "inventory", .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_commands_pass_through() {
        let packet = Packet::Unknown {
            command: "sendaddrv2".into(),
            data: bytes::Bytes::new(),
        };
        let mut buf = frame(packet.clone());
        assert_eq!(FrameCodec::new(MAGIC).decode(&mut buf).unwrap(), Some(packet));
    }
}
