//! Binary frame codec shared by the balancer and the protocol peer.
//!
//! Both frame kinds are fixed-width with no length prefix or terminator:
//!
//! ```text
//! Handshake: [discriminant: u32 = 1][client_id: u32]
//! Data:      [discriminant: u32 = 2][payload:   u32]
//! ```
//!
//! All integers are big-endian (network order). The decoder relies on the
//! caller buffering exactly `frame_length(kind)` bytes before calling it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Discriminant of a handshake frame on the wire.
pub const HANDSHAKE_TYPE: u32 = 1;

/// Discriminant of a data frame on the wire.
pub const DATA_TYPE: u32 = 2;

const DISCRIMINANT_LEN: usize = 4;
const BODY_LEN: usize = 4;

/// Frame variant, used to size reads before any bytes arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Handshake,
    Data,
}

/// A decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// First frame of a session, identifying the client.
    Handshake { client_id: u32 },
    /// Opaque payload to forward to the backend.
    Data { payload: u32 },
    /// Unrecognized discriminant. Rejecting it is up to the caller.
    Unknown { discriminant: u32, body: u32 },
}

impl Frame {
    /// Wire discriminant of this frame.
    pub fn discriminant(&self) -> u32 {
        match *self {
            Frame::Handshake { .. } => HANDSHAKE_TYPE,
            Frame::Data { .. } => DATA_TYPE,
            Frame::Unknown { discriminant, .. } => discriminant,
        }
    }

    fn body(&self) -> u32 {
        match *self {
            Frame::Handshake { client_id } => client_id,
            Frame::Data { payload } => payload,
            Frame::Unknown { body, .. } => body,
        }
    }

    /// Encoded length of this frame.
    pub fn encoded_len(&self) -> usize {
        DISCRIMINANT_LEN + BODY_LEN
    }
}

/// Number of bytes a frame of `kind` occupies on the wire.
pub const fn frame_length(kind: FrameKind) -> usize {
    match kind {
        FrameKind::Handshake | FrameKind::Data => DISCRIMINANT_LEN + BODY_LEN,
    }
}

/// Codec errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than a complete frame.
    Truncated { needed: usize, available: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated { needed, available } => {
                write!(f, "truncated frame: need {} bytes, have {}", needed, available)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Encode a frame into a buffer of exactly its encoded length.
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    encode_into(frame, &mut buf);
    buf.freeze()
}

/// Append the encoded frame to `dst`.
pub fn encode_into(frame: &Frame, dst: &mut impl BufMut) {
    dst.put_u32(frame.discriminant());
    dst.put_u32(frame.body());
}

/// Decode a frame from the start of `src`.
///
/// Trailing bytes beyond one frame are ignored.
pub fn decode(mut src: &[u8]) -> Result<Frame, CodecError> {
    let needed = DISCRIMINANT_LEN + BODY_LEN;
    if src.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: src.len(),
        });
    }

    let discriminant = src.get_u32();
    let body = src.get_u32();

    Ok(match discriminant {
        HANDSHAKE_TYPE => Frame::Handshake { client_id: body },
        DATA_TYPE => Frame::Data { payload: body },
        _ => Frame::Unknown { discriminant, body },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_handshake_layout() {
        let bytes = encode(&Frame::Handshake { client_id: 42 });
        assert_eq!(&bytes[..], &[0, 0, 0, 1, 0, 0, 0, 42]);
        assert_eq!(bytes.len(), frame_length(FrameKind::Handshake));
    }

    #[test]
    fn test_data_layout() {
        let bytes = encode(&Frame::Data { payload: 123456 });
        assert_eq!(&bytes[..], &[0, 0, 0, 2, 0, 1, 0xE2, 0x40]);
        assert_eq!(bytes.len(), frame_length(FrameKind::Data));
    }

    #[test]
    fn test_unknown_discriminant_is_not_an_error() {
        let frame = decode(&[0, 0, 0, 9, 0, 0, 0, 7]).unwrap();
        assert_eq!(
            frame,
            Frame::Unknown {
                discriminant: 9,
                body: 7
            }
        );
        assert_eq!(frame.discriminant(), 9);
    }

    #[test]
    fn test_truncated() {
        match decode(&[0, 0, 0, 1, 0]) {
            Err(CodecError::Truncated {
                needed: 8,
                available: 5,
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let frame = decode(&[0, 0, 0, 2, 0, 0, 0, 5, 0xFF]).unwrap();
        assert_eq!(frame, Frame::Data { payload: 5 });
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        encode_into(&Frame::Handshake { client_id: 1 }, &mut buf);
        encode_into(&Frame::Data { payload: 2 }, &mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(decode(&buf[8..]).unwrap(), Frame::Data { payload: 2 });
    }

    fn arb_frame() -> impl Strategy<Value = Frame> {
        prop_oneof![
            any::<u32>().prop_map(|client_id| Frame::Handshake { client_id }),
            any::<u32>().prop_map(|payload| Frame::Data { payload }),
            (3u32.., any::<u32>())
                .prop_map(|(discriminant, body)| Frame::Unknown { discriminant, body }),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip(frame in arb_frame()) {
            let bytes = encode(&frame);
            prop_assert_eq!(bytes.len(), frame.encoded_len());
            prop_assert_eq!(decode(&bytes).unwrap(), frame);
        }
    }
}
