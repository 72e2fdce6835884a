//! Wire codec for the two datagram kinds.
//!
//! Both framings are textual so captures stay readable:
//! - Data: `SEQ:<0|1>|` followed by the opaque payload.
//! - Ack:  `ACK:<0|1>` with nothing after the digit.
//!
//! The underlying datagram service already carries a checksum, so no
//! integrity field is added here. Decoding is strict: anything that is not
//! exactly one of the two shapes above is `None` and callers drop it.

use bytes::{BufMut, Bytes, BytesMut};

/// ASCII prefix of a data packet.
pub const DATA_PREFIX: &[u8] = b"SEQ:";
/// ASCII prefix of an ack packet.
pub const ACK_PREFIX: &[u8] = b"ACK:";

/// A one-bit sequence number. Two independent bits are kept per peer, one
/// per direction; both start at zero on first contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqBit(u8);

impl SeqBit {
    pub const ZERO: SeqBit = SeqBit(0);
    pub const ONE: SeqBit = SeqBit(1);

    /// The other bit.
    pub fn flip(self) -> SeqBit {
        SeqBit(1 - self.0)
    }

    /// Index into a two-slot table.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn ascii(self) -> u8 {
        self.0 + b'0'
    }

    fn from_ascii(digit: u8) -> Option<SeqBit> {
        match digit {
            b'0' => Some(SeqBit(0)),
            b'1' => Some(SeqBit(1)),
            _ => None,
        }
    }
}

impl std::fmt::Display for SeqBit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded inbound packet. The payload borrows the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Data { seq: SeqBit, payload: &'a [u8] },
    Ack { seq: SeqBit },
}

/// Builds a data frame. The payload is transparent: it may be empty or
/// contain `|`, header bytes, or arbitrary binary.
pub fn encode_data(seq: SeqBit, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATA_PREFIX.len() + 2 + payload.len());
    buf.put_slice(DATA_PREFIX);
    buf.put_u8(seq.ascii());
    buf.put_u8(b'|');
    buf.put_slice(payload);
    buf.freeze()
}

/// Builds an ack frame.
pub fn encode_ack(seq: SeqBit) -> Bytes {
    let mut buf = BytesMut::with_capacity(ACK_PREFIX.len() + 1);
    buf.put_slice(ACK_PREFIX);
    buf.put_u8(seq.ascii());
    buf.freeze()
}

/// Parses one datagram. `None` means malformed; the transport discards
/// those silently.
pub fn decode(wire: &[u8]) -> Option<Packet<'_>> {
    if let Some(rest) = wire.strip_prefix(ACK_PREFIX) {
        let [digit] = rest else { return None };
        return Some(Packet::Ack {
            seq: SeqBit::from_ascii(*digit)?,
        });
    }
    if let Some(rest) = wire.strip_prefix(DATA_PREFIX) {
        let [digit, b'|', payload @ ..] = rest else {
            return None;
        };
        return Some(Packet::Data {
            seq: SeqBit::from_ascii(*digit)?,
            payload,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_roundtrip_both_bits() {
        for seq in [SeqBit::ZERO, SeqBit::ONE] {
            let wire = encode_data(seq, b"move up");
            assert_eq!(
                decode(&wire),
                Some(Packet::Data {
                    seq,
                    payload: b"move up"
                })
            );
        }
    }

    #[test]
    fn ack_roundtrip_both_bits() {
        for seq in [SeqBit::ZERO, SeqBit::ONE] {
            let wire = encode_ack(seq);
            assert_eq!(decode(&wire), Some(Packet::Ack { seq }));
        }
    }

    #[test]
    fn empty_payload_is_preserved() {
        let wire = encode_data(SeqBit::ZERO, b"");
        assert_eq!(&wire[..], b"SEQ:0|");
        assert_eq!(
            decode(&wire),
            Some(Packet::Data {
                seq: SeqBit::ZERO,
                payload: b""
            })
        );
    }

    #[test]
    fn payload_is_transparent() {
        // No escaping: structural bytes inside the payload must survive.
        let tricky = b"SEQ:1|ACK:0|x\x00y";
        let wire = encode_data(SeqBit::ONE, tricky);
        match decode(&wire) {
            Some(Packet::Data { seq, payload }) => {
                assert_eq!(seq, SeqBit::ONE);
                assert_eq!(payload, tricky);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn malformed_packets_decode_to_none() {
        let cases: &[&[u8]] = &[
            b"",
            b"SEQ",
            b"SEQ:",
            b"SEQ:0",     // missing separator
            b"SEQ:2|abc", // bad digit
            b"SEQ:x|abc",
            b"ACK:",
            b"ACK:2",
            b"ACK:0x", // trailing bytes on an ack
            b"NAK:0",
            b"hello world",
        ];
        for wire in cases {
            assert_eq!(decode(wire), None, "should reject {wire:?}");
        }
    }

    #[test]
    fn seq_bit_flips() {
        assert_eq!(SeqBit::ZERO.flip(), SeqBit::ONE);
        assert_eq!(SeqBit::ONE.flip(), SeqBit::ZERO);
        assert_eq!(SeqBit::default(), SeqBit::ZERO);
    }
}
