//! Wire framing: a textual header line followed by a raw payload.
//!
//! `seq|flags|ack|payload_len|timestamp\n<payload bytes>`
//!
//! The header is intentionally printable for debugging. Decoding never
//! looks past `payload_len` bytes of payload, and the header MUST be
//! split on `|`, not on the trailing newline alone.

use bytes::Bytes;

use crate::error::Error;

bitflags::bitflags! {
    /// `bit 0` = ACK, `bit 1` = FIN.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const ACK = 0b01;
        const FIN = 0b10;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub seq: u64,
    pub flags: Flags,
    pub ack: u64,
    pub payload: Bytes,
    /// Monotonic-ish send time for RTT sampling. `0.0` means "do not sample".
    pub timestamp: f64,
}

impl Packet {
    pub fn data(seq: u64, payload: Bytes, timestamp: f64) -> Self {
        Self {
            seq,
            flags: Flags::empty(),
            ack: 0,
            payload,
            timestamp,
        }
    }

    pub fn ack(ack: u64, timestamp: f64) -> Self {
        Self {
            seq: 0,
            flags: Flags::ACK,
            ack,
            payload: Bytes::new(),
            timestamp,
        }
    }

    pub fn fin(seq: u64, timestamp: f64) -> Self {
        Self {
            seq,
            flags: Flags::FIN,
            ack: 0,
            payload: Bytes::new(),
            timestamp,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(Flags::ACK)
    }

    pub fn is_fin(&self) -> bool {
        self.flags.contains(Flags::FIN)
    }

    pub fn encode(&self) -> Bytes {
        let header = format!(
            "{}|{}|{}|{}|{}\n",
            self.seq,
            self.flags.bits(),
            self.ack,
            self.payload.len(),
            self.timestamp
        );
        let mut out = Vec::with_capacity(header.len() + self.payload.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.payload);
        Bytes::from(out)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        let nl = raw
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::Malformed("no header terminator".into()))?;
        let header = std::str::from_utf8(&raw[..nl])
            .map_err(|_| Error::Malformed("header is not utf-8".into()))?;
        let fields: Vec<&str> = header.split('|').collect();
        if fields.len() != 5 {
            return Err(Error::Malformed(format!(
                "expected 5 header fields, got {}",
                fields.len()
            )));
        }
        let seq: u64 = fields[0]
            .parse()
            .map_err(|_| Error::Malformed("bad seq".into()))?;
        let flags_bits: u8 = fields[1]
            .parse()
            .map_err(|_| Error::Malformed("bad flags".into()))?;
        let ack: u64 = fields[2]
            .parse()
            .map_err(|_| Error::Malformed("bad ack".into()))?;
        let payload_len: usize = fields[3]
            .parse()
            .map_err(|_| Error::Malformed("bad payload_len".into()))?;
        let timestamp: f64 = fields[4]
            .parse()
            .map_err(|_| Error::Malformed("bad timestamp".into()))?;

        let payload_start = nl + 1;
        let available = raw.len().saturating_sub(payload_start);
        if payload_len > available {
            return Err(Error::Malformed(format!(
                "declared payload_len {} exceeds {} bytes received",
                payload_len, available
            )));
        }
        let payload = Bytes::copy_from_slice(
            &raw[payload_start..payload_start + payload_len],
        );

        Ok(Self {
            seq,
            flags: Flags::from_bits_truncate(flags_bits),
            ack,
            payload,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_data_packet() {
        let p = Packet {
            seq: 7,
            flags: Flags::empty(),
            ack: 0,
            payload: Bytes::from_static(b"abc"),
            timestamp: 1700000000.123,
        };
        let encoded = p.encode();
        assert_eq!(encoded.as_ref(), b"7|0|0|3|1700000000.123\nabc".as_slice());
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn round_trip_ack_packet() {
        let p = Packet::ack(8, 1700000000.456);
        let encoded = p.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
        assert!(decoded.is_ack());
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn rejects_header_with_too_few_fields() {
        let raw = b"1|2|3\nxyz";
        assert!(Packet::decode(raw).is_err());
    }

    #[test]
    fn rejects_declared_len_exceeding_received_bytes() {
        let raw = b"1|0|0|100|0\nabc";
        assert!(Packet::decode(raw).is_err());
    }

    #[test]
    fn ignores_trailing_bytes_past_payload_len() {
        let raw = b"1|0|0|3|0\nabcXYZ";
        let decoded = Packet::decode(raw).unwrap();
        assert_eq!(decoded.payload.as_ref(), b"abc");
    }

    proptest! {
        #[test]
        fn framing_round_trip(
            seq in 0u64..=u32::MAX as u64,
            flags_bits in 0u8..4,
            ack in 0u64..=u32::MAX as u64,
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            ts in 0.0f64..2_000_000_000.0,
        ) {
            let p = Packet {
                seq,
                flags: Flags::from_bits_truncate(flags_bits),
                ack,
                payload: Bytes::from(payload),
                timestamp: ts,
            };
            let decoded = Packet::decode(&p.encode()).unwrap();
            prop_assert_eq!(decoded, p);
        }
    }
}
