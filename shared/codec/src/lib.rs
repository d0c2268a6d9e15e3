//! Wire codec for the MMDVM/HomeBrew `DMRD` voice/data frame.
//!
//! A `DMRD` frame is 53 bytes, or 55 when the BER/RSSI trailer is present.
//! See the byte layout in the routing core's protocol notes; this crate has
//! no knowledge of sockets or sessions, only of the frame itself.

use thiserror::Error;

pub const FRAME_LEN_BASE: usize = 53;
pub const FRAME_LEN_WITH_TRAILER: usize = 55;
pub const DMR_PAYLOAD_LEN: usize = 33;

/// Absent sentinel for BER/RSSI, matching the wire convention.
pub const ABSENT: i16 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame has invalid length {0} (want 53 or 55)")]
    InvalidLength(usize),
}

/// DMR superframe position, `dTypeOrVSeq` when `frame_type == Voice`.
pub const VOICE_HEAD: u8 = 0;
pub const VOICE_F: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Voice,
    VoiceSync,
    DataSync,
}

impl FrameType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => FrameType::Voice,
            1 => FrameType::VoiceSync,
            _ => FrameType::DataSync,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            FrameType::Voice => 0,
            FrameType::VoiceSync => 1,
            FrameType::DataSync => 2,
        }
    }
}

/// A decoded `DMRD` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u8,
    pub src: u32,
    pub dst: u32,
    pub repeater: u32,
    /// `false` = TS1, `true` = TS2.
    pub slot: bool,
    pub group_call: bool,
    pub frame_type: FrameType,
    /// Voice superframe position (0..=5) when `frame_type == Voice`, otherwise a DMR data type.
    pub d_type_or_vseq: u8,
    pub stream_id: u32,
    pub dmr_data: [u8; DMR_PAYLOAD_LEN],
    /// Bit error rate; `-1` means absent.
    pub ber: i16,
    /// Received signal strength; `-1` means absent.
    pub rssi: i16,
}

impl Packet {
    pub fn is_voice_header(&self) -> bool {
        self.frame_type == FrameType::DataSync && self.d_type_or_vseq == VOICE_HEAD
    }

    pub fn is_voice_terminator(&self) -> bool {
        self.frame_type == FrameType::DataSync && self.d_type_or_vseq == VOICE_F
    }

    /// Encode to a `BytesMut`-free byte vector. Trailer bytes are appended only
    /// when at least one of BER/RSSI is present.
    pub fn encode(&self) -> Vec<u8> {
        let has_trailer = self.ber != ABSENT || self.rssi != ABSENT;
        let mut out = Vec::with_capacity(if has_trailer {
            FRAME_LEN_WITH_TRAILER
        } else {
            FRAME_LEN_BASE
        });

        out.extend_from_slice(b"DMRD");
        out.push(self.seq);

        out.extend_from_slice(&be24(self.src));
        out.extend_from_slice(&be24(self.dst));
        out.extend_from_slice(&self.repeater.to_be_bytes());

        let mut bitfield = 0u8;
        if self.slot {
            bitfield |= 0b1000_0000;
        }
        if !self.group_call {
            bitfield |= 0b0100_0000;
        }
        bitfield |= self.frame_type.to_bits() << 4;
        bitfield |= self.d_type_or_vseq & 0b1111;
        out.push(bitfield);

        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.extend_from_slice(&self.dmr_data);

        if has_trailer {
            out.push(self.ber.clamp(-1, i16::MAX) as u8);
            out.push(self.rssi.clamp(-1, i16::MAX) as u8);
        }

        out
    }

    /// Decode a `DMRD` frame. The signature (first 4 bytes) is not checked here —
    /// the caller dispatches on it before calling `decode`.
    pub fn decode(buf: &[u8]) -> Result<Packet, CodecError> {
        if buf.len() != FRAME_LEN_BASE && buf.len() != FRAME_LEN_WITH_TRAILER {
            return Err(CodecError::InvalidLength(buf.len()));
        }

        let seq = buf[4];
        let src = from_be24(&buf[5..8]);
        let dst = from_be24(&buf[8..11]);
        let repeater = u32::from_be_bytes([buf[11], buf[12], buf[13], buf[14]]);

        let bitfield = buf[15];
        let slot = bitfield & 0b1000_0000 != 0;
        let group_call = bitfield & 0b0100_0000 == 0;
        let frame_type = FrameType::from_bits((bitfield >> 4) & 0b11);
        let d_type_or_vseq = bitfield & 0b1111;

        let stream_id = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);

        let mut dmr_data = [0u8; DMR_PAYLOAD_LEN];
        dmr_data.copy_from_slice(&buf[20..20 + DMR_PAYLOAD_LEN]);

        let (ber, rssi) = if buf.len() == FRAME_LEN_WITH_TRAILER {
            (buf[53] as i16, buf[54] as i16)
        } else {
            (ABSENT, ABSENT)
        };

        Ok(Packet {
            seq,
            src,
            dst,
            repeater,
            slot,
            group_call,
            frame_type,
            d_type_or_vseq,
            stream_id,
            dmr_data,
            ber,
            rssi,
        })
    }
}

fn be24(v: u32) -> [u8; 3] {
    let b = v.to_be_bytes();
    [b[1], b[2], b[3]]
}

fn from_be24(b: &[u8]) -> u32 {
    u32::from_be_bytes([0, b[0], b[1], b[2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ber: i16, rssi: i16) -> Packet {
        Packet {
            seq: 7,
            src: 1_000_001,
            dst: 1,
            repeater: 100_001,
            slot: false,
            group_call: true,
            frame_type: FrameType::Voice,
            d_type_or_vseq: 3,
            stream_id: 42,
            dmr_data: [0xAB; DMR_PAYLOAD_LEN],
            ber,
            rssi,
        }
    }

    #[test]
    fn round_trip_without_trailer() {
        let p = sample(ABSENT, ABSENT);
        let bytes = p.encode();
        assert_eq!(bytes.len(), FRAME_LEN_BASE);
        assert_eq!(Packet::decode(&bytes).unwrap(), p);
    }

    #[test]
    fn round_trip_with_trailer() {
        let p = sample(12, 90);
        let bytes = p.encode();
        assert_eq!(bytes.len(), FRAME_LEN_WITH_TRAILER);
        assert_eq!(Packet::decode(&bytes).unwrap(), p);
    }

    #[test]
    fn slot_and_group_call_bits() {
        let mut p = sample(ABSENT, ABSENT);
        p.slot = true;
        p.group_call = false;
        let bytes = p.encode();
        assert_eq!(bytes[15] & 0b1000_0000, 0b1000_0000);
        assert_eq!(bytes[15] & 0b0100_0000, 0b0100_0000);
        let back = Packet::decode(&bytes).unwrap();
        assert!(back.slot);
        assert!(!back.group_call);
    }

    #[test]
    fn rejects_bad_length() {
        let err = Packet::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(err, CodecError::InvalidLength(10));
    }

    #[test]
    fn voice_header_and_terminator_detection() {
        let mut p = sample(ABSENT, ABSENT);
        p.frame_type = FrameType::DataSync;
        p.d_type_or_vseq = VOICE_HEAD;
        assert!(p.is_voice_header());
        p.d_type_or_vseq = VOICE_F;
        assert!(p.is_voice_terminator());
    }
}
