use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{FlexError, FlexResult};

pub use audio::AudioFrame;
pub use fft::FftFrame;
pub use meter::MeterSample;
pub use waterfall::WaterfallFrame;

pub(crate) use assembly::FrameAssembler;
pub(crate) use discovery::parse_discovery_payload;

mod assembly;
pub(crate) mod audio;
pub(crate) mod discovery;
pub(crate) mod fft;
pub(crate) mod meter;
pub(crate) mod waterfall;

/// Organizationally unique identifier FlexRadio stamps into VITA class ids.
pub const FLEX_OUI: u32 = 0x00_1c_2d;

/// VITA-49 packet type, bits 31..28 of the first header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    IfData = 0x0,
    IfDataWithStream = 0x1,
    ExtData = 0x2,
    ExtDataWithStream = 0x3,
    Context = 0x4,
    ExtContext = 0x5,
}

impl PacketType {
    fn from_bits(bits: u32) -> FlexResult<Self> {
        Ok(match bits {
            0x0 => Self::IfData,
            0x1 => Self::IfDataWithStream,
            0x2 => Self::ExtData,
            0x3 => Self::ExtDataWithStream,
            0x4 => Self::Context,
            0x5 => Self::ExtContext,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unsupported VITA packet type {:#x}",
                    other
                )))
            }
        })
    }

    /// Whether a stream identifier word follows the header.
    pub fn has_stream_id(&self) -> bool {
        !matches!(self, Self::IfData | Self::ExtData)
    }
}

/// Known FlexRadio packet class codes (the low 16 bits of the class id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketClass {
    Meter,
    Fft,
    Waterfall,
    Opus,
    DaxAudio,
    Discovery,
    Unknown(u16),
}

impl PacketClass {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x8002 => Self::Meter,
            0x8003 => Self::Fft,
            0x8004 => Self::Waterfall,
            0x8005 => Self::Opus,
            0x03e3 => Self::DaxAudio,
            0xffff => Self::Discovery,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match *self {
            Self::Meter => 0x8002,
            Self::Fft => 0x8003,
            Self::Waterfall => 0x8004,
            Self::Opus => 0x8005,
            Self::DaxAudio => 0x03e3,
            Self::Discovery => 0xffff,
            Self::Unknown(code) => code,
        }
    }
}

/// 64-bit VITA class identifier: a padded OUI word followed by the
/// information and packet class codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassId {
    pub oui: u32,
    pub information_class: u16,
    pub packet_class: PacketClass,
}

impl ClassId {
    pub fn flex(packet_class: PacketClass) -> Self {
        Self {
            oui: FLEX_OUI,
            information_class: 0x534c,
            packet_class,
        }
    }
}

/// A parsed VITA-49 datagram.
///
/// Only the subset of the standard the radio uses is modeled: big-endian
/// header words, optional stream id, class id, UTC integer and fractional
/// timestamps, and an optional one-word trailer.
#[derive(Debug, Clone, PartialEq)]
pub struct VitaPacket {
    pub packet_type: PacketType,
    /// Modulo-16 packet counter, used for loss detection per stream.
    pub count: u8,
    pub stream_id: Option<u32>,
    pub class_id: Option<ClassId>,
    pub timestamp_int: Option<u32>,
    pub timestamp_frac: Option<u64>,
    pub trailer: Option<u32>,
    pub payload: Bytes,
}

impl VitaPacket {
    /// Parses a datagram. The `packet_size` header field must account for
    /// the datagram length exactly, otherwise the packet is rejected.
    pub fn parse(buf: &[u8]) -> FlexResult<Self> {
        if buf.len() < 4 || buf.len() % 4 != 0 {
            return Err(FlexError::Protocol(format!(
                "VITA datagram of {} bytes is not word aligned",
                buf.len()
            )));
        }

        let mut cur = buf;
        let word0 = cur.get_u32();

        let packet_type = PacketType::from_bits(word0 >> 28)?;
        let has_class_id = word0 & (1 << 27) != 0;
        let has_trailer = word0 & (1 << 26) != 0;
        let tsi = (word0 >> 22) & 0b11;
        let tsf = (word0 >> 20) & 0b11;
        let count = ((word0 >> 16) & 0b1111) as u8;
        let size_words = (word0 & 0xffff) as usize;

        if size_words * 4 != buf.len() {
            return Err(FlexError::Protocol(format!(
                "VITA size field ({} words) does not match datagram length ({} bytes)",
                size_words,
                buf.len()
            )));
        }

        let mut header_words = 1usize;
        if packet_type.has_stream_id() {
            header_words += 1;
        }
        if has_class_id {
            header_words += 2;
        }
        if tsi != 0 {
            header_words += 1;
        }
        if tsf != 0 {
            header_words += 2;
        }
        let trailer_words = usize::from(has_trailer);
        if size_words < header_words + trailer_words {
            return Err(FlexError::Protocol(
                "VITA datagram too short for its header fields".to_string(),
            ));
        }

        let stream_id = packet_type.has_stream_id().then(|| cur.get_u32());
        let class_id = has_class_id.then(|| {
            let oui = cur.get_u32() & 0x00ff_ffff;
            let information_class = cur.get_u16();
            let packet_class = PacketClass::from_code(cur.get_u16());
            ClassId {
                oui,
                information_class,
                packet_class,
            }
        });
        let timestamp_int = (tsi != 0).then(|| cur.get_u32());
        let timestamp_frac = (tsf != 0).then(|| cur.get_u64());

        let payload_len = (size_words - header_words - trailer_words) * 4;
        let payload = Bytes::copy_from_slice(&cur[..payload_len]);
        cur.advance(payload_len);
        let trailer = has_trailer.then(|| cur.get_u32());

        Ok(Self {
            packet_type,
            count,
            stream_id,
            class_id,
            timestamp_int,
            timestamp_frac,
            trailer,
            payload,
        })
    }

    /// Serializes the packet, padding the payload to a word boundary.
    pub fn encode(&self) -> Bytes {
        let payload_words = self.payload.len().div_ceil(4);
        let mut size_words = 1 + payload_words;
        if self.packet_type.has_stream_id() {
            size_words += 1;
        }
        if self.class_id.is_some() {
            size_words += 2;
        }
        if self.timestamp_int.is_some() {
            size_words += 1;
        }
        if self.timestamp_frac.is_some() {
            size_words += 2;
        }
        if self.trailer.is_some() {
            size_words += 1;
        }

        let mut word0 = (self.packet_type as u32) << 28;
        if self.class_id.is_some() {
            word0 |= 1 << 27;
        }
        if self.trailer.is_some() {
            word0 |= 1 << 26;
        }
        if self.timestamp_int.is_some() {
            // TSI = UTC
            word0 |= 0b01 << 22;
        }
        if self.timestamp_frac.is_some() {
            // TSF = real-time picoseconds
            word0 |= 0b10 << 20;
        }
        word0 |= u32::from(self.count & 0b1111) << 16;
        word0 |= size_words as u32 & 0xffff;

        let mut out = BytesMut::with_capacity(size_words * 4);
        out.put_u32(word0);
        if self.packet_type.has_stream_id() {
            out.put_u32(self.stream_id.unwrap_or_default());
        }
        if let Some(class_id) = &self.class_id {
            out.put_u32(class_id.oui & 0x00ff_ffff);
            out.put_u16(class_id.information_class);
            out.put_u16(class_id.packet_class.code());
        }
        if let Some(ts) = self.timestamp_int {
            out.put_u32(ts);
        }
        if let Some(ts) = self.timestamp_frac {
            out.put_u64(ts);
        }
        out.put_slice(&self.payload);
        for _ in self.payload.len()..payload_words * 4 {
            out.put_u8(0);
        }
        if let Some(trailer) = self.trailer {
            out.put_u32(trailer);
        }
        out.freeze()
    }

    /// Builds a data packet bearing a Flex class id, the shape used by all
    /// radio stream traffic.
    pub fn data(packet_class: PacketClass, stream_id: u32, count: u8, payload: Bytes) -> Self {
        Self {
            packet_type: PacketType::IfDataWithStream,
            count,
            stream_id: Some(stream_id),
            class_id: Some(ClassId::flex(packet_class)),
            timestamp_int: None,
            timestamp_frac: None,
            trailer: None,
            payload,
        }
    }

    /// The minimal packet the socket pool sends to keep a NAT pinhole open.
    pub(crate) fn keep_alive(handle: u32) -> Self {
        Self {
            packet_type: PacketType::ExtDataWithStream,
            count: 0,
            stream_id: Some(handle),
            class_id: None,
            timestamp_int: None,
            timestamp_frac: None,
            trailer: None,
            payload: Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip_data_packet() {
        let packet = VitaPacket::data(
            PacketClass::Fft,
            0x4000_0001,
            7,
            Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
        );
        let encoded = packet.encode();
        let parsed = VitaPacket::parse(&encoded).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.class_id.unwrap().packet_class, PacketClass::Fft);
    }

    #[test]
    fn rejects_inconsistent_size_field() {
        let packet = VitaPacket::data(PacketClass::Meter, 1, 0, Bytes::from_static(&[0; 8]));
        let mut encoded = BytesMut::from(&packet.encode()[..]);
        // one extra word the size field does not account for
        encoded.put_u32(0);
        assert!(VitaPacket::parse(&encoded).is_err());
    }

    #[test]
    fn rejects_short_and_unaligned_buffers() {
        assert!(VitaPacket::parse(&[]).is_err());
        assert!(VitaPacket::parse(&[0x10, 0x00, 0x00]).is_err());
    }

    #[test]
    fn rejects_header_overrunning_datagram() {
        // claims class id + timestamps but is only two words long
        let word0: u32 = (0x1 << 28) | (1 << 27) | (0b01 << 22) | (0b10 << 20) | 2;
        let mut buf = BytesMut::new();
        buf.put_u32(word0);
        buf.put_u32(0xdead_beef);
        assert!(VitaPacket::parse(&buf).is_err());
    }

    #[test]
    fn trailer_is_split_from_payload() {
        let mut packet = VitaPacket::data(
            PacketClass::DaxAudio,
            0x0300_0001,
            3,
            Bytes::from_static(&[9, 9, 9, 9]),
        );
        packet.trailer = Some(0xcafe_f00d);
        let parsed = VitaPacket::parse(&packet.encode()).unwrap();
        assert_eq!(parsed.payload, Bytes::from_static(&[9, 9, 9, 9]));
        assert_eq!(parsed.trailer, Some(0xcafe_f00d));
    }

    #[test]
    fn payload_is_padded_to_word_boundary() {
        let packet = VitaPacket::data(
            PacketClass::Opus,
            0x0400_0001,
            0,
            Bytes::from_static(&[1, 2, 3]),
        );
        let parsed = VitaPacket::parse(&packet.encode()).unwrap();
        assert_eq!(&parsed.payload[..3], &[1, 2, 3]);
        assert_eq!(parsed.payload.len(), 4);
    }

    #[test]
    fn unknown_class_codes_are_preserved() {
        assert_eq!(PacketClass::from_code(0x1234), PacketClass::Unknown(0x1234));
        assert_eq!(PacketClass::Unknown(0x1234).code(), 0x1234);
    }
}
