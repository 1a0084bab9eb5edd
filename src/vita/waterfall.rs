use std::time::Instant;

use bytes::Buf;

use crate::vita::{FrameAssembler, VitaPacket};
use crate::{FlexError, FlexResult};

const DESCRIPTOR_LEN: usize = 28;

/// One reassembled waterfall line.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallFrame {
    pub stream_id: u32,
    pub timestamp: u32,
    /// Height of this tile in display lines.
    pub line_height: u16,
    /// Time one line spans, milliseconds.
    pub line_duration_ms: u32,
    /// Intensity the radio considers the noise floor.
    pub black_level: u16,
    /// Whether the radio is tracking the black level automatically.
    pub auto_black: bool,
    /// Frequency of the first bin, MHz.
    pub first_bin_freq_mhz: f32,
    /// Width of one bin, Hz.
    pub bin_bandwidth_hz: f32,
    /// Intensity per bin.
    pub bins: Vec<u16>,
}

#[derive(Debug)]
struct WaterfallFragment {
    start_bin: usize,
    total_bins: usize,
    line_height: u16,
    line_duration_ms: u32,
    black_level: u16,
    auto_black: bool,
    first_bin_freq_mhz: f32,
    bin_bandwidth_hz: f32,
    timestamp: u32,
    bins: Vec<u16>,
}

impl WaterfallFragment {
    fn parse(mut payload: &[u8]) -> FlexResult<Self> {
        if payload.len() < DESCRIPTOR_LEN {
            return Err(FlexError::Protocol(format!(
                "waterfall payload of {} bytes is shorter than its descriptor",
                payload.len()
            )));
        }

        let start_bin = payload.get_u16() as usize;
        let total_bins = payload.get_u16() as usize;
        let packet_bins = payload.get_u16() as usize;
        let line_height = payload.get_u16();
        let timestamp = payload.get_u32();
        let line_duration_ms = payload.get_u32();
        let black_level = payload.get_u16();
        let auto_black = payload.get_u16() != 0;
        let first_bin_freq_mhz = payload.get_f32();
        let bin_bandwidth_hz = payload.get_f32();

        if payload.remaining() < packet_bins * 2 {
            return Err(FlexError::Protocol(format!(
                "waterfall payload truncated: {} bins advertised, {} bytes left",
                packet_bins,
                payload.remaining()
            )));
        }

        let mut bins = Vec::with_capacity(packet_bins);
        for _ in 0..packet_bins {
            bins.push(payload.get_u16_le());
        }

        Ok(Self {
            start_bin,
            total_bins,
            line_height,
            line_duration_ms,
            black_level,
            auto_black,
            first_bin_freq_mhz,
            bin_bandwidth_hz,
            timestamp,
            bins,
        })
    }
}

/// Turns waterfall packets into complete tiles, reassembling fragments.
#[derive(Debug, Default)]
pub(crate) struct WaterfallDecoder {
    assembler: FrameAssembler<u16>,
}

impl WaterfallDecoder {
    pub fn decode(
        &mut self,
        packet: &VitaPacket,
        now: Instant,
    ) -> FlexResult<Option<WaterfallFrame>> {
        let stream_id = packet.stream_id.ok_or_else(|| {
            FlexError::Protocol("waterfall packet without stream id".to_string())
        })?;
        let fragment = WaterfallFragment::parse(&packet.payload)?;

        let Some(bins) = self.assembler.push(
            stream_id,
            fragment.timestamp,
            fragment.start_bin,
            fragment.total_bins,
            fragment.bins,
            now,
        ) else {
            return Ok(None);
        };

        Ok(Some(WaterfallFrame {
            stream_id,
            timestamp: fragment.timestamp,
            line_height: fragment.line_height,
            line_duration_ms: fragment.line_duration_ms,
            black_level: fragment.black_level,
            auto_black: fragment.auto_black,
            first_bin_freq_mhz: fragment.first_bin_freq_mhz,
            bin_bandwidth_hz: fragment.bin_bandwidth_hz,
            bins,
        }))
    }

    pub fn sweep(&mut self, now: Instant) {
        self.assembler.sweep(now);
    }
}

#[cfg(test)]
pub(crate) fn encode_fragment(
    start_bin: u16,
    total_bins: u16,
    timestamp: u32,
    bins: &[u16],
) -> bytes::Bytes {
    use bytes::BufMut;

    let mut buf = bytes::BytesMut::with_capacity(DESCRIPTOR_LEN + bins.len() * 2);
    buf.put_u16(start_bin);
    buf.put_u16(total_bins);
    buf.put_u16(bins.len() as u16);
    buf.put_u16(2);
    buf.put_u32(timestamp);
    buf.put_u32(100);
    buf.put_u16(1200);
    buf.put_u16(1);
    buf.put_f32(14.0);
    buf.put_f32(5.9);
    for bin in bins {
        buf.put_u16_le(*bin);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::vita::PacketClass;

    use pretty_assertions::assert_eq;

    #[test]
    fn reassembles_split_tile() {
        let mut decoder = WaterfallDecoder::default();
        let now = Instant::now();

        let a = VitaPacket::data(
            PacketClass::Waterfall,
            4,
            0,
            encode_fragment(0, 64, 5, &vec![10u16; 32]),
        );
        let b = VitaPacket::data(
            PacketClass::Waterfall,
            4,
            1,
            encode_fragment(32, 64, 5, &vec![20u16; 32]),
        );

        assert_eq!(decoder.decode(&a, now).unwrap(), None);
        let tile = decoder.decode(&b, now).unwrap().unwrap();
        assert_eq!(tile.bins.len(), 64);
        assert_eq!(tile.line_duration_ms, 100);
        assert_eq!(tile.black_level, 1200);
        assert!(tile.auto_black);
        assert_eq!(tile.line_height, 2);
    }

    #[test]
    fn truncated_descriptor_is_rejected() {
        let mut decoder = WaterfallDecoder::default();
        let packet = VitaPacket::data(
            PacketClass::Waterfall,
            4,
            0,
            bytes::Bytes::from_static(&[0u8; 16]),
        );
        assert!(decoder.decode(&packet, Instant::now()).is_err());
    }
}
