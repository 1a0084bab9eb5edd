use std::time::Instant;

use bytes::Buf;

use crate::vita::{FrameAssembler, VitaPacket};
use crate::{FlexError, FlexResult};

/// Descriptor prefix carried by every FFT payload, ahead of the dB bins.
const DESCRIPTOR_LEN: usize = 20;

/// A complete spectrum frame for one panadapter.
#[derive(Debug, Clone, PartialEq)]
pub struct FftFrame {
    pub stream_id: u32,
    /// Capture timestamp shared by all fragments of the frame.
    pub timestamp: u32,
    /// Frequency of the first bin, MHz.
    pub low_freq_mhz: f32,
    /// Width of one bin, Hz.
    pub bin_bandwidth_hz: f32,
    /// Signal level per bin, dB.
    pub bins: Vec<i16>,
}

#[derive(Debug)]
struct FftFragment {
    start_bin: usize,
    total_bins: usize,
    low_freq_mhz: f32,
    bin_bandwidth_hz: f32,
    timestamp: u32,
    bins: Vec<i16>,
}

impl FftFragment {
    /// Parses one payload. Descriptor fields are big-endian; the dB samples
    /// follow the little-endian flex convention.
    fn parse(mut payload: &[u8]) -> FlexResult<Self> {
        if payload.len() < DESCRIPTOR_LEN {
            return Err(FlexError::Protocol(format!(
                "FFT payload of {} bytes is shorter than its descriptor",
                payload.len()
            )));
        }

        let start_bin = payload.get_u16() as usize;
        let total_bins = payload.get_u16() as usize;
        let packet_bins = payload.get_u16() as usize;
        let _reserved = payload.get_u16();
        let low_freq_mhz = payload.get_f32();
        let bin_bandwidth_hz = payload.get_f32();
        let timestamp = payload.get_u32();

        if payload.remaining() < packet_bins * 2 {
            return Err(FlexError::Protocol(format!(
                "FFT payload truncated: {} bins advertised, {} bytes left",
                packet_bins,
                payload.remaining()
            )));
        }

        let mut bins = Vec::with_capacity(packet_bins);
        for _ in 0..packet_bins {
            bins.push(payload.get_i16_le());
        }

        Ok(Self {
            start_bin,
            total_bins,
            low_freq_mhz,
            bin_bandwidth_hz,
            timestamp,
            bins,
        })
    }
}

/// Turns FFT packets into complete frames, reassembling fragments.
#[derive(Debug, Default)]
pub(crate) struct FftDecoder {
    assembler: FrameAssembler<i16>,
}

impl FftDecoder {
    pub fn decode(&mut self, packet: &VitaPacket, now: Instant) -> FlexResult<Option<FftFrame>> {
        let stream_id = packet
            .stream_id
            .ok_or_else(|| FlexError::Protocol("FFT packet without stream id".to_string()))?;
        let fragment = FftFragment::parse(&packet.payload)?;

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

        Ok(Some(FftFrame {
            stream_id,
            timestamp: fragment.timestamp,
            low_freq_mhz: fragment.low_freq_mhz,
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
    bins: &[i16],
) -> bytes::Bytes {
    use bytes::BufMut;

    let mut buf = bytes::BytesMut::with_capacity(DESCRIPTOR_LEN + bins.len() * 2);
    buf.put_u16(start_bin);
    buf.put_u16(total_bins);
    buf.put_u16(bins.len() as u16);
    buf.put_u16(0);
    buf.put_f32(14.0);
    buf.put_f32(5.9);
    buf.put_u32(timestamp);
    for bin in bins {
        buf.put_i16_le(*bin);
    }
    buf.freeze()
}
