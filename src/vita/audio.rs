use bytes::{Buf, Bytes};

use crate::{FlexError, FlexResult};

/// One audio frame delivered to the consumer sink.
///
/// PCM payloads are decoded to interleaved stereo samples; Opus payloads
/// are forwarded as received, one encoded packet per VITA frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioFrame {
    Pcm { stream_id: u32, samples: Vec<f32> },
    Opus { stream_id: u32, data: Bytes },
}

impl AudioFrame {
    pub fn stream_id(&self) -> u32 {
        match *self {
            Self::Pcm { stream_id, .. } | Self::Opus { stream_id, .. } => stream_id,
        }
    }
}

/// Decodes a DAX PCM payload: interleaved stereo float32, big-endian.
pub(crate) fn parse_pcm(mut payload: &[u8]) -> FlexResult<Vec<f32>> {
    if payload.len() % 8 != 0 {
        return Err(FlexError::Protocol(format!(
            "PCM payload of {} bytes is not whole stereo float frames",
            payload.len()
        )));
    }

    let mut samples = Vec::with_capacity(payload.len() / 4);
    while payload.has_remaining() {
        samples.push(payload.get_f32());
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_big_endian_stereo() {
        let mut payload = Vec::new();
        for sample in [0.5f32, -0.5, 1.0, 0.0] {
            payload.extend_from_slice(&sample.to_be_bytes());
        }
        assert_eq!(parse_pcm(&payload).unwrap(), vec![0.5, -0.5, 1.0, 0.0]);
    }

    #[test]
    fn rejects_partial_frames() {
        // three floats is a torn stereo frame
        assert!(parse_pcm(&[0u8; 12]).is_err());
    }
}
