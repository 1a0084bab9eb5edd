use std::fmt;
use std::str;

use tracing::debug;

use crate::object::Entity;
use crate::util;
use crate::{FlexError, FlexResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioDirection {
    #[default]
    Rx,
    Tx,
}

impl str::FromStr for AudioDirection {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "rx" => Self::Rx,
            "tx" => Self::Tx,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unknown stream direction: {:?}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for AudioDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", if *self == Self::Rx { "rx" } else { "tx" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioCodec {
    #[default]
    Pcm,
    Opus,
}

impl str::FromStr for AudioCodec {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "pcm" => Self::Pcm,
            "opus" => Self::Opus,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unknown audio codec: {:?}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", if *self == Self::Pcm { "pcm" } else { "opus" })
    }
}

/// A DAX audio stream endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioStream {
    pub stream_id: u32,
    pub direction: AudioDirection,
    pub codec: AudioCodec,
    pub dax_channel: u8,
    pub gain: u8,
    pub mute: bool,
    pub sample_rate: u32,
    pub client_handle: u32,
}

impl AudioStream {
    pub(crate) fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            sample_rate: 24_000,
            ..Self::default()
        }
    }
}

impl Entity for AudioStream {
    fn apply(&mut self, key: &str, value: &str) -> FlexResult<bool> {
        macro_rules! set {
            ($field:expr, $parsed:expr) => {{
                let parsed = $parsed;
                let changed = $field != parsed;
                $field = parsed;
                Ok(changed)
            }};
        }

        match key {
            "type" | "direction" => set!(self.direction, value.parse::<AudioDirection>()?),
            "codec" => set!(self.codec, value.parse::<AudioCodec>()?),
            "dax" | "dax_channel" => set!(self.dax_channel, parse_u8(value)?),
            "gain" => set!(self.gain, util::parse_level(value)?),
            "mute" => set!(self.mute, util::parse_bool(value)?),
            "sample_rate" => set!(self.sample_rate, util::parse_u32(value)?),
            "client_handle" => set!(self.client_handle, util::parse_u32(value)?),
            other => {
                debug!(stream_id = self.stream_id, "ignoring unknown audio stream key: {}", other);
                Ok(false)
            }
        }
    }
}

fn parse_u8(v: &str) -> FlexResult<u8> {
    v.parse::<u8>()
        .map_err(|_| FlexError::Protocol(format!("invalid integer: {:?}", v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn applies_stream_keys() {
        let mut stream = AudioStream::new(0x0300_0001);
        assert!(stream.apply("type", "rx").unwrap());
        assert!(stream.apply("codec", "opus").unwrap());
        assert!(stream.apply("dax", "2").unwrap());
        assert!(stream.apply("gain", "75").unwrap());
        assert!(stream.apply("client_handle", "0x2c87a31").unwrap());

        assert_eq!(stream.direction, AudioDirection::Rx);
        assert_eq!(stream.codec, AudioCodec::Opus);
        assert_eq!(stream.dax_channel, 2);
        assert_eq!(stream.gain, 75);
        assert_eq!(stream.client_handle, 0x2c8_7a31);
    }

    #[test]
    fn bad_codec_is_rejected() {
        let mut stream = AudioStream::new(1);
        assert!(stream.apply("codec", "mp3").is_err());
        assert_eq!(stream.codec, AudioCodec::Pcm);
    }
}
