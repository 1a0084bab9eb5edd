use tracing::debug;

use crate::object::Entity;
use crate::util;
use crate::FlexResult;

/// A time-indexed spectrogram tile stream, paired with a panadapter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Waterfall {
    pub stream_id: u32,
    /// Time one waterfall line spans, milliseconds.
    pub line_duration_ms: u32,
    pub black_level: u8,
    pub auto_black: bool,
    pub color_gain: u8,
    pub gradient_index: u32,
    /// Stream id of the panadapter this waterfall is paired with.
    pub pan: u32,
    pub x_pixels: u32,
}

impl Waterfall {
    pub(crate) fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            ..Self::default()
        }
    }
}

impl Entity for Waterfall {
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
            "line_duration" => set!(self.line_duration_ms, util::parse_u32(value)?),
            "black_level" => set!(self.black_level, util::parse_level(value)?),
            "auto_black" => set!(self.auto_black, util::parse_bool(value)?),
            "color_gain" => set!(self.color_gain, util::parse_level(value)?),
            "gradient_index" => set!(self.gradient_index, util::parse_u32(value)?),
            "panadapter" => set!(self.pan, util::parse_u32(value)?),
            "x_pixels" => set!(self.x_pixels, util::parse_u32(value)?),
            other => {
                debug!(stream_id = self.stream_id, "ignoring unknown waterfall key: {}", other);
                Ok(false)
            }
        }
    }
}
