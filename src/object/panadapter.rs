use tracing::debug;

use crate::object::Entity;
use crate::util;
use crate::{FlexError, FlexResult};

/// A spectrum display data source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Panadapter {
    pub stream_id: u32,
    /// Center frequency, MHz.
    pub center_mhz: f64,
    /// Displayed bandwidth, MHz.
    pub bandwidth_mhz: f64,
    pub min_dbm: f32,
    pub max_dbm: f32,
    /// Frames per second of FFT data.
    pub fps: u32,
    pub average: u8,
    pub x_pixels: u32,
    pub y_pixels: u32,
    pub rx_ant: String,
    pub wide: bool,
    pub band: String,
}

impl Panadapter {
    pub(crate) fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            min_dbm: -130.0,
            max_dbm: -50.0,
            ..Self::default()
        }
    }
}

impl Entity for Panadapter {
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
            "center" => set!(self.center_mhz, util::parse_freq_mhz(value)?),
            "bandwidth" => set!(self.bandwidth_mhz, util::parse_freq_mhz(value)?),
            "min_dbm" => set!(self.min_dbm, parse_f32(value)?),
            "max_dbm" => set!(self.max_dbm, parse_f32(value)?),
            "fps" => set!(self.fps, util::parse_u32(value)?),
            "average" => set!(self.average, util::parse_level(value)?),
            "x_pixels" => set!(self.x_pixels, util::parse_u32(value)?),
            "y_pixels" => set!(self.y_pixels, util::parse_u32(value)?),
            "rxant" => set!(self.rx_ant, value.to_string()),
            "wide" => set!(self.wide, util::parse_bool(value)?),
            "band" => set!(self.band, value.to_string()),
            other => {
                debug!(stream_id = self.stream_id, "ignoring unknown panadapter key: {}", other);
                Ok(false)
            }
        }
    }
}

fn parse_f32(v: &str) -> FlexResult<f32> {
    v.parse::<f32>()
        .map_err(|_| FlexError::Protocol(format!("invalid number: {:?}", v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn applies_display_parameters() {
        let mut pan = Panadapter::new(0x4000_0001);
        assert!(pan.apply("center", "14.100000").unwrap());
        assert!(pan.apply("bandwidth", "0.200000").unwrap());
        assert!(pan.apply("min_dbm", "-125.5").unwrap());
        assert!(pan.apply("fps", "25").unwrap());
        assert!(pan.apply("wide", "0").unwrap());

        assert_eq!(pan.center_mhz, 14.1);
        assert_eq!(pan.bandwidth_mhz, 0.2);
        assert_eq!(pan.min_dbm, -125.5);
        assert_eq!(pan.fps, 25);
        assert!(!pan.wide);
    }

    #[test]
    fn averaging_clamps_as_level() {
        let mut pan = Panadapter::new(1);
        assert!(pan.apply("average", "400").unwrap());
        assert_eq!(pan.average, 100);
    }
}
