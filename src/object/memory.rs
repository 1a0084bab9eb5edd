use std::fmt;
use std::str;

use tracing::debug;

use crate::object::{DemodMode, Entity};
use crate::util;
use crate::{FlexError, FlexResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetDirection {
    Down,
    Up,
    #[default]
    Simplex,
}

impl str::FromStr for OffsetDirection {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "down" => Self::Down,
            "up" => Self::Up,
            "simplex" => Self::Simplex,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unknown offset direction: {:?}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for OffsetDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Self::Down => "down",
            Self::Up => "up",
            Self::Simplex => "simplex",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneMode {
    #[default]
    Off,
    CtcssTx,
}

impl str::FromStr for ToneMode {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "off" => Self::Off,
            "ctcss_tx" => Self::CtcssTx,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unknown tone mode: {:?}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for ToneMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", if *self == Self::Off { "off" } else { "ctcss_tx" })
    }
}

/// A stored channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Memory {
    pub index: u32,
    pub name: String,
    pub owner: String,
    pub group: String,
    pub freq_mhz: f64,
    pub mode: DemodMode,
    pub filter_lo_hz: i32,
    pub filter_hi_hz: i32,
    pub repeater_offset_mhz: f64,
    pub offset_direction: OffsetDirection,
    pub tone_mode: ToneMode,
    pub tone_value: f32,
    pub power: u8,
}

impl Memory {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

impl Entity for Memory {
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
            "name" => set!(self.name, util::unescape_spaces(value)),
            "owner" => set!(self.owner, util::unescape_spaces(value)),
            "group" => set!(self.group, util::unescape_spaces(value)),
            "freq" => set!(self.freq_mhz, util::parse_freq_mhz(value)?),
            "mode" => set!(self.mode, value.parse::<DemodMode>()?),
            "filter_lo" | "low" => set!(self.filter_lo_hz, parse_i32(value)?),
            "filter_hi" | "high" => set!(self.filter_hi_hz, parse_i32(value)?),
            "repeater_offset" => set!(self.repeater_offset_mhz, parse_offset(value)?),
            "offset_direction" => {
                set!(self.offset_direction, value.parse::<OffsetDirection>()?)
            }
            "tone_mode" => set!(self.tone_mode, value.parse::<ToneMode>()?),
            "tone_value" => set!(self.tone_value, parse_f32(value)?),
            "power" => set!(self.power, util::parse_level(value)?),
            other => {
                debug!(memory = self.index, "ignoring unknown memory key: {}", other);
                Ok(false)
            }
        }
    }
}

// offsets may legitimately be zero, unlike tuned frequencies
fn parse_offset(v: &str) -> FlexResult<f64> {
    let offset = v
        .parse::<f64>()
        .map_err(|_| FlexError::Protocol(format!("invalid offset: {:?}", v)))?;
    if !offset.is_finite() || offset.abs() > 100.0 {
        return Err(FlexError::Protocol(format!(
            "offset out of range: {}",
            offset
        )));
    }
    Ok(offset)
}

fn parse_f32(v: &str) -> FlexResult<f32> {
    v.parse::<f32>()
        .map_err(|_| FlexError::Protocol(format!("invalid number: {:?}", v)))
}

fn parse_i32(v: &str) -> FlexResult<i32> {
    v.parse::<i32>()
        .map_err(|_| FlexError::Protocol(format!("invalid integer: {:?}", v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn applies_repeater_memory() {
        let mut memory = Memory::new(0);
        assert!(memory.apply("name", "W6CX").unwrap());
        assert!(memory.apply("freq", "147.060000").unwrap());
        assert!(memory.apply("mode", "FM").unwrap());
        assert!(memory.apply("repeater_offset", "0.600000").unwrap());
        assert!(memory.apply("offset_direction", "up").unwrap());
        assert!(memory.apply("tone_mode", "ctcss_tx").unwrap());
        assert!(memory.apply("tone_value", "100.0").unwrap());

        assert_eq!(memory.freq_mhz, 147.06);
        assert_eq!(memory.offset_direction, OffsetDirection::Up);
        assert_eq!(memory.tone_mode, ToneMode::CtcssTx);
        assert_eq!(memory.tone_value, 100.0);
    }

    #[test]
    fn zero_offset_is_valid() {
        let mut memory = Memory::new(0);
        assert!(!memory.apply("repeater_offset", "0.000000").unwrap());
        assert_eq!(memory.repeater_offset_mhz, 0.0);
    }
}
