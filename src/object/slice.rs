use std::fmt;
use std::str;

use tracing::debug;

use crate::object::Entity;
use crate::util;
use crate::{FlexError, FlexResult};

/// Demodulation modes a slice can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemodMode {
    #[default]
    Usb,
    Lsb,
    Cw,
    Am,
    Sam,
    Fm,
    Nfm,
    Dfm,
    Digu,
    Digl,
    Rtty,
}

impl DemodMode {
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Usb => "USB",
            Self::Lsb => "LSB",
            Self::Cw => "CW",
            Self::Am => "AM",
            Self::Sam => "SAM",
            Self::Fm => "FM",
            Self::Nfm => "NFM",
            Self::Dfm => "DFM",
            Self::Digu => "DIGU",
            Self::Digl => "DIGL",
            Self::Rtty => "RTTY",
        }
    }
}

impl str::FromStr for DemodMode {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "USB" => Self::Usb,
            "LSB" => Self::Lsb,
            "CW" => Self::Cw,
            "AM" => Self::Am,
            "SAM" => Self::Sam,
            "FM" => Self::Fm,
            "NFM" => Self::Nfm,
            "DFM" => Self::Dfm,
            "DIGU" => Self::Digu,
            "DIGL" => Self::Digl,
            "RTTY" => Self::Rtty,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unknown demod mode: {:?}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for DemodMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// AGC behavior of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgcMode {
    Off,
    Slow,
    #[default]
    Med,
    Fast,
}

impl str::FromStr for AgcMode {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "off" => Self::Off,
            "slow" => Self::Slow,
            "med" => Self::Med,
            "fast" => Self::Fast,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unknown agc mode: {:?}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for AgcMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Self::Off => "off",
            Self::Slow => "slow",
            Self::Med => "med",
            Self::Fast => "fast",
        };
        write!(f, "{}", s)
    }
}

/// A logical receiver/transmitter channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Slice {
    pub index: u32,
    /// Tuned frequency, MHz.
    pub freq_mhz: f64,
    pub mode: DemodMode,
    pub filter_lo_hz: i32,
    pub filter_hi_hz: i32,
    pub rx_ant: String,
    pub tx_ant: String,
    pub agc_mode: AgcMode,
    pub agc_threshold: u8,
    pub audio_gain: u8,
    pub audio_pan: u8,
    pub mute: bool,
    pub active: bool,
    pub tx: bool,
    /// Stream id of the panadapter this slice is displayed on. The
    /// panadapter may materialize before or after the slice does.
    pub pan: u32,
    /// Handle of the client that owns the slice.
    pub client_handle: u32,
    pub nb_enabled: bool,
    pub nb_level: u8,
    pub nr_enabled: bool,
    pub nr_level: u8,
    pub anf_enabled: bool,
    pub anf_level: u8,
    pub apf_enabled: bool,
    pub apf_level: u8,
}

impl Slice {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

impl Entity for Slice {
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
            "rf_frequency" => set!(self.freq_mhz, util::parse_freq_mhz(value)?),
            "mode" => set!(self.mode, value.parse::<DemodMode>()?),
            "filter_lo" => set!(self.filter_lo_hz, parse_i32(value)?),
            "filter_hi" => set!(self.filter_hi_hz, parse_i32(value)?),
            "rxant" => set!(self.rx_ant, value.to_string()),
            "txant" => set!(self.tx_ant, value.to_string()),
            "agc_mode" => set!(self.agc_mode, value.parse::<AgcMode>()?),
            "agc_threshold" => set!(self.agc_threshold, util::parse_level(value)?),
            "audio_gain" => set!(self.audio_gain, util::parse_level(value)?),
            "audio_pan" => set!(self.audio_pan, util::parse_level(value)?),
            "mute" => set!(self.mute, util::parse_bool(value)?),
            "active" => set!(self.active, util::parse_bool(value)?),
            "tx" => set!(self.tx, util::parse_bool(value)?),
            "pan" => set!(self.pan, util::parse_u32(value)?),
            "client_handle" => set!(self.client_handle, util::parse_u32(value)?),
            "nb" => set!(self.nb_enabled, util::parse_bool(value)?),
            "nb_level" => set!(self.nb_level, util::parse_level(value)?),
            "nr" => set!(self.nr_enabled, util::parse_bool(value)?),
            "nr_level" => set!(self.nr_level, util::parse_level(value)?),
            "anf" => set!(self.anf_enabled, util::parse_bool(value)?),
            "anf_level" => set!(self.anf_level, util::parse_level(value)?),
            "apf" => set!(self.apf_enabled, util::parse_bool(value)?),
            "apf_level" => set!(self.apf_level, util::parse_level(value)?),
            other => {
                debug!(slice = self.index, "ignoring unknown slice key: {}", other);
                Ok(false)
            }
        }
    }
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
    fn applies_typical_status_keys() {
        let mut slice = Slice::new(0);
        assert!(slice.apply("rf_frequency", "14.250000").unwrap());
        assert!(slice.apply("mode", "USB").unwrap());
        assert!(slice.apply("filter_lo", "100").unwrap());
        assert!(slice.apply("filter_hi", "2800").unwrap());
        assert!(slice.apply("pan", "0x40000001").unwrap());
        assert!(slice.apply("mute", "1").unwrap());

        assert_eq!(slice.freq_mhz, 14.25);
        assert_eq!(slice.mode, DemodMode::Usb);
        assert_eq!(slice.filter_lo_hz, 100);
        assert_eq!(slice.filter_hi_hz, 2800);
        assert_eq!(slice.pan, 0x4000_0001);
        assert!(slice.mute);
    }

    #[test]
    fn reapplying_same_value_reports_unchanged() {
        let mut slice = Slice::new(0);
        assert!(slice.apply("audio_gain", "40").unwrap());
        assert!(!slice.apply("audio_gain", "40").unwrap());
    }

    #[test]
    fn levels_clamp_frequencies_reject() {
        let mut slice = Slice::new(0);
        assert!(slice.apply("agc_threshold", "180").unwrap());
        assert_eq!(slice.agc_threshold, 100);
        assert!(slice.apply("rf_frequency", "-7.0").is_err());
        assert_eq!(slice.freq_mhz, 0.0);
    }

    #[test]
    fn unknown_key_is_ignored() {
        let mut slice = Slice::new(0);
        assert!(!slice.apply("fancy_new_knob", "7").unwrap());
    }

    #[test]
    fn booleans_are_strict() {
        let mut slice = Slice::new(0);
        assert!(slice.apply("tx", "maybe").is_err());
    }

    #[test]
    fn demod_mode_round_trips() {
        for mode in ["USB", "LSB", "CW", "DIGU", "RTTY"] {
            assert_eq!(mode.parse::<DemodMode>().unwrap().to_string(), mode);
        }
        assert!("PSK31".parse::<DemodMode>().is_err());
    }
}
