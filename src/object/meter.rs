use std::fmt;
use std::str;

use tracing::debug;

use crate::object::Entity;
use crate::{FlexError, FlexResult};

/// Units a meter reports in, with the fixed-point scale the radio uses for
/// raw stream samples of that unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeterUnits {
    Db,
    Dbm,
    Dbfs,
    Swr,
    Volts,
    Amps,
    DegreesC,
    DegreesF,
    Percent,
    #[default]
    None,
}

impl MeterUnits {
    /// Converts a raw stream sample to engineering units.
    pub fn scale(&self, raw: i16) -> f32 {
        let raw = f32::from(raw);
        match *self {
            Self::Db | Self::Dbm | Self::Dbfs | Self::Swr => raw / 128.0,
            Self::Volts | Self::Amps => raw / 256.0,
            Self::DegreesC | Self::DegreesF => raw / 64.0,
            Self::Percent | Self::None => raw,
        }
    }
}

impl str::FromStr for MeterUnits {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "db" => Self::Db,
            "dbm" => Self::Dbm,
            "dbfs" => Self::Dbfs,
            "swr" => Self::Swr,
            "volts" => Self::Volts,
            "amps" => Self::Amps,
            "degc" => Self::DegreesC,
            "degf" => Self::DegreesF,
            "percent" => Self::Percent,
            "" | "none" => Self::None,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unknown meter units: {:?}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for MeterUnits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Self::Db => "db",
            Self::Dbm => "dbm",
            Self::Dbfs => "dbfs",
            Self::Swr => "swr",
            Self::Volts => "volts",
            Self::Amps => "amps",
            Self::DegreesC => "degc",
            Self::DegreesF => "degf",
            Self::Percent => "percent",
            Self::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// A named measurement source. The definition arrives over status; samples
/// arrive on the meter stream and update `value`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Meter {
    pub index: u16,
    pub name: String,
    pub units: MeterUnits,
    pub low: f32,
    pub high: f32,
    pub fps: u32,
    pub source: String,
    /// Latest decoded sample in engineering units.
    pub value: f32,
}

impl Meter {
    pub(crate) fn new(index: u16) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

impl Entity for Meter {
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
            "nam" | "name" => set!(self.name, value.to_string()),
            "unit" | "units" => set!(self.units, value.parse::<MeterUnits>()?),
            "lo" | "low" => set!(self.low, parse_f32(value)?),
            "hi" | "high" => set!(self.high, parse_f32(value)?),
            "fps" => set!(self.fps, crate::util::parse_u32(value)?),
            "src" | "source" => set!(self.source, value.to_string()),
            other => {
                debug!(meter = self.index, "ignoring unknown meter key: {}", other);
                Ok(false)
            }
        }
    }
}

fn parse_f32(v: &str) -> FlexResult<f32> {
    v.parse::<f32>()
        .map_err(|_| FlexError::Protocol(format!("invalid number: {:?}", v)))
}
