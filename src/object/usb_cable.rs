use tracing::debug;

use crate::object::Entity;
use crate::util;
use crate::{FlexError, FlexResult};

/// Serial parameters for a CAT cable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatConfig {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: String,
    pub flow_control: String,
}

impl Default for CatConfig {
    fn default() -> Self {
        Self {
            baud: 9_600,
            data_bits: 8,
            stop_bits: 1,
            parity: "none".to_string(),
            flow_control: "none".to_string(),
        }
    }
}

/// Keying/PTT line configuration for a BIT cable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitConfig {
    pub polarity: bool,
    pub source: String,
}

/// The per-variant configuration of a USB cable. Shared attributes live on
/// [`UsbCable`] itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UsbCableVariant {
    Cat(CatConfig),
    Bit(BitConfig),
    /// Band data on four BCD output lines.
    Bcd { bcd_type: String },
    /// LDPA amplifier band select.
    Ldpa { band: String },
    #[default]
    Passthrough,
}

impl UsbCableVariant {
    fn from_wire(s: &str) -> FlexResult<Self> {
        Ok(match s.to_lowercase().as_str() {
            "cat" => Self::Cat(CatConfig::default()),
            "bit" => Self::Bit(BitConfig::default()),
            "bcd" => Self::Bcd {
                bcd_type: String::new(),
            },
            "ldpa" => Self::Ldpa {
                band: String::new(),
            },
            "passthrough" => Self::Passthrough,
            other => {
                return Err(FlexError::Protocol(format!(
                    "unknown usb cable type: {:?}",
                    other
                )))
            }
        })
    }

    fn kind(&self) -> &'static str {
        match *self {
            Self::Cat(_) => "cat",
            Self::Bit(_) => "bit",
            Self::Bcd { .. } => "bcd",
            Self::Ldpa { .. } => "ldpa",
            Self::Passthrough => "passthrough",
        }
    }
}

/// A USB cable plugged into the radio, keyed by its serial number.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsbCable {
    pub serial: String,
    pub name: String,
    pub enabled: bool,
    pub source: String,
    pub variant: UsbCableVariant,
}

impl UsbCable {
    pub(crate) fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for UsbCable {
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
            "type" => {
                // switching variants resets the variant-specific config
                if self.variant.kind() == value.to_lowercase() {
                    return Ok(false);
                }
                self.variant = UsbCableVariant::from_wire(value)?;
                Ok(true)
            }
            "name" => set!(self.name, util::unescape_spaces(value)),
            "enable" | "enabled" => set!(self.enabled, util::parse_bool(value)?),
            "source" => set!(self.source, value.to_string()),
            "baud" => match &mut self.variant {
                UsbCableVariant::Cat(cat) => set!(cat.baud, util::parse_u32(value)?),
                _ => variant_mismatch(self, key),
            },
            "data_bits" => match &mut self.variant {
                UsbCableVariant::Cat(cat) => set!(cat.data_bits, parse_u8(value)?),
                _ => variant_mismatch(self, key),
            },
            "stop_bits" => match &mut self.variant {
                UsbCableVariant::Cat(cat) => set!(cat.stop_bits, parse_u8(value)?),
                _ => variant_mismatch(self, key),
            },
            "parity" => match &mut self.variant {
                UsbCableVariant::Cat(cat) => set!(cat.parity, value.to_lowercase()),
                _ => variant_mismatch(self, key),
            },
            "flow_control" => match &mut self.variant {
                UsbCableVariant::Cat(cat) => set!(cat.flow_control, value.to_lowercase()),
                _ => variant_mismatch(self, key),
            },
            "polarity" => match &mut self.variant {
                UsbCableVariant::Bit(bit) => set!(bit.polarity, util::parse_bool(value)?),
                _ => variant_mismatch(self, key),
            },
            "bit_source" => match &mut self.variant {
                UsbCableVariant::Bit(bit) => set!(bit.source, value.to_string()),
                _ => variant_mismatch(self, key),
            },
            "bcd_type" => match &mut self.variant {
                UsbCableVariant::Bcd { bcd_type } => set!(*bcd_type, value.to_lowercase()),
                _ => variant_mismatch(self, key),
            },
            "band" => match &mut self.variant {
                UsbCableVariant::Ldpa { band } => set!(*band, value.to_string()),
                _ => variant_mismatch(self, key),
            },
            other => {
                debug!(serial = %self.serial, "ignoring unknown usb cable key: {}", other);
                Ok(false)
            }
        }
    }
}

fn variant_mismatch(cable: &UsbCable, key: &str) -> FlexResult<bool> {
    debug!(
        serial = %cable.serial,
        variant = cable.variant.kind(),
        "ignoring key {} for mismatched cable variant", key
    );
    Ok(false)
}

fn parse_u8(v: &str) -> FlexResult<u8> {
    v.parse::<u8>()
        .map_err(|_| FlexError::Protocol(format!("invalid integer: {:?}", v)))
}
