use crate::{FlexError, FlexResult};

/// Code point substituted for literal spaces inside wire values.
pub(crate) const SPACE_SUBSTITUTE: char = '\u{7f}';

/// Reverses the U+007F space substitution applied to transported values.
pub(crate) fn unescape_spaces(s: &str) -> String {
    s.replace(SPACE_SUBSTITUTE, " ")
}

/// Applies the U+007F space substitution for values sent to the radio.
pub(crate) fn escape_spaces(s: &str) -> String {
    s.replace(' ', &SPACE_SUBSTITUTE.to_string())
}

/// Wire booleans are exactly `0` or `1`.
pub(crate) fn parse_bool(v: &str) -> FlexResult<bool> {
    match v {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(FlexError::Protocol(format!(
            "invalid boolean: {:?}",
            other
        ))),
    }
}

/// Frequencies travel as decimal MHz with up to six fractional digits.
/// Out-of-range values are rejected rather than clamped.
pub(crate) fn parse_freq_mhz(v: &str) -> FlexResult<f64> {
    let freq = v
        .parse::<f64>()
        .map_err(|_| FlexError::Protocol(format!("invalid frequency: {:?}", v)))?;
    if !freq.is_finite() || freq <= 0.0 || freq > 3_000.0 {
        return Err(FlexError::Protocol(format!(
            "frequency out of range: {}",
            freq
        )));
    }
    Ok(freq)
}

/// Gain-like levels clamp into 0..=100.
pub(crate) fn parse_level(v: &str) -> FlexResult<u8> {
    let level = v
        .parse::<i64>()
        .map_err(|_| FlexError::Protocol(format!("invalid level: {:?}", v)))?;
    Ok(level.clamp(0, 100) as u8)
}

/// Integers appear decimal or `0x`-prefixed hexadecimal.
pub(crate) fn parse_u32(v: &str) -> FlexResult<u32> {
    let parsed = if let Some(hex) = v.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        v.parse::<u32>()
    };
    parsed.map_err(|_| FlexError::Protocol(format!("invalid integer: {:?}", v)))
}

/// Formats a frequency for the wire: decimal MHz, six fractional digits.
pub(crate) fn format_freq_mhz(freq: f64) -> String {
    format!("{:.6}", freq)
}
