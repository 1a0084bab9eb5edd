use crate::util;
use crate::{FlexError, FlexResult};

/// Parses a discovery beacon payload: UTF-8 `key=value` tokens separated by
/// whitespace. Values carry the U+007F space substitution.
pub(crate) fn parse_discovery_payload(payload: &[u8]) -> FlexResult<Vec<(String, String)>> {
    // beacons are zero padded up to the word boundary
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    let text = std::str::from_utf8(&payload[..end])
        .map_err(|_| FlexError::Protocol("discovery payload is not UTF-8".to_string()))?;

    let mut fields = Vec::new();
    for token in text.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        fields.push((key.to_string(), util::unescape_spaces(value)));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn parses_beacon_fields() {
        let payload = b"model=FLEX-6600 serial=0123-4567 ip=10.0.0.5 port=4992\0\0";
        let fields = parse_discovery_payload(payload).unwrap();
        assert_eq!(
            fields,
            vec![
                ("model".to_string(), "FLEX-6600".to_string()),
                ("serial".to_string(), "0123-4567".to_string()),
                ("ip".to_string(), "10.0.0.5".to_string()),
                ("port".to_string(), "4992".to_string()),
            ]
        );
    }

    #[test]
    fn unescapes_substituted_spaces() {
        let payload = "nickname=Shack\u{7f}Radio".as_bytes();
        let fields = parse_discovery_payload(payload).unwrap();
        assert_eq!(fields[0].1, "Shack Radio");
    }

    #[test]
    fn tokens_without_separator_are_skipped() {
        let fields = parse_discovery_payload(b"garbage serial=1 more").unwrap();
        assert_eq!(fields, vec![("serial".to_string(), "1".to_string())]);
    }

    #[test]
    fn non_utf8_is_rejected() {
        assert!(parse_discovery_payload(&[0xff, 0xfe, b'=', b'x']).is_err());
    }
}
