use std::time::Instant;

use bytes::Buf;

use crate::{FlexError, FlexResult};

/// One decoded meter reading in engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterSample {
    pub index: u16,
    pub value: f32,
    pub timestamp: Instant,
}

/// Splits a meter payload into its `(index, raw)` pairs. Scaling to
/// engineering units needs the meter definition and happens at dispatch.
pub(crate) fn parse_pairs(mut payload: &[u8]) -> FlexResult<Vec<(u16, i16)>> {
    if payload.len() % 4 != 0 {
        return Err(FlexError::Protocol(format!(
            "meter payload of {} bytes is not a whole number of pairs",
            payload.len()
        )));
    }

    let mut pairs = Vec::with_capacity(payload.len() / 4);
    while payload.has_remaining() {
        let index = payload.get_u16();
        let raw = payload.get_i16();
        pairs.push((index, raw));
    }
    Ok(pairs)
}

#[cfg(test)]
pub(crate) fn encode_pairs(pairs: &[(u16, i16)]) -> bytes::Bytes {
    use bytes::BufMut;

    let mut buf = bytes::BytesMut::with_capacity(pairs.len() * 4);
    for (index, raw) in pairs {
        buf.put_u16(*index);
        buf.put_i16(*raw);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn parses_pair_sequence() {
        let payload = encode_pairs(&[(1, -12800), (5, 512), (7, 0)]);
        assert_eq!(
            parse_pairs(&payload).unwrap(),
            vec![(1, -12800), (5, 512), (7, 0)]
        );
    }

    #[test]
    fn rejects_ragged_payload() {
        assert!(parse_pairs(&[0, 1, 2]).is_err());
    }

    #[test]
    fn empty_payload_is_empty() {
        assert_eq!(parse_pairs(&[]).unwrap(), vec![]);
    }
}
