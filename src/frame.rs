use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{FlexError, FlexResult};

/// Largest accepted command-channel line. The protocol does not bound line
/// length; the radio is known to emit multi-KiB status lines.
pub const MAX_LINE_LENGTH: usize = 256 * 1024;

/// An outgoing client command: a sequence number paired with the command
/// text. Serialized as `C<seq>|<body>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub seq: u32,
    pub body: String,
}

impl Command {
    /// Creates a command record, rejecting bodies that would break line
    /// framing.
    pub fn new(seq: u32, body: impl Into<String>) -> FlexResult<Self> {
        let body = body.into();
        if body.contains('\n') || body.contains('\r') {
            return Err(FlexError::InvalidCommand(
                "command must not contain line terminators".to_string(),
            ));
        }
        if body.is_empty() {
            return Err(FlexError::InvalidCommand("empty command".to_string()));
        }
        Ok(Self { seq, body })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "C{}|{}", self.seq, self.body)
    }
}

/// Severity of a radio log message, carried in the upper bits of the
/// message number on `M` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
    Fatal,
}

impl MessageLevel {
    fn from_raw(raw: u32) -> Self {
        // severity lives in the top nibble of the message number
        match (raw >> 28) & 0x03 {
            0 => Self::Info,
            1 => Self::Warning,
            2 => Self::Error,
            _ => Self::Fatal,
        }
    }
}

/// A classified command-channel record. The first character of each line
/// selects the record type.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// `C<seq>|<command>` client to radio.
    Command { seq: u32, body: String },
    /// `R<seq>|<hex_status>|<message>` reply to a command.
    Reply { seq: u32, code: u32, message: String },
    /// `S<handle>|<status_body>` asynchronous status update.
    Status { handle: u32, body: String },
    /// `M<hex_num>|<text>` radio log message.
    Message { level: MessageLevel, text: String },
    /// `V<version>` radio software version banner.
    Version(String),
    /// `H<hex_handle>` the handle the radio assigned to this client.
    Handle(u32),
}

impl Line {
    /// Parses a single line (without its terminator).
    pub fn parse(s: &str) -> FlexResult<Line> {
        let mut chars = s.chars();
        let kind = chars
            .next()
            .ok_or_else(|| FlexError::Protocol("empty line".to_string()))?;
        let rest = chars.as_str();

        match kind {
            'C' => {
                let (seq, body) = split_seq(rest)?;
                Ok(Line::Command {
                    seq,
                    body: body.to_string(),
                })
            }
            'R' => {
                // split on the first two separators only, the message may
                // contain pipes
                let mut parts = rest.splitn(3, '|');
                let seq = parse_dec(parts.next().unwrap_or_default(), "reply sequence")?;
                let code = parse_hex(
                    parts
                        .next()
                        .ok_or_else(|| FlexError::Protocol("reply without status".to_string()))?,
                    "reply status",
                )?;
                let message = parts.next().unwrap_or_default().to_string();
                Ok(Line::Reply { seq, code, message })
            }
            'S' => {
                let mut parts = rest.splitn(2, '|');
                let handle = parse_hex(parts.next().unwrap_or_default(), "status handle")?;
                let body = parts
                    .next()
                    .ok_or_else(|| FlexError::Protocol("status without body".to_string()))?;
                Ok(Line::Status {
                    handle,
                    body: body.to_string(),
                })
            }
            'M' => {
                let mut parts = rest.splitn(2, '|');
                let raw = parse_hex(parts.next().unwrap_or_default(), "message number")?;
                let text = parts.next().unwrap_or_default().to_string();
                Ok(Line::Message {
                    level: MessageLevel::from_raw(raw),
                    text,
                })
            }
            'V' => Ok(Line::Version(rest.to_string())),
            'H' => Ok(Line::Handle(parse_hex(rest, "handle")?)),
            other => Err(FlexError::Protocol(format!(
                "unknown line type: {:?}",
                other
            ))),
        }
    }
}

fn split_seq(s: &str) -> FlexResult<(u32, &str)> {
    let mut parts = s.splitn(2, '|');
    let seq = parse_dec(parts.next().unwrap_or_default(), "command sequence")?;
    let body = parts
        .next()
        .ok_or_else(|| FlexError::Protocol("command without body".to_string()))?;
    Ok((seq, body))
}

fn parse_dec(s: &str, what: &str) -> FlexResult<u32> {
    s.parse::<u32>()
        .map_err(|_| FlexError::Protocol(format!("failed to parse {}: {:?}", what, s)))
}

fn parse_hex(s: &str, what: &str) -> FlexResult<u32> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| FlexError::Protocol(format!("failed to parse {}: {:?}", what, s)))
}

/// Codec for the LF-framed command channel.
///
/// Malformed lines are dropped with a counter increment rather than
/// terminating the stream; only an over-long line without a terminator is
/// fatal.
#[derive(Debug, Default)]
pub struct LineCodec {
    dropped_lines: u64,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of inbound lines dropped as malformed.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = FlexError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(FlexError::Protocol(format!(
                        "line exceeds {} bytes without terminator",
                        MAX_LINE_LENGTH
                    )));
                }
                return Ok(None);
            };

            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            // tolerate <CR><LF> framing
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.is_empty() {
                continue;
            }

            let Ok(text) = std::str::from_utf8(&line) else {
                self.dropped_lines += 1;
                warn!("dropping non-UTF-8 line ({} bytes)", line.len());
                continue;
            };

            match Line::parse(text) {
                Ok(parsed) => return Ok(Some(parsed)),
                Err(e) => {
                    self.dropped_lines += 1;
                    warn!("dropping malformed line: {}", e);
                }
            }
        }
    }
}

impl Encoder<&Command> for LineCodec {
    type Error = FlexError;

    fn encode(&mut self, cmd: &Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if cmd.body.contains('\n') || cmd.body.contains('\r') {
            return Err(FlexError::InvalidCommand(
                "command must not contain line terminators".to_string(),
            ));
        }
        dst.reserve(cmd.body.len() + 16);
        dst.put_slice(format!("{}\n", cmd).as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn decode_all(codec: &mut LineCodec, input: &[u8]) -> Vec<Line> {
        let mut src = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(line) = codec.decode(&mut src).unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn reply_success() {
        assert_eq!(
            Line::parse("R17|0|").unwrap(),
            Line::Reply {
                seq: 17,
                code: 0,
                message: String::new()
            }
        );
    }

    #[test]
    fn reply_error_with_message() {
        assert_eq!(
            Line::parse("R18|50000015|slice not found").unwrap(),
            Line::Reply {
                seq: 18,
                code: 0x5000_0015,
                message: "slice not found".to_string()
            }
        );
    }

    #[test]
    fn reply_message_keeps_pipes() {
        assert_eq!(
            Line::parse("R3|0|in_use=1|2|3").unwrap(),
            Line::Reply {
                seq: 3,
                code: 0,
                message: "in_use=1|2|3".to_string()
            }
        );
    }

    #[test]
    fn status_line() {
        assert_eq!(
            Line::parse("S2C87A31|slice 0 rf_frequency=14.250000").unwrap(),
            Line::Status {
                handle: 0x2C87A31,
                body: "slice 0 rf_frequency=14.250000".to_string()
            }
        );
    }

    #[test]
    fn handle_and_version() {
        assert_eq!(Line::parse("H41929a32").unwrap(), Line::Handle(0x41929a32));
        assert_eq!(
            Line::parse("V1.4.0.0").unwrap(),
            Line::Version("1.4.0.0".to_string())
        );
    }

    #[test]
    fn message_levels() {
        match Line::parse("M10000001|client connected").unwrap() {
            Line::Message { level, text } => {
                assert_eq!(level, MessageLevel::Warning);
                assert_eq!(text, "client connected");
            }
            other => panic!("unexpected line: {:?}", other),
        }
        match Line::parse("M0|all good").unwrap() {
            Line::Message { level, .. } => assert_eq!(level, MessageLevel::Info),
            other => panic!("unexpected line: {:?}", other),
        }
        match Line::parse("M20000001|TR relay fault").unwrap() {
            Line::Message { level, .. } => assert_eq!(level, MessageLevel::Error),
            other => panic!("unexpected line: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(Line::parse("Xwhatever").is_err());
        assert!(Line::parse("").is_err());
    }

    #[test]
    fn command_round_trip() {
        let cmd = Command::new(17, "slice tune 0 14.250000").unwrap();

        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&cmd, &mut buf).unwrap();
        assert_eq!(&buf[..], b"C17|slice tune 0 14.250000\n");

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            decoded,
            Line::Command {
                seq: 17,
                body: "slice tune 0 14.250000".to_string()
            }
        );
    }

    #[test]
    fn command_with_line_feed_rejected() {
        assert!(Command::new(1, "slice list\nslice remove 0").is_err());
        assert!(Command::new(2, "").is_err());
    }

    #[test]
    fn decoder_skips_malformed_lines() {
        let mut codec = LineCodec::new();
        let lines = decode_all(&mut codec, b"garbage\nR5|0|\n");
        assert_eq!(
            lines,
            vec![Line::Reply {
                seq: 5,
                code: 0,
                message: String::new()
            }]
        );
        assert_eq!(codec.dropped_lines(), 1);
    }

    #[test]
    fn decoder_handles_crlf_and_partials() {
        let mut codec = LineCodec::new();
        let mut src = BytesMut::from(&b"H1234abcd\r\nV3."[..]);
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Line::Handle(0x1234abcd)));
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(b"2.31\n");
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(Line::Version("3.2.31".to_string()))
        );
    }

    #[test]
    fn oversized_line_is_fatal() {
        let mut codec = LineCodec::new();
        let mut src = BytesMut::from(vec![b'a'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(codec.decode(&mut src).is_err());
    }
}
