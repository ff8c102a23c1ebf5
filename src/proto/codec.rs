// src/proto/codec.rs
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::catalog::CommandIndex;
use super::command::{Command, Data, Operator};
use super::header::{Header, parity_odd};

/// Wire form of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Ascii,
    Binary,
}

impl Encoding {
    /// Binary frames always start with the BINARY header bit; ASCII never does.
    pub fn detect(bytes: &[u8]) -> Self {
        match bytes.first() {
            Some(b) if b & 0x80 != 0 => Encoding::Binary,
            _ => Encoding::Ascii,
        }
    }
}

/// Fixed part of a binary frame: header, command, 3 address bytes, 2 data bytes.
pub const FRAME_MIN_LEN: usize = 7;
const MAX_WORDS: usize = 0xFFFF;

#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("unknown command name: {0}")]
    UnknownCommand(String),
    #[error("unknown command code: {0:#04x}")]
    UnknownCode(u8),
    #[error("channel {channel} out of range (max {max})")]
    ChannelRange { channel: u16, max: u16 },
    #[error("value {0} is not a 16-bit unsigned integer")]
    ValueRange(f64),
    #[error("list payload requires DATA_EXTENDED")]
    DataShape,
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    #[error("frame has {0} trailing bytes")]
    Trailing(usize),
    #[error("header parity mismatch in byte {0:#04x}")]
    Parity(u8),
    #[error("header {0:#04x} lacks the binary flag")]
    NotBinary(u8),
    #[error("{name} does not support header {header:#04x}")]
    Unsupported { name: &'static str, header: u8 },
    #[error("malformed command text: {0}")]
    BadAscii(String),
}

/* ---------- binary ---------- */

fn wire_word(v: f64) -> Result<u16, EncodeError> {
    if v.is_finite() && v.fract() == 0.0 && (0.0..=65535.0).contains(&v) {
        Ok(v as u16)
    } else {
        Err(EncodeError::ValueRange(v))
    }
}

/// Serialize a command to its binary frame.
pub fn encode_binary(cmd: &Command) -> Result<Vec<u8>, EncodeError> {
    let header = cmd.header();
    let channel = cmd.channel_number().unwrap_or(0);
    let mut out = Vec::with_capacity(FRAME_MIN_LEN);

    out.push(header.wire_byte());
    out.push(cmd.index().code);

    if header.contains(Header::DEVICE_ADDRESSED) {
        let ch = u8::try_from(channel).map_err(|_| EncodeError::ChannelRange {
            channel,
            max: u8::MAX as u16,
        })?;
        out.extend_from_slice(&cmd.device_id().to_be_bytes());
        out.push(ch);
    } else {
        out.push(0x00);
        out.extend_from_slice(&channel.to_be_bytes());
    }

    if header.contains(Header::DATA_EXTENDED) {
        let words: &[f64] = match cmd.data() {
            None => &[],
            Some(Data::Scalar(v)) => std::slice::from_ref(v),
            Some(Data::List(vs)) => vs,
        };
        let n = words.len().min(MAX_WORDS);
        out.extend_from_slice(&(n as u16).to_be_bytes());
        for v in &words[..n] {
            out.extend_from_slice(&wire_word(*v)?.to_be_bytes());
        }
    } else {
        let word = match cmd.data() {
            None => 0,
            Some(Data::Scalar(v)) => wire_word(*v)?,
            Some(Data::List(_)) => return Err(EncodeError::DataShape),
        };
        out.extend_from_slice(&word.to_be_bytes());
    }

    Ok(out)
}

fn be16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

/// Parse a binary frame back into a command.
///
/// Reconstructs header, address and data. A read with a zero data word
/// decodes to a command without data.
pub fn decode_binary(frame: &[u8]) -> Result<Command, EncodeError> {
    if frame.len() < FRAME_MIN_LEN {
        return Err(EncodeError::Truncated(frame.len()));
    }
    let hb = frame[0];
    if parity_odd(hb) != 0 {
        return Err(EncodeError::Parity(hb));
    }
    if hb & Header::BINARY.bits() == 0 {
        return Err(EncodeError::NotBinary(hb));
    }
    let header = Header::from_wire(hb);
    let index = CommandIndex::by_code(frame[1]).ok_or(EncodeError::UnknownCode(frame[1]))?;

    let (device_id, channel) = if header.contains(Header::DEVICE_ADDRESSED) {
        (be16(frame, 2), frame[4] as u16)
    } else {
        (0, be16(frame, 3))
    };

    let data = if header.contains(Header::DATA_EXTENDED) {
        let n = be16(frame, 5) as usize;
        let expected = FRAME_MIN_LEN + 2 * n;
        if frame.len() < expected {
            return Err(EncodeError::Truncated(frame.len()));
        }
        if frame.len() > expected {
            return Err(EncodeError::Trailing(frame.len() - expected));
        }
        let words = (0..n)
            .map(|i| be16(frame, FRAME_MIN_LEN + 2 * i) as f64)
            .collect();
        Some(Data::List(words))
    } else {
        if frame.len() > FRAME_MIN_LEN {
            return Err(EncodeError::Trailing(frame.len() - FRAME_MIN_LEN));
        }
        let word = be16(frame, 5);
        if header.contains(Header::READ) && word == 0 {
            None
        } else {
            Some(Data::Scalar(word as f64))
        }
    };

    Ok(Command::from_parts(index, channel, device_id, header, data))
}

/* ---------- ascii ---------- */

/// Render a command as a newline-terminated ASCII line, e.g. `v3=100\n`.
pub fn format_ascii(cmd: &Command) -> String {
    let mut out = String::new();
    out.push_str(cmd.index().name);
    if cmd.header().contains(Header::ALL_CHANNELS) {
        out.push_str("all");
    } else if let Some(ch) = cmd.channel_number() {
        out.push_str(&ch.to_string());
    }
    out.push(cmd.operator().symbol());
    if let Some(d) = cmd.data() {
        out.push_str(&d.to_string());
    }
    out.make_ascii_lowercase();
    out.push('\n');
    out
}

fn parse_value(s: &str) -> Result<f64, EncodeError> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| EncodeError::BadAscii(format!("bad value '{}'", s)))
}

/// Parse command text such as `v3=100`, `vall?` or `i2=1,2,3`.
pub fn parse_ascii(line: &str) -> Result<Command, EncodeError> {
    let s = line.trim_matches(|c| c == '\r' || c == '\n' || c == ' ');
    if s.is_empty() {
        return Err(EncodeError::BadAscii("empty line".into()));
    }
    let op_at = s
        .find(['?', '='])
        .ok_or_else(|| EncodeError::BadAscii(format!("no operator in '{}'", s)))?;
    let (target, rest) = s.split_at(op_at);
    let op = if rest.starts_with('?') {
        Operator::Get
    } else {
        Operator::Set
    };
    let value = &rest[1..];

    let name_end = target
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(target.len());
    let (word, ch_str) = target.split_at(name_end);

    let (index, all) = match CommandIndex::by_name(word) {
        Some(idx) => (idx, false),
        None => {
            let lower = word.to_ascii_lowercase();
            let base = lower
                .strip_suffix("all")
                .and_then(CommandIndex::by_name)
                .ok_or_else(|| EncodeError::UnknownCommand(word.to_string()))?;
            (base, true)
        }
    };

    let channel = if ch_str.is_empty() {
        None
    } else if all {
        return Err(EncodeError::BadAscii(format!(
            "channel given with 'all' in '{}'",
            s
        )));
    } else {
        Some(
            ch_str
                .parse::<u16>()
                .map_err(|_| EncodeError::BadAscii(format!("bad channel '{}'", ch_str)))?,
        )
    };

    let data = if value.is_empty() {
        None
    } else if value.contains(',') {
        Some(Data::List(
            value.split(',').map(parse_value).collect::<Result<_, _>>()?,
        ))
    } else {
        Some(Data::Scalar(parse_value(value)?))
    };

    if op == Operator::Set && data.is_none() {
        return Err(EncodeError::BadAscii(format!("missing value in '{}'", s)));
    }

    let mut header = Header::empty();
    if all {
        header |= Header::ALL_CHANNELS;
    }
    if op == Operator::Get {
        header |= Header::READ;
    }
    Ok(Command::new(index, channel, 0, header, data))
}

/* ---------- tests ---------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::catalog::cmd;
    use crate::proto::header::HeaderMode;

    #[test]
    fn get_v3_frame() {
        let c = Command::read(cmd::V).channel(3);
        assert_eq!(
            encode_binary(&c).unwrap(),
            vec![0x88, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00]
        );
    }

    #[test]
    fn device_addressed_layout() {
        let c = Command::write(cmd::V, 0x1234u16).channel(7).device(0xABCD);
        let b = encode_binary(&c).unwrap();
        assert_eq!(&b[2..5], &[0xAB, 0xCD, 0x07]);
        assert_eq!(&b[5..7], &[0x12, 0x34]);

        let positional = Command::write(cmd::V, 0x1234u16).channel(7);
        let b = encode_binary(&positional).unwrap();
        assert_eq!(&b[2..5], &[0x00, 0x00, 0x07]);
    }

    #[test]
    fn device_addressed_channel_limit() {
        let c = Command::read(cmd::V).channel(256).device(1);
        assert_eq!(
            encode_binary(&c),
            Err(EncodeError::ChannelRange {
                channel: 256,
                max: 255
            })
        );
    }

    #[test]
    fn extended_data_is_length_prefixed() {
        let c = Command::write(cmd::I, vec![1u16, 5, 90]).channel(2);
        let b = encode_binary(&c).unwrap();
        assert_eq!(b[0] & 0x02, 0x02);
        assert_eq!(&b[5..], &[0, 3, 0, 1, 0, 5, 0, 90]);
    }

    #[test]
    fn extended_count_is_capped() {
        let words = vec![7u16; 70_000];
        let c = Command::write(cmd::V, words);
        let b = encode_binary(&c).unwrap();
        assert_eq!(&b[5..7], &[0xFF, 0xFF]);
        assert_eq!(b.len(), FRAME_MIN_LEN + 2 * 0xFFFF);
    }

    #[test]
    fn non_integral_value_rejected() {
        let c = Command::write(cmd::V, 0.2);
        assert_eq!(encode_binary(&c), Err(EncodeError::ValueRange(0.2)));
        let c = Command::write(cmd::V, 70_000.0);
        assert!(encode_binary(&c).is_err());
    }

    #[test]
    fn decode_reconstructs_fields() {
        let cases = vec![
            Command::read(cmd::V).channel(3),
            Command::read(cmd::V).channel(65535),
            Command::write(cmd::I, 4000u16).channel(12),
            Command::write(cmd::I, vec![0u16, 65535, 42]).channel(1),
            Command::read(cmd::ID).channel(200).device(0xBEEF),
            Command::write(cmd::V, 100u16).all_channels(),
            Command::write(cmd::V, Vec::<u16>::new()),
        ];
        for c in cases {
            let frame = encode_binary(&c).unwrap();
            let d = decode_binary(&frame).unwrap();
            assert_eq!(d.index().code, c.index().code);
            assert_eq!(d.header(), c.header());
            assert_eq!(d.channel_number().unwrap(), c.channel_number().unwrap_or(0));
            assert_eq!(d.device_id(), c.device_id());
            assert_eq!(d.data(), c.data());
            assert_eq!(encode_binary(&d).unwrap(), frame);
        }
    }

    #[test]
    fn decode_rejects_bad_frames() {
        assert_eq!(decode_binary(&[0x88, 0x00]), Err(EncodeError::Truncated(2)));
        assert_eq!(
            decode_binary(&[0x89, 0, 0, 0, 0, 0, 0]),
            Err(EncodeError::Parity(0x89))
        );
        assert_eq!(
            decode_binary(&[0x88, 0xFF, 0, 0, 0, 0, 0]),
            Err(EncodeError::UnknownCode(0xFF))
        );
        // even parity, but no binary flag
        assert_eq!(
            decode_binary(&[0x09, 0, 0, 0, 0, 0, 0]),
            Err(EncodeError::NotBinary(0x09))
        );
        assert_eq!(
            decode_binary(&[0x88, 0, 0, 0, 0, 0, 0, 0]),
            Err(EncodeError::Trailing(1))
        );
        // DEXT (0x82) announcing 2 words but carrying 1
        assert_eq!(
            decode_binary(&[0x82, 0, 0, 0, 0, 0, 2, 0, 1]),
            Err(EncodeError::Truncated(9))
        );
    }

    #[test]
    fn every_declared_mode_validates() {
        for idx in CommandIndex::all() {
            for mode in HeaderMode::ALL {
                let c = Command::from_parts(idx, 0, 0, mode.flags(), None);
                assert_eq!(c.validate(), idx.supports(mode), "{} {}", idx.name, mode.name());
            }
        }
    }

    #[test]
    fn ascii_formatting() {
        assert_eq!(format_ascii(&Command::read(cmd::ID)), "id?\n");
        assert_eq!(format_ascii(&Command::read(cmd::V).channel(3)), "v3?\n");
        assert_eq!(format_ascii(&Command::read(cmd::V).all_channels()), "vall?\n");
        assert_eq!(
            format_ascii(&Command::write(cmd::V, 0.2).channel(1)),
            "v1=0.2\n"
        );
        assert_eq!(
            format_ascii(&Command::write(cmd::I, vec![1u16, 5, 90]).channel(0)),
            "i0=1,5,90\n"
        );
        assert_eq!(format_ascii(&Command::write(cmd::NUP, 0u16)), "nup=0\n");
    }

    #[test]
    fn ascii_parsing() {
        let c = parse_ascii("v3=100\n").unwrap();
        assert_eq!(c.index().name, "V");
        assert_eq!(c.channel_number(), Some(3));
        assert_eq!(c.data(), Some(&Data::Scalar(100.0)));
        assert!(!c.is_read());

        let c = parse_ascii("VALL?").unwrap();
        assert!(c.header().contains(Header::ALL_CHANNELS | Header::READ));
        assert_eq!(format_ascii(&c), "vall?\n");

        let c = parse_ascii("i2=1,2,3").unwrap();
        assert_eq!(c.data(), Some(&Data::List(vec![1.0, 2.0, 3.0])));
        assert!(c.header().contains(Header::DATA_EXTENDED));

        assert!(matches!(
            parse_ascii("bogus?"),
            Err(EncodeError::UnknownCommand(_))
        ));
        assert!(matches!(parse_ascii("v3"), Err(EncodeError::BadAscii(_))));
        assert!(matches!(parse_ascii("v3="), Err(EncodeError::BadAscii(_))));
        assert!(matches!(parse_ascii("v3=x"), Err(EncodeError::BadAscii(_))));
        assert!(matches!(parse_ascii(""), Err(EncodeError::BadAscii(_))));
    }
}
