use std::fmt;

use super::catalog::CommandIndex;
use super::header::{Header, HeaderMode};

/// Payload carried by a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Scalar(f64),
    List(Vec<f64>),
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Scalar(v)
    }
}

impl From<u16> for Data {
    fn from(v: u16) -> Self {
        Data::Scalar(v as f64)
    }
}

impl From<Vec<f64>> for Data {
    fn from(v: Vec<f64>) -> Self {
        Data::List(v)
    }
}

impl From<Vec<u16>> for Data {
    fn from(v: Vec<u16>) -> Self {
        Data::List(v.into_iter().map(f64::from).collect())
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Scalar(v) => write!(f, "{}", v),
            Data::List(vs) => {
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
        }
    }
}

/// Read (`?`) or write (`=`) direction of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Get,
    Set,
}

impl Operator {
    pub fn symbol(self) -> char {
        match self {
            Operator::Get => '?',
            Operator::Set => '=',
        }
    }
}

/// One request to a module.
///
/// Built with [`Command::read`] or [`Command::write`] and refined with the
/// builder methods. The header is normalised on every change: `BINARY` is
/// always set, `READ` is set when there is no data, and `DATA_EXTENDED` is set
/// for list payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    index: &'static CommandIndex,
    channel: Option<u16>,
    device_id: u16,
    header: Header,
    data: Option<Data>,
}

impl Command {
    pub fn new(
        index: &'static CommandIndex,
        channel: Option<u16>,
        device_id: u16,
        header: Header,
        data: Option<Data>,
    ) -> Self {
        let mut cmd = Self {
            index,
            channel,
            device_id,
            header,
            data,
        };
        cmd.normalize();
        cmd
    }

    pub fn read(index: &'static CommandIndex) -> Self {
        Self::new(index, None, 0, Header::empty(), None)
    }

    pub fn write(index: &'static CommandIndex, data: impl Into<Data>) -> Self {
        Self::new(index, None, 0, Header::empty(), Some(data.into()))
    }

    /// Construct with an exact header, skipping inference. Used when decoding
    /// frames whose flags are already known.
    pub(crate) fn from_parts(
        index: &'static CommandIndex,
        channel: u16,
        device_id: u16,
        header: Header,
        data: Option<Data>,
    ) -> Self {
        Self {
            index,
            channel: Some(channel),
            device_id,
            header: (header | Header::BINARY) & Header::USER,
            data,
        }
    }

    fn normalize(&mut self) {
        self.header |= Header::BINARY;
        self.header &= Header::USER;
        match self.data {
            None => self.header |= Header::READ,
            Some(Data::List(_)) => self.header |= Header::DATA_EXTENDED,
            Some(Data::Scalar(_)) => {}
        }
    }

    #[must_use]
    pub fn channel(mut self, ch: u16) -> Self {
        self.channel = Some(ch);
        self
    }

    /// Address a specific device on the chain; sets `DEVICE_ADDRESSED`.
    #[must_use]
    pub fn device(mut self, id: u16) -> Self {
        self.device_id = id;
        self.header |= Header::DEVICE_ADDRESSED;
        self
    }

    #[must_use]
    pub fn all_channels(mut self) -> Self {
        self.header |= Header::ALL_CHANNELS;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: Header) -> Self {
        self.header |= flags;
        self.normalize();
        self
    }

    pub fn index(&self) -> &'static CommandIndex {
        self.index
    }

    pub fn channel_number(&self) -> Option<u16> {
        self.channel
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    pub fn operator(&self) -> Operator {
        if self.header.contains(Header::READ) {
            Operator::Get
        } else {
            Operator::Set
        }
    }

    pub fn is_read(&self) -> bool {
        self.operator() == Operator::Get
    }

    /// The header mode this command's flags form, if any.
    pub fn mode(&self) -> Option<HeaderMode> {
        HeaderMode::from_header(self.header)
    }

    /// True when the active flag combination is one the catalog entry
    /// declares.
    pub fn validate(&self) -> bool {
        self.mode().is_some_and(|m| self.index.supports(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::catalog::cmd;

    #[test]
    fn read_infers_read_flag() {
        let c = Command::read(cmd::V).channel(3);
        assert_eq!(c.header(), Header::BINARY | Header::READ);
        assert_eq!(c.operator(), Operator::Get);
        assert_eq!(c.mode(), Some(HeaderMode::Read));
    }

    #[test]
    fn write_zero_is_still_a_write() {
        let c = Command::write(cmd::V, 0u16).channel(0);
        assert_eq!(c.operator(), Operator::Set);
        assert_eq!(c.mode(), Some(HeaderMode::Write));
    }

    #[test]
    fn list_payload_sets_extended() {
        let c = Command::write(cmd::I, vec![1u16, 5, 90]);
        assert!(c.header().contains(Header::DATA_EXTENDED));
        assert_eq!(c.mode(), Some(HeaderMode::WriteExtended));
        assert_eq!(c.data().unwrap().to_string(), "1,5,90");
    }

    #[test]
    fn parity_flag_cannot_be_set() {
        let c = Command::read(cmd::V).with_flags(Header::PARITY);
        assert!(!c.header().contains(Header::PARITY));
    }

    #[test]
    fn validate_against_catalog() {
        assert!(Command::read(cmd::V).all_channels().validate());
        assert!(Command::read(cmd::ID).validate());
        // NUP has no all-channel read
        assert!(!Command::read(cmd::NUP).all_channels().validate());
        // INTEST only supports ACTION
        assert!(!Command::read(cmd::INTEST).validate());
        assert!(
            Command::write(cmd::INTEST, 0u16)
                .with_flags(Header::ACTION)
                .validate()
        );
        // no mode includes BROADCAST
        assert!(!Command::read(cmd::V).with_flags(Header::BROADCAST).validate());
    }
}
