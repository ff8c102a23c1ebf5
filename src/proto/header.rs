use bitflags::bitflags;

bitflags! {
    /// Header byte flags of a binary command frame.
    ///
    /// `PARITY` is derived at encode time and never part of a command's
    /// declared header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Header: u8 {
        const BINARY = 0x80;
        const BROADCAST = 0x40;
        const ALL_CHANNELS = 0x20;
        const DEVICE_ADDRESSED = 0x10;
        const READ = 0x08;
        const ACTION = 0x04;
        const DATA_EXTENDED = 0x02;
        const PARITY = 0x01;
    }
}

impl Header {
    /// Flags a caller may set; everything except the parity bit.
    pub const USER: Header = Header::PARITY.complement();

    /// Header byte as sent on the wire, parity bit included.
    pub fn wire_byte(self) -> u8 {
        let bits = (self | Header::BINARY).bits() & Header::USER.bits();
        bits | parity_odd(bits)
    }

    /// Rebuild a header from a received byte, dropping the parity bit.
    pub fn from_wire(byte: u8) -> Self {
        Header::from_bits_truncate(byte) & Header::USER
    }
}

/// 1 when `x` has an odd number of set bits.
pub fn parity_odd(x: u8) -> u8 {
    let mut x = x;
    x ^= x >> 4;
    x ^= x >> 2;
    x ^= x >> 1;
    x & 1
}

/// Named flag combinations a catalog entry may declare support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderMode {
    Write,
    WriteExtended,
    WriteAllChannels,
    Read,
    ReadAllChannels,
    Action,
}

impl HeaderMode {
    pub const ALL: [HeaderMode; 6] = [
        HeaderMode::Write,
        HeaderMode::WriteExtended,
        HeaderMode::WriteAllChannels,
        HeaderMode::Read,
        HeaderMode::ReadAllChannels,
        HeaderMode::Action,
    ];

    pub const fn flags(self) -> Header {
        match self {
            HeaderMode::Write => Header::BINARY,
            HeaderMode::WriteExtended => Header::BINARY.union(Header::DATA_EXTENDED),
            HeaderMode::WriteAllChannels => Header::BINARY.union(Header::ALL_CHANNELS),
            HeaderMode::Read => Header::BINARY.union(Header::READ),
            HeaderMode::ReadAllChannels => Header::BINARY
                .union(Header::READ)
                .union(Header::ALL_CHANNELS),
            HeaderMode::Action => Header::BINARY.union(Header::ACTION),
        }
    }

    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Mode whose flag combination is exactly `header` (parity ignored).
    pub fn from_header(header: Header) -> Option<Self> {
        let header = header & Header::USER;
        Self::ALL.into_iter().find(|m| m.flags() == header)
    }

    pub fn name(self) -> &'static str {
        match self {
            HeaderMode::Write => "WRITE",
            HeaderMode::WriteExtended => "WRITE_EXTENDED",
            HeaderMode::WriteAllChannels => "WRITE_ALL_CHANNELS",
            HeaderMode::Read => "READ",
            HeaderMode::ReadAllChannels => "READ_ALL_CHANNELS",
            HeaderMode::Action => "ACTION",
        }
    }
}

/// Compact set of header modes, usable in `const` catalog tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeSet(u8);

impl ModeSet {
    pub const EMPTY: ModeSet = ModeSet(0);

    pub const fn of(modes: &[HeaderMode]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < modes.len() {
            bits |= modes[i].bit();
            i += 1;
        }
        ModeSet(bits)
    }

    pub const fn contains(self, mode: HeaderMode) -> bool {
        self.0 & mode.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = HeaderMode> {
        HeaderMode::ALL.into_iter().filter(move |m| self.contains(*m))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
