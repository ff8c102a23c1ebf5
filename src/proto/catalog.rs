use super::header::{HeaderMode, ModeSet};

/// One entry of the fixed command table.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CommandIndex {
    pub name: &'static str,
    pub code: u8,
    pub modes: ModeSet,
}

impl CommandIndex {
    pub fn supports(&self, mode: HeaderMode) -> bool {
        self.modes.contains(mode)
    }

    /// True when every mode in `modes` is declared for this command.
    pub fn supports_all(&self, modes: &[HeaderMode]) -> bool {
        modes.iter().all(|m| self.supports(*m))
    }

    /// Look up by name, case-insensitive.
    pub fn by_name(name: &str) -> Option<&'static CommandIndex> {
        CATALOG.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn by_code(code: u8) -> Option<&'static CommandIndex> {
        CATALOG.iter().find(|c| c.code == code)
    }

    pub fn all() -> &'static [CommandIndex] {
        CATALOG
    }
}

use super::header::HeaderMode::{
    Action as ACT, Read as R, ReadAllChannels as RA, Write as W, WriteAllChannels as WA,
    WriteExtended as WX,
};

const fn entry(name: &'static str, code: u8, modes: &[HeaderMode]) -> CommandIndex {
    CommandIndex {
        name,
        code,
        modes: ModeSet::of(modes),
    }
}

#[rustfmt::skip]
const CATALOG: &[CommandIndex] = &[
    //    name        code  supported header modes
    entry("V",        0x00, &[W, WX, WA, R, RA]),
    entry("I",        0x01, &[W, WX, WA, R, RA]),
    entry("VMAX",     0x02, &[W, WX, WA, R, RA]),
    entry("IMAX",     0x03, &[W, WX, WA, R, RA]),
    entry("VCAL",     0x04, &[W, ACT, WA, R, RA]),
    entry("ICAL",     0x05, &[W, ACT, WA, R, RA]),
    entry("VERR",     0x06, &[R, RA]),
    entry("IERR",     0x07, &[R, RA]),
    entry("VIP",      0x0A, &[RA]),
    entry("SR",       0x0B, &[]),
    entry("PDI",      0x0C, &[]),
    entry("PDP",      0x0D, &[]),
    entry("PDR",      0x0E, &[]),
    entry("GAIN",     0x0F, &[]),
    entry("VFULL",    0x20, &[RA]),
    entry("IFULL",    0x21, &[RA]),
    entry("NCHAN",    0x22, &[RA]),
    entry("FIRMWARE", 0x23, &[R, RA]),
    entry("ID",       0x24, &[R, RA]),
    entry("LIFETIME", 0x25, &[R, RA]),
    entry("NVM",      0x26, &[WA, RA]),
    entry("LOG",      0x27, &[R, RA]),
    entry("QUIET",    0x28, &[]),
    entry("LED",      0x31, &[W, R, RA, WA]),
    entry("NUP",      0x32, &[W, R]),
    entry("ADCT",     0x33, &[W, R, RA, WA]),
    entry("ADCN",     0x34, &[W, R, RA, WA]),
    entry("CCFN",     0x35, &[W, R, RA, WA]),
    entry("INTEST",   0x36, &[ACT]),
    entry("OK",       0x37, &[W, R, RA, WA]),
    entry("DIGSUP",   0x38, &[]),
    entry("HELP",     0x41, &[R]),
    entry("SAFE",     0x42, &[W, R, RA, WA]),
    entry("ROCOM",    0x43, &[W, R, RA, WA]),
];

const fn codes_unique(table: &[CommandIndex]) -> bool {
    let mut i = 0;
    while i < table.len() {
        let mut j = i + 1;
        while j < table.len() {
            if table[i].code == table[j].code {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(codes_unique(CATALOG), "duplicate command code in catalog");

/// Frequently used entries.
pub mod cmd {
    use super::{CATALOG, CommandIndex};

    pub const V: &CommandIndex = &CATALOG[0];
    pub const I: &CommandIndex = &CATALOG[1];
    pub const ID: &CommandIndex = &CATALOG[18];
    pub const NUP: &CommandIndex = &CATALOG[24];
    pub const INTEST: &CommandIndex = &CATALOG[28];
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn lookup_by_name_and_code() {
        let v = CommandIndex::by_name("v").unwrap();
        assert_eq!(v.code, 0x00);
        assert_eq!(CommandIndex::by_code(0x24).unwrap().name, "ID");
        assert!(CommandIndex::by_name("nope").is_none());
        assert!(CommandIndex::by_code(0xFF).is_none());
    }

    #[test]
    fn shortcuts_point_at_named_entries() {
        assert_eq!(cmd::V.name, "V");
        assert_eq!(cmd::I.name, "I");
        assert_eq!(cmd::ID.name, "ID");
        assert_eq!(cmd::NUP.name, "NUP");
        assert_eq!(cmd::INTEST.name, "INTEST");
    }

    #[test]
    fn codes_are_unique() {
        let codes: HashSet<u8> = CommandIndex::all().iter().map(|c| c.code).collect();
        assert_eq!(codes.len(), CommandIndex::all().len());
    }

    #[test]
    fn declared_modes_are_supported_and_others_are_not() {
        for c in CommandIndex::all() {
            let declared: Vec<HeaderMode> = c.modes.iter().collect();
            assert!(c.supports_all(&declared));
            for m in HeaderMode::ALL {
                if !declared.contains(&m) {
                    assert!(!c.supports(m), "{} should not support {}", c.name, m.name());
                    let mut mixed = declared.clone();
                    mixed.push(m);
                    assert!(!c.supports_all(&mixed));
                }
            }
        }
    }
}
