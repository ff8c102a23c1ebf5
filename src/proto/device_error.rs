use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Device code for a serial communication glitch; the request is resent.
pub const COMM_ERROR: u32 = 15;

/// Matches device error lines such as `E15:0` (code 15, channel 0).
static ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{1,3}(\d+):(\d+)").expect("invalid error regex"));

#[rustfmt::skip]
const ERROR_TABLE: &[(u32, &str)] = &[
    (0,  "Unknown error."),
    (3,  "Power error."),
    (4,  "Calibration error."),
    (5,  "Output error."),
    (10, "Unrecognised command."),
    (11, "Unrecognised input parameter."),
    (12, "Unrecognised channel, {ch}."),
    (13, "Operation forbidden."),
    (14, "Serial buffer overflow."),
    (15, "Serial communication error."),
    (16, "Command timed out."),
    (17, "SPI error."),
    (18, "ADC error."),
    (19, "I2C error."),
    (30, "Too many errors, some have been suppressed."),
    (31, "Firmware trap."),
    (90, "Powered up."),
];

const UNRECOGNISED: &str = "Unrecognised error code.";

/// Human readable description for a device error code.
pub fn describe(code: u32, channel: u32) -> String {
    ERROR_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, d)| d.replace("{ch}", &channel.to_string()))
        .unwrap_or_else(|| UNRECOGNISED.to_string())
}

/// An error reported by a module over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub code: u32,
    pub channel: u32,
    pub description: String,
    pub raw: String,
}

impl DeviceError {
    /// Classify a received line; `None` for ordinary data lines.
    pub fn parse(line: &str) -> Option<Self> {
        let s = line.trim();
        let caps = ERROR_LINE.captures(s)?;
        // digits beyond u32 saturate; the line is still an error
        let code = caps[1].parse::<u32>().unwrap_or(u32::MAX);
        let channel = caps[2].parse::<u32>().unwrap_or(u32::MAX);
        Some(Self {
            code,
            channel,
            description: describe(code, channel),
            raw: s.to_string(),
        })
    }

    pub fn is_comm_error(&self) -> bool {
        self.code == COMM_ERROR
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.raw, self.description)
    }
}

impl std::error::Error for DeviceError {}
