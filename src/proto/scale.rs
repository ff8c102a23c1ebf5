//! Conversion between physical quantities and 16-bit wire words.
//!
//! The codec only carries integers; callers scale with the full-scale value
//! of the module family before encoding.

/// Physical quantity addressed by a full-scale value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    Position,
}

/// Full-scale values of a device family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FullScale {
    pub family: &'static str,
    pub voltage: f64,
    pub current: f64,
    pub position: Option<f64>,
}

impl FullScale {
    pub fn of(&self, q: Quantity) -> Option<f64> {
        match q {
            Quantity::Voltage => Some(self.voltage),
            Quantity::Current => Some(self.current),
            Quantity::Position => self.position,
        }
    }
}

#[rustfmt::skip]
const FAMILIES: &[FullScale] = &[
    FullScale { family: "Q8iv", voltage: 12.0,   current: 24.0,      position: None },
    FullScale { family: "Q8b",  voltage: 12.0,   current: 83.333333, position: None },
    FullScale { family: "Q8bi", voltage: 12.0,   current: 100.0,     position: None },
    FullScale { family: "M2",   voltage: 8458.0, current: 1375.0,    position: Some(8388352.0) },
];

/// Look up a family by the type part of a device id (`Q8iv` in `Q8iv-0001`).
pub fn family(device_id: &str) -> Option<&'static FullScale> {
    let ty = device_id.split('-').next().unwrap_or(device_id);
    FAMILIES.iter().find(|f| f.family == ty)
}

/// `floor(value / full_scale * 65535)`, clamped to the wire range.
pub fn to_wire(value: f64, full_scale: f64) -> u16 {
    let w = (value / full_scale * 65535.0).floor();
    w.clamp(0.0, 65535.0) as u16
}

pub fn from_wire(word: u16, full_scale: f64) -> f64 {
    word as f64 / 65535.0 * full_scale
}
