//! Virtual module for exercising sessions without hardware.

pub mod device;
pub mod generator;
pub mod handlers;
pub mod program;

pub use device::{DeviceHandle, VirtualDevice};
pub use generator::from_log;
pub use handlers::{CustomHandler, Handlers};
pub use program::{Program, ProgramCommand, ProgramError, ResponseEntry, Segmentation};
