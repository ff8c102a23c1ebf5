pub mod catalog;
pub mod codec;
pub mod command;
pub mod device_error;
pub mod header;
pub mod scale;

pub use catalog::{CommandIndex, cmd};
pub use codec::{EncodeError, Encoding, decode_binary, encode_binary, format_ascii, parse_ascii};
pub use command::{Command, Data, Operator};
pub use device_error::{COMM_ERROR, DeviceError};
pub use header::{Header, HeaderMode, ModeSet};
