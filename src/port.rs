use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::transport::Transport;

/// Modules talk 8N1; only the path, rate and handshake vary.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub dev: String,
    pub baud: u32,
    pub rtscts: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            dev: "/dev/ttyUSB0".into(),
            baud: 115_200,
            rtscts: false,
        }
    }
}

pub fn open_port(opts: &SerialSettings) -> Result<Box<dyn SerialPort>, serialport::Error> {
    serialport::new(&opts.dev, opts.baud)
        .timeout(Duration::from_millis(100))
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(if opts.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        })
        .open()
}

/// A real serial port as a session transport.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(opts: &SerialSettings) -> Result<Self, serialport::Error> {
        let port = open_port(opts)?;
        // stale bytes from before we opened are not ours
        port.clear(serialport::ClearBuffer::All)?;
        Ok(Self { port })
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let n = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; n];
        let mut got = 0;
        while got < n {
            match self.port.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(k) => got += k,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(got);
        Ok(buf)
    }
}
