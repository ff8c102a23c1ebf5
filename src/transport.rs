use std::io;

/// Byte stream a [`Session`](crate::session::Session) talks through.
///
/// Implemented by the serial port wrapper and by the virtual device. Reads
/// never block: the session polls so it can watch two timeouts at once.
pub trait Transport: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Everything received so far and not yet read; empty when idle.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        (**self).read_available()
    }
}
