//! Serial port transport for desktop hosts using the serialport crate

use crate::transport::RfidTransport;
use std::io::ErrorKind;
use std::time::Duration;

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate` (8N1, no flow control) and flush stale input
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(10))
            .open()?;
        std::thread::sleep(Duration::from_millis(500));
        port.clear(serialport::ClearBuffer::Input)?;

        Ok(Self { port })
    }
}

impl RfidTransport for SerialTransport {
    type Error = std::io::Error;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write_all(&mut self.port, data)?;
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        self.port
            .set_timeout(Duration::from_millis(timeout_ms as u64))
            .map_err(std::io::Error::other)?;
        match std::io::Read::read(&mut self.port, buf) {
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            other => other,
        }
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(std::io::Error::other)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let pending = self.port.bytes_to_read().map_err(std::io::Error::other)? as usize;
        if pending == 0 {
            return Ok(0);
        }
        let len = pending.min(buf.len());
        std::io::Read::read(&mut self.port, &mut buf[..len])
    }
}
