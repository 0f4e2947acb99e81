//! Byte transport between the station and the R200 module

/// Trait for R200 module communication backends.
///
/// The ingestion loop never waits for data: it calls [`read_available`]
/// once per tick and treats `Ok(0)` as the normal idle case.
///
/// [`read_available`]: RfidTransport::read_available
pub trait RfidTransport {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Write a complete command frame to the module
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Read data with a timeout in milliseconds
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Discard any pending input
    fn clear_input(&mut self) -> Result<(), Self::Error>;

    /// Read only the bytes that are already buffered
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read(buf, 0)
    }
}
