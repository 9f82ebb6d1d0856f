//! Byte-stream access to the sonar head.
//!
//! The transaction layer only needs three operations from a device, captured by
//! [`SerialDevice`]. [`SerialLink`] provides them over a real port from the
//! `serialport` crate; tests provide scripted fakes.

use std::io;
use std::time::Duration;

/// Minimal half-duplex byte stream used by a transaction.
pub trait SerialDevice {
    /// Discard anything pending in the input and output buffers.
    fn clear_buffers(&mut self) -> io::Result<()>;

    /// Write a frame, returning how many bytes were accepted.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize>;

    /// Read until `terminator` has been received or the device's read deadline
    /// elapses. On deadline the bytes received so far are returned, which may be
    /// empty or unterminated.
    fn read_until(&mut self, terminator: u8) -> io::Result<Vec<u8>>;
}

impl<D: SerialDevice + ?Sized> SerialDevice for &mut D {
    fn clear_buffers(&mut self) -> io::Result<()> {
        (**self).clear_buffers()
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
        (**self).write_frame(frame)
    }

    fn read_until(&mut self, terminator: u8) -> io::Result<Vec<u8>> {
        (**self).read_until(terminator)
    }
}

impl<D: SerialDevice + ?Sized> SerialDevice for Box<D> {
    fn clear_buffers(&mut self) -> io::Result<()> {
        (**self).clear_buffers()
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
        (**self).write_frame(frame)
    }

    fn read_until(&mut self, terminator: u8) -> io::Result<Vec<u8>> {
        (**self).read_until(terminator)
    }
}

#[cfg(feature = "instrument_serial")]
mod serial_enabled {
    use super::*;
    use crate::error::SonarResult;
    use std::fmt;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::time::Instant;
    use tracing::info;

    /// Poll interval of the underlying port; the overall deadline is enforced on top.
    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// A real serial port, 8N1, no flow control.
    pub struct SerialLink {
        port_name: String,
        timeout: Duration,
        port: Box<dyn SerialPort>,
    }

    impl fmt::Debug for SerialLink {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("SerialLink")
                .field("port_name", &self.port_name)
                .field("timeout", &self.timeout)
                .finish_non_exhaustive()
        }
    }

    impl SerialLink {
        /// Open `port_name` at `baud_rate` with an overall read/write deadline of `timeout`.
        ///
        /// # Errors
        ///
        /// Returns a `Serial` error if the port cannot be opened.
        pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> SonarResult<Self> {
            let port = serialport::new(port_name, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(timeout.min(POLL_INTERVAL))
                .open()?;

            info!("Serial port opened: {:?} @ {} baud", port_name, baud_rate);

            let mut link = Self {
                port_name: port_name.to_string(),
                timeout,
                port,
            };
            link.clear_buffers()?;
            Ok(link)
        }

        /// Path the link was opened on.
        pub fn port_name(&self) -> &str {
            &self.port_name
        }
    }

    impl SerialDevice for SerialLink {
        fn clear_buffers(&mut self) -> io::Result<()> {
            self.port.clear(ClearBuffer::All).map_err(io::Error::from)
        }

        fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
            let mut written = 0;
            let start = Instant::now();
            while written < frame.len() && start.elapsed() < self.timeout {
                match self.port.write(&frame[written..]) {
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(e),
                }
            }
            self.port.flush()?;
            Ok(written)
        }

        fn read_until(&mut self, terminator: u8) -> io::Result<Vec<u8>> {
            let mut response = Vec::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();

            while start.elapsed() < self.timeout {
                match self.port.read(&mut buffer) {
                    Ok(1) => {
                        response.push(buffer[0]);
                        if buffer[0] == terminator {
                            break;
                        }
                    }
                    Ok(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "Unexpected EOF from serial port",
                        ));
                    }
                    // Port timeout is shorter than the overall deadline
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(e),
                }
            }

            Ok(response)
        }
    }
}

#[cfg(feature = "instrument_serial")]
pub use serial_enabled::SerialLink;

#[cfg(not(feature = "instrument_serial"))]
mod serial_disabled {
    use super::*;
    use crate::error::{SonarError, SonarResult};

    /// Placeholder when built without serial support.
    #[derive(Debug)]
    pub struct SerialLink;

    impl SerialLink {
        /// Always fails: serial support is not compiled in.
        pub fn open(_port_name: &str, _baud_rate: u32, _timeout: Duration) -> SonarResult<Self> {
            Err(SonarError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    impl SerialDevice for SerialLink {
        fn clear_buffers(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "serial support disabled"))
        }

        fn write_frame(&mut self, _frame: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "serial support disabled"))
        }

        fn read_until(&mut self, _terminator: u8) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "serial support disabled"))
        }
    }
}

#[cfg(not(feature = "instrument_serial"))]
pub use serial_disabled::SerialLink;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_reports_error() {
        let result = SerialLink::open("/dev/meltstake-no-such-port", 115_200, Duration::from_millis(50));
        let shown = format!("{:?}", result);
        assert!(result.is_err(), "{}", shown);
    }

    #[test]
    fn test_boxed_device_forwards() {
        struct Echo(Vec<u8>);

        impl SerialDevice for Echo {
            fn clear_buffers(&mut self) -> io::Result<()> {
                self.0.clear();
                Ok(())
            }

            fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
                self.0.extend_from_slice(frame);
                Ok(frame.len())
            }

            fn read_until(&mut self, _terminator: u8) -> io::Result<Vec<u8>> {
                Ok(std::mem::take(&mut self.0))
            }
        }

        let mut device: Box<dyn SerialDevice> = Box::new(Echo(vec![9]));
        device.clear_buffers().unwrap();
        assert_eq!(device.write_frame(&[1, 2, 0xFC]).unwrap(), 3);
        assert_eq!(device.read_until(0xFC).unwrap(), vec![1, 2, 0xFC]);
    }
}
