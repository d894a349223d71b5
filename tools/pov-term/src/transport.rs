use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial read failed: {0}")]
    Read(#[source] io::Error),
    #[error("serial write failed: {0}")]
    Write(#[source] io::Error),
}

/// Byte channel to the cylinder with a one-byte lookahead.
///
/// `pending` holds a byte that `has_byte_ready` already pulled off the port;
/// `read_byte` hands it out before touching the port again, so probing and
/// reading never lose or reorder a byte.
pub struct Transport<P> {
    port: P,
    pending: Option<u8>,
}

impl Transport<Box<dyn SerialPort>> {
    /// Opens the device raw at 8N1 without flow control and drops whatever
    /// the driver buffered before we got here. The port is closed on drop.
    pub fn open(device: &str, baud: u32, read_timeout: Duration) -> Result<Self, TransportError> {
        let open_err = |source| TransportError::Open {
            device: device.to_string(),
            source,
        };
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(open_err)?;
        port.clear(ClearBuffer::Input).map_err(open_err)?;
        log::info!("opened {device} at {baud} baud");
        Ok(Self::new(port))
    }
}

impl<P: Read + Write> Transport<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            pending: None,
        }
    }

    /// Non-blocking apart from the port's read timeout.
    pub fn has_byte_ready(&mut self) -> Result<bool, TransportError> {
        if self.pending.is_some() {
            return Ok(true);
        }
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => {
                self.pending = Some(buf[0]);
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(TransportError::Read(e)),
        }
    }

    /// Blocks until a byte arrives. There is no timeout at this layer.
    pub fn read_byte(&mut self) -> Result<u8, TransportError> {
        loop {
            if self.has_byte_ready()? {
                if let Some(b) = self.pending.take() {
                    return Ok(b);
                }
            }
        }
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        self.write_bytes(&[byte])
    }

    /// Writes the whole buffer or fails; a short write leaves the device
    /// mid-frame and is reported as an error.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes).map_err(TransportError::Write)?;
        self.port.flush().map_err(TransportError::Write)
    }

    #[cfg(test)]
    pub fn port(&self) -> &P {
        &self.port
    }
}
