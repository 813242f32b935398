//! Serial link implementation using the `serialport` crate.

use crate::error::Result;
use crate::transport::Transport;
use log::{debug, trace};
use serialport::ClearBuffer;
use std::io::{Read, Write};
use std::time::Duration;

/// Default UART speed of the mainboard link.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Read timeout of cloned RX handles. Short so the RX loop polls its
/// stop flag responsively.
const RX_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial transport to the mainboard.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Open the serial link.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        debug!("opening {port_name} at {baud_rate} baud");
        let port = serialport::new(port_name, baud_rate)
            .timeout(RX_READ_TIMEOUT)
            .open()?;
        port.clear(ClearBuffer::All)?;
        Ok(Self {
            port,
            name: port_name.to_owned(),
        })
    }

    /// Clone an independent read handle for the status RX loop.
    ///
    /// The clone shares the OS port, so reads on it run concurrently
    /// with writes on `self`.
    pub fn try_clone_reader(&self) -> Result<impl Read + Send> {
        Ok(self.port.try_clone()?)
    }
}

impl Transport for SerialTransport {
    fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        trace!("TX {} bytes on {}", frame.len(), self.name);
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// List serial ports available on this host.
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}
