//! Serial access to the master station.
//!
//! The driver only needs a byte port: read whatever arrived, write and
//! drain, change the line speed. [`StationPort`] captures that, and
//! [`SerialLink`] implements it over a `tokio_serial` stream. Discovery
//! helpers identify the station's USB-serial bridge by its vendor and
//! product IDs.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialPortInfo,
    SerialPortType, SerialStream, StopBits,
};

/// USB identity of the station's integrated serial bridge.
pub const SPORTIDENT_VID: u16 = 0x10C4;
pub const SPORTIDENT_PID: u16 = 0x800A;

/// Byte-oriented port the driver talks through.
#[async_trait]
pub trait StationPort: Send {
    /// Reads whatever bytes are available, waiting for at least one.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes the whole buffer and waits for it to drain.
    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    async fn set_baud_rate(&mut self, baud: u32) -> io::Result<()>;
}

/// A [`StationPort`] over a real serial device. Closing happens on drop.
pub struct SerialLink {
    stream: SerialStream,
}

/// Opens a serial device with the station's line parameters: 8 data bits,
/// no parity, one stop bit, no flow control.
pub fn open(path: &str, baud: u32) -> Result<SerialLink, tokio_serial::Error> {
    let stream = tokio_serial::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()?;
    Ok(SerialLink { stream })
}

#[async_trait]
impl StationPort for SerialLink {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    async fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        SerialPort::set_baud_rate(&mut self.stream, baud).map_err(io::Error::from)
    }
}

/// One enumerated serial port, with its USB identity when the OS knows it.
#[derive(Debug, Clone)]
pub struct PortListing {
    pub path: String,
    pub usb: Option<(u16, u16)>,
    pub product: Option<String>,
}

impl PortListing {
    /// Whether this looks like a SPORTident station.
    pub fn is_station(&self) -> bool {
        self.usb == Some((SPORTIDENT_VID, SPORTIDENT_PID))
    }
}

/// Enumerates the serial ports of this machine.
pub fn list_ports() -> Vec<PortListing> {
    tokio_serial::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(describe)
        .collect()
}

/// Path of the first port that identifies as a station.
pub fn detect_station_port() -> Option<String> {
    list_ports()
        .into_iter()
        .find(PortListing::is_station)
        .map(|listing| listing.path)
}

fn describe(info: SerialPortInfo) -> PortListing {
    let (usb, product) = match info.port_type {
        SerialPortType::UsbPort(usb) => (Some((usb.vid, usb.pid)), usb.product),
        _ => (None, None),
    };
    PortListing {
        path: info.port_name,
        usb,
        product,
    }
}
