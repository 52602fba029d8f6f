//! Master-station protocol: framing, checksum, byte accumulation, and the
//! readout driver.

pub mod accumulator;
pub mod crc;
pub mod driver;
pub mod frame;

pub use driver::StationDriver;

use crate::card::CardRecord;

/// Progress of the reader, as surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderStatus {
    /// The driver task has started.
    Starting,
    /// Handshake succeeded; the station answered and is configured.
    On,
    /// Waiting for a card to be inserted. Re-emitted after every readout.
    Ready,
    /// A card was detected and its blocks are being read.
    Processing,
    /// The current card failed to read; the reader stays live.
    ProcessingError(String),
    /// Handshake or port failure; the driver is about to exit.
    FatalError(String),
    /// The driver task has exited.
    Off,
}

/// Direction tag for wire-level log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LogDirection {
    #[strum(serialize = "->")]
    Send,
    #[strum(serialize = "<-")]
    Read,
    #[strum(serialize = "--")]
    Info,
    #[strum(serialize = "!!")]
    Error,
}

/// Everything the driver reports to its consumer, in emission order.
#[derive(Debug)]
pub enum ReaderEvent {
    Status(ReaderStatus),
    CardRead(CardRecord),
    Log(LogDirection, String),
}

/// Errors raised while talking to the station.
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    #[error("timed out waiting for the station")]
    Timeout,
    #[error("Master station did not answer to startup sequence (high/low baud)")]
    NoAnswer,
    #[error("unexpected answer [{received}], expected command {expected:#04x}")]
    InvalidMessage { received: String, expected: u8 },
    #[error("{0}")]
    ConfigurationMismatch(String),
    #[error("serial port failure: {0}")]
    Port(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] crate::card::DecodeError),
}

impl StationError {
    /// Per-card failures keep the reader alive; configuration and port
    /// failures tear the driver down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StationError::Timeout
                | StationError::InvalidMessage { .. }
                | StationError::Decode(_)
        )
    }
}
