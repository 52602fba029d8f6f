//! SPORTident master-station readout.
//!
//! The crate is split along the data path: bytes from the serial port are
//! assembled into frames ([`station`]), a completed readout is decoded into a
//! card record ([`card`]), and a record can be checked against course
//! definitions ([`course`]). The [`daemon`] module wires the driver to a real
//! serial port and a terminal.

pub mod card;
pub mod course;
pub mod daemon;
pub mod station;
pub mod tracing;
pub mod transport;

pub use card::{CardRecord, Punch};
pub use course::{Course, ValidationResult};
pub use station::{ReaderEvent, ReaderStatus, StationDriver};
