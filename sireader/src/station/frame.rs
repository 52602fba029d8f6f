//! Station frame layout, command codes, and the fixed request sequences.
//!
//! An extended-protocol frame is `STX, command, length, payload...,
//! checksum-hi, checksum-lo, ETX`, with the checksum computed over everything
//! between STX and the checksum bytes. A lone control byte (ACK, NAK, the
//! detection wakeup) is also a frame and carries no checksum.

use std::fmt;

use bytes::Bytes;
use strum::FromRepr;

use super::crc::crc16;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const WAKEUP: u8 = 0xFF;

/// Command bytes of the extended station protocol.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    SetMasterMode = 0xF0,
    GetSystemValue = 0x83,
    Beep = 0xF9,
    ReadCard5 = 0xB1,
    ReadCard6Block = 0xE1,
    ReadCard8PlusBlock = 0xEF,
    Card5Detected = 0xE5,
    Card6PlusDetected = 0xE6,
    Card8PlusDetected = 0xE8,
    CardRemoved = 0xE7,
}

/// Wakeup byte, doubled STX, then `SetMasterMode` with the direct-mode
/// parameter. Sent blind at whatever baud rate is being probed.
pub const STARTUP_SEQUENCE: [u8; 9] = [0xFF, 0x02, 0x02, 0xF0, 0x01, 0x4D, 0x6D, 0x0A, 0x03];
/// `GetSystemValue` for the protocol configuration byte at address 0x74.
pub const GET_PROTOCOL_CONFIG: [u8; 8] = [0x02, 0x83, 0x02, 0x74, 0x01, 0x04, 0x14, 0x03];
/// `GetSystemValue` for the cardblocks configuration byte at address 0x33.
pub const GET_CARDBLOCKS_CONFIG: [u8; 8] = [0x02, 0x83, 0x02, 0x33, 0x01, 0x16, 0x11, 0x03];
/// Two short beeps, the readout-ready greeting.
pub const BEEP_TWICE: [u8; 7] = [0x02, 0xF9, 0x01, 0x02, 0x14, 0x0A, 0x03];
/// Acknowledge a completed readout so the station releases the card.
pub const ACK_SEQUENCE: [u8; 1] = [ACK];
/// Read the single Card-5 memory block.
pub const READ_CARD_5: [u8; 6] = [0x02, 0xB1, 0x00, 0xB1, 0x00, 0x03];

/// Block numbers requested for a Card-6 readout, in wire order. Block 0 is
/// the header; 6 and 7 hold the first 64 punches; 2..5 only exist in
/// 192-punches mode and are requested when the punch counter says so.
pub const CARD6_BLOCKS: [u8; 7] = [0, 6, 7, 2, 3, 4, 5];
/// Block numbers for a Card-10/11/SIAC readout, in wire order.
pub const CARD10_BLOCKS: [u8; 5] = [0, 4, 5, 6, 7];
/// Block numbers for a Card-8/9/pCard readout (everything fits in two).
pub const CARD8_BLOCKS: [u8; 2] = [0, 1];

/// One station frame, either a full STX..ETX sequence or a single control
/// byte. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    pub fn from_bytes(bytes: Bytes) -> Self {
        Frame { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Frame {
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    /// Builds a request frame for `command` with the checksum filled in.
    pub fn request(command: Command, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 6);
        bytes.push(STX);
        bytes.push(command as u8);
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(payload);
        let crc = crc16(&bytes[1..]);
        bytes.extend_from_slice(&crc.to_be_bytes());
        bytes.push(ETX);
        Frame {
            bytes: Bytes::from(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A lone control byte (ACK, NAK, detection wakeup).
    pub fn is_single_byte(&self) -> bool {
        self.bytes.len() == 1
    }

    /// The command byte: the second byte of a framed message, or the control
    /// byte itself.
    pub fn command(&self) -> u8 {
        if self.is_single_byte() {
            self.bytes[0]
        } else {
            self.bytes[1]
        }
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Payload between the length byte and the checksum.
    pub fn payload(&self) -> &[u8] {
        if self.bytes.len() < 6 {
            return &[];
        }
        &self.bytes[3..self.bytes.len() - 3]
    }

    /// Checksum carried in the frame, high byte first.
    pub fn embedded_crc(&self) -> u16 {
        let n = self.bytes.len();
        u16::from_be_bytes([self.bytes[n - 3], self.bytes[n - 2]])
    }

    /// Checksum recomputed over command, length, and payload.
    pub fn computed_crc(&self) -> u16 {
        crc16(&self.bytes[1..self.bytes.len() - 3])
    }

    /// A single control byte is always valid; a framed message must carry
    /// STX/ETX delimiters and a matching checksum.
    pub fn is_valid(&self) -> bool {
        if self.is_single_byte() {
            return self.bytes[0] != STX;
        }
        self.bytes.len() >= 6
            && self.bytes[0] == STX
            && self.bytes[self.bytes.len() - 1] == ETX
            && self.embedded_crc() == self.computed_crc()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
