//! The readout driver.
//!
//! One task owns the port, the accumulator, and the frame queue: it brings
//! the station into a known-good configuration, then loops on detection
//! frames, reading whatever card was inserted and reporting progress over
//! the event channel. Per-card failures are reported and survived; startup
//! and port failures end the task.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::card::{self, CardRecord};
use crate::transport::StationPort;

use super::accumulator::{FrameAccumulator, MAX_MESSAGE_SIZE};
use super::frame::{
    Command, Frame, ACK_SEQUENCE, BEEP_TWICE, CARD10_BLOCKS, CARD6_BLOCKS, CARD8_BLOCKS,
    GET_CARDBLOCKS_CONFIG, GET_PROTOCOL_CONFIG, READ_CARD_5, STARTUP_SEQUENCE,
};
use super::{LogDirection, ReaderEvent, ReaderStatus, StationError};

const HIGH_BAUD: u32 = 38_400;
const LOW_BAUD: u32 = 4_800;

const ANSWER_TIMEOUT: Duration = Duration::from_millis(2_000);
const REMOVAL_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Protocol configuration byte, as answered to `GET_PROTOCOL_CONFIG`.
const CONFIG_BYTE_INDEX: usize = 6;
const EXTENDED_PROTOCOL_BIT: u8 = 0x01;
const HANDSHAKE_BIT: u8 = 0x04;

/// Punch counter position inside the first block answer.
const CARD6_PUNCH_COUNT_INDEX: usize = 24;
const CARD10_PUNCH_COUNT_INDEX: usize = 28;
/// Series marker position inside a Card-8+ detection frame.
const CARD10_SERIES_INDEX: usize = 5;

const PUNCHES_PER_BLOCK: usize = 32;

enum CardTask {
    Card5,
    Card6,
    Card8or9,
    Card10Plus,
}

pub struct StationDriver<P> {
    port: P,
    accumulator: FrameAccumulator,
    inbox: VecDeque<Frame>,
    events: mpsc::Sender<ReaderEvent>,
    zero_hour_ms: i64,
    extended_card6: bool,
}

impl<P: StationPort> StationDriver<P> {
    pub fn new(port: P, events: mpsc::Sender<ReaderEvent>) -> Self {
        StationDriver {
            port,
            accumulator: FrameAccumulator::new(),
            inbox: VecDeque::new(),
            events,
            zero_hour_ms: 0,
            extended_card6: false,
        }
    }

    /// Sets the midnight anchor used to resolve card times.
    pub fn with_zero_hour(mut self, zero_hour_ms: i64) -> Self {
        self.zero_hour_ms = zero_hour_ms;
        self
    }

    /// Whether the station announced the Card-6 192-punches extension during
    /// the handshake. Informational; the readout sequence already covers the
    /// extra blocks.
    pub fn card6_192_punches(&self) -> bool {
        self.extended_card6
    }

    /// Runs until cancelled or until a fatal error. The port closes when the
    /// driver is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), StationError> {
        self.status(ReaderStatus::Starting).await;
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            result = self.drive() => result,
        };
        if let Err(error) = &outcome {
            self.log(LogDirection::Error, error.to_string()).await;
            self.status(ReaderStatus::FatalError(error.to_string())).await;
        }
        self.status(ReaderStatus::Off).await;
        outcome
    }

    async fn drive(&mut self) -> Result<(), StationError> {
        self.bootstrap().await?;
        loop {
            self.status(ReaderStatus::Ready).await;
            let frame = self.take_forever().await?;
            if let Err(error) = self.dispatch(frame).await {
                if !error.is_recoverable() {
                    return Err(error);
                }
                self.log(LogDirection::Error, error.to_string()).await;
                self.status(ReaderStatus::ProcessingError(error.to_string()))
                    .await;
            }
        }
    }

    /// Probes the station at 38400 baud, then once more at 4800.
    async fn bootstrap(&mut self) -> Result<(), StationError> {
        self.port.set_baud_rate(HIGH_BAUD).await?;
        match self.handshake().await {
            Err(StationError::Timeout) => {}
            outcome => return outcome,
        }
        self.log(LogDirection::Info, "No answer at 38400 baud, trying 4800")
            .await;
        self.port.set_baud_rate(LOW_BAUD).await?;
        match self.handshake().await {
            Err(StationError::Timeout) => Err(StationError::NoAnswer),
            outcome => outcome,
        }
    }

    async fn handshake(&mut self) -> Result<(), StationError> {
        self.send(&STARTUP_SEQUENCE).await?;
        self.wait_for(Command::SetMasterMode).await?;

        self.send(&GET_PROTOCOL_CONFIG).await?;
        let answer = self.wait_for(Command::GetSystemValue).await?;
        let config = answer.get(CONFIG_BYTE_INDEX).unwrap_or(0);
        if config & EXTENDED_PROTOCOL_BIT == 0 {
            return Err(StationError::ConfigurationMismatch(
                "Master station should be configured with extended protocol".to_string(),
            ));
        }
        if config & HANDSHAKE_BIT == 0 {
            return Err(StationError::ConfigurationMismatch(
                "Master station should be configured in handshake mode (no autosend)".to_string(),
            ));
        }

        self.send(&GET_CARDBLOCKS_CONFIG).await?;
        let answer = self.wait_for(Command::GetSystemValue).await?;
        if answer.get(CONFIG_BYTE_INDEX) == Some(0xFF) {
            self.extended_card6 = true;
            self.log(LogDirection::Info, "Card-6 with 192 punches enabled")
                .await;
        }

        self.send(&BEEP_TWICE).await?;
        self.status(ReaderStatus::On).await;
        Ok(())
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<(), StationError> {
        match Command::from_repr(frame.command()) {
            Some(Command::Card5Detected) => self.read_card(CardTask::Card5).await,
            Some(Command::Card6PlusDetected) => self.read_card(CardTask::Card6).await,
            Some(Command::Card8PlusDetected) => {
                let task = if frame.get(CARD10_SERIES_INDEX) == Some(0x0F) {
                    CardTask::Card10Plus
                } else {
                    CardTask::Card8or9
                };
                self.read_card(task).await
            }
            // Echo of our own beep request.
            Some(Command::Beep) => Ok(()),
            Some(Command::CardRemoved) => {
                self.log(LogDirection::Info, "Late card removal").await;
                Ok(())
            }
            _ => {
                self.log(LogDirection::Info, format!("Unexpected message: {frame}"))
                    .await;
                Ok(())
            }
        }
    }

    async fn read_card(&mut self, task: CardTask) -> Result<(), StationError> {
        self.status(ReaderStatus::Processing).await;
        let record = match task {
            CardTask::Card5 => self.retrieve_card5().await?,
            CardTask::Card6 => self.retrieve_card6().await?,
            CardTask::Card8or9 => self.retrieve_card8_9().await?,
            CardTask::Card10Plus => self.retrieve_card10plus().await?,
        };
        self.emit(ReaderEvent::CardRead(record)).await;
        self.ack_and_wait_removal().await
    }

    async fn retrieve_card5(&mut self) -> Result<CardRecord, StationError> {
        self.send(&READ_CARD_5).await?;
        let answer = self.wait_for(Command::ReadCard5).await?;
        Ok(card::card5::decode(answer.as_bytes(), self.zero_hour_ms)?)
    }

    async fn retrieve_card6(&mut self) -> Result<CardRecord, StationError> {
        let requests = block_requests(Command::ReadCard6Block, &CARD6_BLOCKS);
        let answers = self
            .read_multiple(&requests, CARD6_PUNCH_COUNT_INDEX)
            .await?;
        let data = card::card6plus::assemble_blocks(answers.iter().map(Frame::as_bytes))?;
        Ok(card::card6plus::decode_card6(&data, self.zero_hour_ms)?)
    }

    async fn retrieve_card8_9(&mut self) -> Result<CardRecord, StationError> {
        let requests = block_requests(Command::ReadCard8PlusBlock, &CARD8_BLOCKS);
        let answers = self.read_all(&requests).await?;
        let data = card::card6plus::assemble_blocks(answers.iter().map(Frame::as_bytes))?;
        Ok(card::card6plus::decode_card8plus(&data, self.zero_hour_ms)?)
    }

    async fn retrieve_card10plus(&mut self) -> Result<CardRecord, StationError> {
        let requests = block_requests(Command::ReadCard8PlusBlock, &CARD10_BLOCKS);
        let answers = self
            .read_multiple(&requests, CARD10_PUNCH_COUNT_INDEX)
            .await?;
        let data = card::card6plus::assemble_blocks(answers.iter().map(Frame::as_bytes))?;
        Ok(card::card6plus::decode_card8plus(&data, self.zero_hour_ms)?)
    }

    /// Sends every request and collects the matching answers.
    async fn read_all(&mut self, requests: &[Frame]) -> Result<Vec<Frame>, StationError> {
        let mut answers = Vec::with_capacity(requests.len());
        for request in requests {
            self.send(request.as_bytes()).await?;
            answers.push(self.wait_for_byte(request.command()).await?);
        }
        Ok(answers)
    }

    /// Sends the first request, reads the punch counter from its answer, and
    /// only requests as many further blocks as the counter calls for.
    async fn read_multiple(
        &mut self,
        requests: &[Frame],
        punch_count_index: usize,
    ) -> Result<Vec<Frame>, StationError> {
        self.send(requests[0].as_bytes()).await?;
        let first = self.wait_for_byte(requests[0].command()).await?;
        let punches = usize::from(first.get(punch_count_index).ok_or_else(|| {
            StationError::InvalidMessage {
                received: first.to_string(),
                expected: requests[0].command(),
            }
        })?);
        let data_blocks =
            punches / PUNCHES_PER_BLOCK + usize::from(punches % PUNCHES_PER_BLOCK != 0);
        let total = 1 + data_blocks;

        let mut answers = vec![first];
        for request in &requests[1..total.min(requests.len())] {
            self.send(request.as_bytes()).await?;
            answers.push(self.wait_for_byte(request.command()).await?);
        }
        Ok(answers)
    }

    /// Releases the card and waits for it to be pulled; a slow or chatty
    /// station only earns a log line.
    async fn ack_and_wait_removal(&mut self) -> Result<(), StationError> {
        self.send(&ACK_SEQUENCE).await?;
        match self.take(REMOVAL_TIMEOUT).await {
            Ok(frame) if frame.command() == Command::CardRemoved as u8 => Ok(()),
            Ok(frame) => {
                self.log(
                    LogDirection::Info,
                    format!("Expected card removal, got: {frame}"),
                )
                .await;
                Ok(())
            }
            Err(StationError::Timeout) => {
                self.log(LogDirection::Info, "Timeout waiting for card removal")
                    .await;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), StationError> {
        self.log(LogDirection::Send, hex(bytes)).await;
        self.port.write_all(bytes).await?;
        Ok(())
    }

    async fn wait_for(&mut self, command: Command) -> Result<Frame, StationError> {
        self.wait_for_byte(command as u8).await
    }

    async fn wait_for_byte(&mut self, command: u8) -> Result<Frame, StationError> {
        let frame = self.take(ANSWER_TIMEOUT).await?;
        if frame.command() == command && frame.is_valid() {
            Ok(frame)
        } else {
            Err(StationError::InvalidMessage {
                received: frame.to_string(),
                expected: command,
            })
        }
    }

    async fn take(&mut self, timeout: Duration) -> Result<Frame, StationError> {
        tokio::time::timeout(timeout, self.take_forever())
            .await
            .map_err(|_| StationError::Timeout)?
    }

    async fn take_forever(&mut self) -> Result<Frame, StationError> {
        loop {
            if let Some(frame) = self.inbox.pop_front() {
                self.log(LogDirection::Read, frame.to_string()).await;
                return Ok(frame);
            }
            let mut chunk = [0u8; MAX_MESSAGE_SIZE];
            let n = self.port.read(&mut chunk).await?;
            if n == 0 {
                return Err(StationError::Port(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port closed",
                )));
            }
            self.inbox
                .extend(self.accumulator.push(&chunk[..n], Instant::now()));
        }
    }

    async fn emit(&mut self, event: ReaderEvent) {
        // A vanished consumer is handled by cancellation, not here.
        let _ = self.events.send(event).await;
    }

    async fn status(&mut self, status: ReaderStatus) {
        self.emit(ReaderEvent::Status(status)).await;
    }

    async fn log(&mut self, direction: LogDirection, text: impl Into<String>) {
        self.emit(ReaderEvent::Log(direction, text.into())).await;
    }
}

fn block_requests(command: Command, blocks: &[u8]) -> Vec<Frame> {
    blocks
        .iter()
        .map(|&block| Frame::request(command, &[block]))
        .collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<String>>()
        .join(" ")
}
