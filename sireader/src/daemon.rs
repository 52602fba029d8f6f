//! Daemon lifecycle management.
//!
//! Wires one driver task to one serial port, renders the driver's events to
//! the terminal, and handles signals and graceful shutdown.

use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use anyhow::{bail, Context};

use crate::card::{format_clock, CardRecord};
use crate::station::{LogDirection, ReaderEvent, ReaderStatus, StationDriver};
use crate::tracing::prelude::*;
use crate::transport;

const INITIAL_BAUD: u32 = 38_400;

/// The readout daemon: one driver task against one station.
pub struct Daemon {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Runs until SIGINT/SIGTERM or a fatal station error.
    pub async fn run(self, port_path: Option<String>) -> anyhow::Result<()> {
        let path = match port_path {
            Some(path) => path,
            None => match transport::detect_station_port() {
                Some(path) => {
                    info!(port = %path, "Auto-detected station");
                    path
                }
                None => {
                    for line in port_listing_lines() {
                        info!("{line}");
                    }
                    bail!("no SPORTident station found; pass a port path");
                }
            },
        };

        let link = transport::open(&path, INITIAL_BAUD)
            .with_context(|| format!("failed to open serial port {path}"))?;
        info!(port = %path, "Serial port open");

        let (event_tx, mut event_rx) = mpsc::channel::<ReaderEvent>(100);
        let driver = StationDriver::new(link, event_tx);
        let mut driver_task = self.tracker.spawn(driver.run(self.shutdown.clone()));
        self.tracker.close();

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        let outcome = loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    break Ok(());
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    break Ok(());
                }
                event = event_rx.recv() => match event {
                    Some(event) => handle_event(event),
                    // Channel closed: the driver is finishing, join it.
                    None => break join_driver(&mut driver_task).await,
                },
                result = &mut driver_task => {
                    break match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(error)) => Err(error.into()),
                        Err(join_error) => Err(join_error.into()),
                    };
                }
            }
        };

        self.shutdown.cancel();
        // Drain so the driver's final statuses reach the log.
        while let Some(event) = event_rx.recv().await {
            handle_event(event);
        }
        self.tracker.wait().await;
        info!("Exiting.");
        outcome
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

async fn join_driver(
    task: &mut tokio::task::JoinHandle<Result<(), crate::station::StationError>>,
) -> anyhow::Result<()> {
    match task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(error.into()),
        Err(join_error) => Err(join_error.into()),
    }
}

/// Human-readable port listing, the station marked by its USB identity.
pub fn port_listing_lines() -> Vec<String> {
    let listings = transport::list_ports();
    if listings.is_empty() {
        return vec!["No serial ports found.".to_string()];
    }
    listings
        .into_iter()
        .map(|listing| {
            let marker = if listing.is_station() {
                "  [SPORTident]"
            } else {
                ""
            };
            match listing.usb {
                Some((vid, pid)) => format!(
                    "{}  {:04x}:{:04x}  {}{}",
                    listing.path,
                    vid,
                    pid,
                    listing.product.unwrap_or_default(),
                    marker,
                ),
                None => listing.path,
            }
        })
        .collect()
}

fn handle_event(event: ReaderEvent) {
    match event {
        ReaderEvent::Status(status) => match status {
            ReaderStatus::Starting => info!("Starting reader"),
            ReaderStatus::On => info!("Station connected"),
            ReaderStatus::Ready => info!("Ready, insert a card"),
            ReaderStatus::Processing => info!("Reading card"),
            ReaderStatus::ProcessingError(message) => warn!(%message, "Card readout failed"),
            ReaderStatus::FatalError(message) => error!(%message, "Reader stopped"),
            ReaderStatus::Off => info!("Reader off"),
        },
        ReaderEvent::CardRead(record) => print_record(&record),
        ReaderEvent::Log(direction, text) => match direction {
            LogDirection::Error => warn!("{direction} {text}"),
            _ => debug!("{direction} {text}"),
        },
    }
}

fn print_record(record: &CardRecord) {
    info!(
        card = %record.card_number,
        series = %record.series,
        start = %format_clock(record.start_ms),
        finish = %format_clock(record.finish_ms),
        check = %format_clock(record.check_ms),
        punches = record.punch_count,
        "Card read"
    );
    for punch in &record.punches {
        info!(
            "  {:>3} at {}",
            punch.code,
            format_clock(punch.timestamp_ms)
        );
    }
}
