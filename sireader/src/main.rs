//! Command-line readout tool: connect to a master station and print every
//! card inserted until interrupted.

use std::process::ExitCode;

use clap::Parser;

use sireader::daemon::{port_listing_lines, Daemon};
use sireader::tracing::prelude::*;

/// Read SPORTident cards from a master station
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port of the station (auto-detected when omitted)
    port: Option<String>,

    /// List serial ports and exit
    #[arg(short = 'l', long = "list")]
    list: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    sireader::tracing::init_stdout();

    if args.list {
        for line in port_listing_lines() {
            println!("{line}");
        }
        return ExitCode::SUCCESS;
    }

    match Daemon::new().run(args.port).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}
