//! Logging setup.
//!
//! The binary installs a subscriber once via [`init_stdout`]; the rest of
//! the crate pulls the level macros from [`prelude`].

use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

/// Installs a stdout subscriber. `RUST_LOG` selects what gets through;
/// without it, INFO and above.
pub fn init_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(ClockTimer)
                .with_target(true),
        )
        .init();
}

// Wire traffic is timed in milliseconds (the accumulator drops partial
// frames after half a second), so the timer shows local wall-clock time down
// to the millisecond rather than the stock wide UTC timestamp.
struct ClockTimer;

impl FormatTime for ClockTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = match OffsetDateTime::now_local() {
            Ok(local) => local,
            Err(_) => OffsetDateTime::now_utc(),
        };
        let stamp = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{stamp}")
    }
}
