//! Utilities: logging setup (level from -v / -q, text or JSON, RUST_LOG override).
//!
//! Key items:
//!   init_logging / derive_level
//!   LogFormat

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logging helpers.
pub mod logging {
    use super::*;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
    pub enum LogFormat {
        #[default]
        Text,
        Json,
    }

    /// Warnings by default; each `-v` adds a level, `-q` keeps errors only.
    pub fn derive_level(verbose: u8, quiet: bool) -> LevelFilter {
        if quiet {
            return LevelFilter::ERROR;
        }
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Install the global subscriber. Logs go to stderr so stdout stays the
    /// command's own output. `RUST_LOG` directives override `level`.
    pub fn init_logging(level: LevelFilter, format: LogFormat) {
        let filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(filter);
        // try_init fails when a subscriber is already installed; keep the first.
        let _ = match format {
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(false),
                )
                .try_init(),
        };
    }
}

pub use logging::{LogFormat, derive_level, init_logging};
