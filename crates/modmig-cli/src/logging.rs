//! Subscriber set-up for the `modmig` binary.
//!
//! Filter priority: `MODMIG_LOG`, then `RUST_LOG`, then the `-v`/`-q` flags.

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const CRATE_TARGETS: [&str; 5] = ["modmig", "modmig_core", "modmig_driver", "modmig_engine", "modmig_storage"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    /// Level for this crate family; everything else stays at `warn` unless quiet.
    const fn crate_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
        }
    }

    const fn other_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal | Self::Verbose => Level::WARN,
        }
    }
}

/// Install the global subscriber. Call once, before loading configuration.
pub fn init(verbosity: Verbosity) {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity == Verbosity::Verbose);

    tracing_subscriber::registry()
        .with(build_filter(verbosity))
        .with(fmt_layer)
        .init();
}

fn build_filter(verbosity: Verbosity) -> EnvFilter {
    if let Some(filter) = std::env::var("MODMIG_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(default_directives(verbosity))
}

fn default_directives(verbosity: Verbosity) -> String {
    let crate_level = verbosity.crate_level();
    std::iter::once(verbosity.other_level().to_string().to_lowercase())
        .chain(
            CRATE_TARGETS
                .iter()
                .map(|target| format!("{target}={}", crate_level.to_string().to_lowercase())),
        )
        .collect::<Vec<_>>()
        .join(",")
}
