//! Logging initialization: a single `tracing-subscriber`
//! `fmt` layer installed once at process start, honoring `RUST_LOG` and the
//! CLI's repeatable `-v`/`-q` verbosity flags.

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. `verbosity` is the CLI's net
/// `-v`/`-q` count: 0 is `info`, positive raises toward `trace`, negative
/// lowers toward `error`. `RUST_LOG`, if set, takes precedence entirely.
pub fn init(verbosity: i8) {
    let default_level = match verbosity {
        v if v <= -2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
