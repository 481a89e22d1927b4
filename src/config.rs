//! Daemon configuration. Deserialized from TOML; fields
//! absent from the file fall back to the core's built-in defaults. Grounded
//! in `asterism-labs-hadron`'s `serde`+`toml` config-loading convention.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::sync::stats::{DEFAULT_HISTORY_DEPTH, DEFAULT_WARM_UP};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {path}: {source}"))]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse config file {path}: {source}"))]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/blocksync/blocksyncd.sock")
}

fn default_tracer_dir() -> PathBuf {
    PathBuf::from("/dev/blocksync-tracer")
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/var/lock/blocksync")
}

fn default_history_depth() -> usize {
    DEFAULT_HISTORY_DEPTH
}

fn default_warm_up() -> usize {
    DEFAULT_WARM_UP
}

/// The daemon's startup configuration. Malformed config is fatal at
/// startup (`ConfigError`); it is never a per-job error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the local IPC socket the (external) request layer listens on.
    pub ipc_socket_path: PathBuf,
    /// Directory containing one tracer control node per traced device.
    pub tracer_node_dir: PathBuf,
    /// Directory holding one advisory lock file per device.
    pub device_lock_dir: PathBuf,
    /// Convergence history depth, overriding the built-in default.
    pub convergence_history_depth: usize,
    /// Convergence warm-up sample count, overriding the built-in default.
    pub convergence_warm_up: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ipc_socket_path: default_socket_path(),
            tracer_node_dir: default_tracer_dir(),
            device_lock_dir: default_lock_dir(),
            convergence_history_depth: default_history_depth(),
            convergence_warm_up: default_warm_up(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let contents = std::fs::read_to_string(path).context(ReadSnafu {
            path: path_str.clone(),
        })?;
        toml::from_str(&contents).context(ParseSnafu { path: path_str })
    }
}
