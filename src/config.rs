mod file;
mod settings;

pub use file::File;
pub use settings::{Data, Ethereum, Logging, Monero, Settings};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

pub fn read_config(
    config_file: &Option<PathBuf>,
    default_path: fn() -> anyhow::Result<PathBuf>,
) -> anyhow::Result<File> {
    let path = match config_file {
        Some(path) => {
            eprintln!("Using config file {}", path.display());
            path.clone()
        }
        None => {
            let path = default_path()?;
            if !path.exists() {
                return Ok(File::default());
            }

            eprintln!("Using config file at default path: {}", path.display());
            path
        }
    };

    File::read(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))
}

/// The deployment environment a swap daemon runs against.
///
/// It selects the expected ethereum chain id, the default endpoints and the
/// duration between the two on-chain timeouts.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Mainnet,
    Stagenet,
    Development,
}

impl Environment {
    pub fn chain_id(&self) -> u64 {
        match self {
            Environment::Mainnet => 1,
            Environment::Stagenet => 11_155_111,
            Environment::Development => 1337,
        }
    }

    /// The duration between a swap's two timeouts, i.e. `t1 - t0`, and also
    /// the expected distance between contract creation and `t0`.
    pub fn swap_timeout(&self) -> Duration {
        match self {
            Environment::Mainnet | Environment::Stagenet => Duration::from_secs(60 * 60),
            Environment::Development => Duration::from_secs(2 * 60),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Mainnet
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Environment::Mainnet),
            "stagenet" => Ok(Environment::Stagenet),
            "dev" | "development" => Ok(Environment::Development),
            other => anyhow::bail!("unknown environment: {}", other),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Environment::Mainnet => "mainnet",
            Environment::Stagenet => "stagenet",
            Environment::Development => "development",
        };
        write!(f, "{}", s)
    }
}
