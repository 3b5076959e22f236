use crate::{
    config::{settings, Environment, Settings},
    ethereum,
};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, path::Path, path::PathBuf};
use url::Url;

/// This struct aims to represent the configuration file as it appears on disk.
///
/// Most importantly, optional elements of the configuration file are
/// represented as `Option`s` here. This allows us to create a dedicated step
/// for filling in default values for absent configuration options.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct File {
    pub environment: Option<Environment>,
    pub data: Option<Data>,
    pub logging: Option<Logging>,
    pub ethereum: Option<Ethereum>,
    pub monero: Option<Monero>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Data {
    pub dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Ethereum {
    pub chain_id: Option<u64>,
    pub node_url: Option<Url>,
    #[serde(default)]
    pub swap_creator_addr: Option<ethereum::Address>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Monero {
    pub daemon_url: Option<Url>,
    pub wallet_rpc_url: Option<Url>,
}

impl File {
    pub fn read<D>(config_file: D) -> Result<Self, config::ConfigError>
    where
        D: AsRef<OsStr>,
    {
        let config_file = Path::new(&config_file);

        config::Config::builder()
            .add_source(config::File::from(config_file))
            .build()?
            .try_deserialize()
    }
}

impl Default for File {
    fn default() -> Self {
        File {
            environment: None,
            data: None,
            logging: None,
            ethereum: None,
            monero: None,
        }
    }
}

impl From<Settings> for File {
    fn from(settings: Settings) -> Self {
        File {
            environment: Some(settings.environment),
            data: Some(Data {
                dir: settings.data.dir,
            }),
            logging: Some(Logging {
                level: Some(settings.logging.level.into()),
            }),
            ethereum: Some(Ethereum {
                chain_id: Some(settings.ethereum.chain_id),
                node_url: Some(settings.ethereum.node_url),
                swap_creator_addr: settings.ethereum.swap_creator_addr,
            }),
            monero: Some(Monero {
                daemon_url: Some(settings.monero.daemon_url),
                wallet_rpc_url: Some(settings.monero.wallet_rpc_url),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Logging {
    pub level: Option<Level>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::TRACE => Level::Trace,
        }
    }
}

impl From<Level> for tracing::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => tracing::Level::ERROR,
            Level::Warn => tracing::Level::WARN,
            Level::Info => tracing::Level::INFO,
            Level::Debug => tracing::Level::DEBUG,
            Level::Trace => tracing::Level::TRACE,
        }
    }
}

impl From<settings::Logging> for Logging {
    fn from(logging: settings::Logging) -> Self {
        Logging {
            level: Some(logging.level.into()),
        }
    }
}
