use crate::{
    config::{file, Environment, File},
    ethereum, fs,
};
use anyhow::Context;
use std::path::PathBuf;
use url::Url;

/// The effective configuration of the daemon, with all defaults filled in.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub environment: Environment,
    pub data: Data,
    pub logging: Logging,
    pub ethereum: Ethereum,
    pub monero: Monero,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Data {
    pub dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Logging {
    pub level: tracing::Level,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: tracing::Level::INFO,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ethereum {
    pub chain_id: u64,
    pub node_url: Url,
    /// Address of the deployed escrow contract. There is no default on the
    /// development environment, where the contract is deployed at startup.
    pub swap_creator_addr: Option<ethereum::Address>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Monero {
    pub daemon_url: Url,
    pub wallet_rpc_url: Url,
}

impl Settings {
    pub fn from_config_file_and_defaults(
        config_file: File,
        environment: Option<Environment>,
    ) -> anyhow::Result<Self> {
        let File {
            environment: file_environment,
            data,
            logging,
            ethereum,
            monero,
        } = config_file;

        let environment = environment.or(file_environment).unwrap_or_default();

        let data = {
            let default_dir = || {
                fs::data_dir()
                    .map(|dir| dir.join(environment.to_string()))
                    .context("unable to determine default data dir")
            };
            match data {
                Some(file::Data { dir }) => Data { dir },
                None => Data { dir: default_dir()? },
            }
        };

        let logging = match logging {
            None => Logging::default(),
            Some(file::Logging { level: None }) => Logging::default(),
            Some(file::Logging { level: Some(level) }) => Logging {
                level: level.into(),
            },
        };

        let ethereum = {
            let file::Ethereum {
                chain_id,
                node_url,
                swap_creator_addr,
            } = ethereum.unwrap_or(file::Ethereum {
                chain_id: None,
                node_url: None,
                swap_creator_addr: None,
            });

            let chain_id = chain_id.unwrap_or_else(|| environment.chain_id());
            anyhow::ensure!(
                chain_id == environment.chain_id(),
                "chain id {} does not match environment {}",
                chain_id,
                environment
            );

            let node_url = match node_url {
                Some(url) => url,
                None => default_eth_node_url(environment)?,
            };

            let swap_creator_addr =
                swap_creator_addr.or_else(|| default_swap_creator_addr(environment));

            Ethereum {
                chain_id,
                node_url,
                swap_creator_addr,
            }
        };

        let monero = {
            let file::Monero {
                daemon_url,
                wallet_rpc_url,
            } = monero.unwrap_or(file::Monero {
                daemon_url: None,
                wallet_rpc_url: None,
            });

            Monero {
                daemon_url: match daemon_url {
                    Some(url) => url,
                    None => default_monero_daemon_url(environment)?,
                },
                wallet_rpc_url: match wallet_rpc_url {
                    Some(url) => url,
                    None => "http://127.0.0.1:18083/json_rpc"
                        .parse()
                        .context("default monero wallet rpc url")?,
                },
            }
        };

        Ok(Settings {
            environment,
            data,
            logging,
            ethereum,
            monero,
        })
    }
}

fn default_eth_node_url(environment: Environment) -> anyhow::Result<Url> {
    let url = match environment {
        // No reliable permissionless mainnet endpoint exists, a local node is assumed.
        Environment::Mainnet => "http://localhost:8545",
        Environment::Stagenet => "https://rpc.sepolia.org",
        Environment::Development => "http://localhost:8545",
    };
    url.parse().context("default ethereum node url")
}

fn default_swap_creator_addr(environment: Environment) -> Option<ethereum::Address> {
    let addr = match environment {
        Environment::Mainnet => "0xa55aa5557ec22e85804729bc6935029bb84cf16a",
        Environment::Stagenet => "0x377ed3a60007048df00135637521170628de89e5",
        Environment::Development => return None,
    };
    addr.parse().ok()
}

fn default_monero_daemon_url(environment: Environment) -> anyhow::Result<Url> {
    let url = match environment {
        Environment::Mainnet => "http://node.sethforprivacy.com:18089",
        Environment::Stagenet => "http://node.sethforprivacy.com:38089",
        Environment::Development => "http://127.0.0.1:18081",
    };
    url.parse().context("default monero daemon url")
}
