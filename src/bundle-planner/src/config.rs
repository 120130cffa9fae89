//! Per-chain bundler contract addresses.
//!
//! Loaded once at process start from a TOML/JSON file layered with
//! `BUNDLER__`-prefixed environment variables, e.g.
//! `BUNDLER__NETWORKS__8453__EXCHANGE_ADAPTER=0x...`, then validated and passed
//! into the pipeline by reference.

use std::collections::BTreeMap;
use std::path::Path;

use alloy_primitives::{address, Address};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::BundleError;

pub const BASE_CHAIN_ID: u64 = 8453;
pub const DEVNET_CHAIN_ID: u64 = 1337;

/// Contracts the planner routes through on one chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlerAddresses {
    /// Intermediary holding account and spender of pulled transfers.
    pub adapter: Address,
    /// Multicall entry point the encoded bundle is submitted to.
    #[serde(default)]
    pub bundler: Option<Address>,
    /// Sells assets it holds through an aggregator router.
    #[serde(default)]
    pub exchange_adapter: Option<Address>,
    /// Opens BTC auctions with the asset it holds.
    #[serde(default)]
    pub auction_adapter: Option<Address>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to load network registry: {0}")]
    Source(#[from] config::ConfigError),
    #[error("network key `{0}` is not a chain id")]
    InvalidChainId(String),
    #[error("chain {chain_id}: adapter is the zero address")]
    ZeroAdapter { chain_id: u64 },
    #[error("chain {chain_id}: {field} collides with the adapter")]
    AdapterCollision { chain_id: u64, field: &'static str },
    #[error("registry defines no networks")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    #[serde(default)]
    networks: BTreeMap<String, BundlerAddresses>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkRegistry {
    networks: BTreeMap<u64, BundlerAddresses>,
}

impl NetworkRegistry {
    /// Deployments known at build time.
    pub fn builtin() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            BASE_CHAIN_ID,
            BundlerAddresses {
                adapter: address!("b98c948CFA24072e58935BC004a8A7b376AE746A"),
                bundler: Some(address!("6BFd8137e702540E7A42B74178A4a49Ba43920C4")),
                exchange_adapter: Some(address!("6abE8ABd0275E5564ed1336F0243A52C32562F71")),
                auction_adapter: None,
            },
        );
        networks.insert(
            DEVNET_CHAIN_ID,
            BundlerAddresses {
                adapter: address!("Cf7Ed3AccA5a467e9e704C703E8D87F634fB0Fc9"),
                bundler: Some(address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0")),
                exchange_adapter: None,
                auction_adapter: Some(address!("Dc64a140Aa3E981100a9becA4E685f962f0cF6C9")),
            },
        );
        Self { networks }
    }

    /// Validates and indexes `networks`. Zero optional addresses mean "not deployed".
    pub fn from_networks(networks: BTreeMap<u64, BundlerAddresses>) -> Result<Self, RegistryError> {
        if networks.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut validated = BTreeMap::new();
        for (chain_id, mut addresses) in networks {
            if addresses.adapter == Address::ZERO {
                return Err(RegistryError::ZeroAdapter { chain_id });
            }
            addresses.bundler = addresses.bundler.filter(|a| *a != Address::ZERO);
            addresses.exchange_adapter = addresses.exchange_adapter.filter(|a| *a != Address::ZERO);
            addresses.auction_adapter = addresses.auction_adapter.filter(|a| *a != Address::ZERO);

            if addresses.bundler == Some(addresses.adapter) {
                return Err(RegistryError::AdapterCollision {
                    chain_id,
                    field: "bundler",
                });
            }
            if addresses.exchange_adapter == Some(addresses.adapter) {
                return Err(RegistryError::AdapterCollision {
                    chain_id,
                    field: "exchange_adapter",
                });
            }
            if addresses.auction_adapter == Some(addresses.adapter) {
                return Err(RegistryError::AdapterCollision {
                    chain_id,
                    field: "auction_adapter",
                });
            }
            validated.insert(chain_id, addresses);
        }

        Ok(Self { networks: validated })
    }

    /// Loads the registry from `path` (if any) and `BUNDLER__` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, RegistryError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(Environment::with_prefix("BUNDLER").separator("__"));

        let raw: RawRegistry = builder.build()?.try_deserialize()?;
        let mut networks = BTreeMap::new();
        for (key, addresses) in raw.networks {
            let chain_id = key
                .trim()
                .parse::<u64>()
                .map_err(|_| RegistryError::InvalidChainId(key.clone()))?;
            networks.insert(chain_id, addresses);
        }

        let registry = Self::from_networks(networks)?;
        tracing::debug!(chains = ?registry.chains().collect::<Vec<_>>(), "network registry loaded");
        Ok(registry)
    }

    pub fn addresses(&self, chain_id: u64) -> Result<&BundlerAddresses, BundleError> {
        self.networks
            .get(&chain_id)
            .ok_or(BundleError::UnknownNetwork(chain_id))
    }

    pub fn chains(&self) -> impl Iterator<Item = u64> + '_ {
        self.networks.keys().copied()
    }
}
