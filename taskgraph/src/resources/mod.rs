//! Cached handles to external contract readers.
//!
//! Tasks that read on-chain state need a [`ContractReader`] bound to one
//! contract and method on one chain. Readers are expensive to build, so the
//! [`ReaderManager`] caches them by [`ReaderKey`] and evicts the ones that
//! have not been used for a while.

mod manager;

pub use manager::ReaderManager;

use crate::errors::ReaderError;
use crate::vars::Value;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Result type for reader operations.
pub type ReaderResult<T> = Result<T, ReaderError>;

/// How settled the state being read must be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Latest state, possibly reorganised later.
    #[default]
    Unconfirmed,
    /// Finalized state only.
    Finalized,
}

/// A contract a reader is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundContract {
    /// Contract address.
    pub address: String,
    /// Contract name as known to the reader configuration.
    pub name: String,
}

/// Identifies a relayer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayId {
    /// Relay network, e.g. `evm`.
    pub network: String,
    /// Chain identifier within the network.
    pub chain_id: String,
}

impl RelayId {
    /// Creates a relay id.
    #[must_use]
    pub fn new(network: impl Into<String>, chain_id: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            chain_id: chain_id.into(),
        }
    }
}

/// A live handle for reading one contract's state.
#[async_trait]
pub trait ContractReader: Send + Sync {
    /// Starts the reader's background services.
    async fn start(&self) -> ReaderResult<()>;

    /// Stops the reader and releases its resources.
    async fn close(&self) -> ReaderResult<()>;

    /// Binds the reader to contracts.
    async fn bind(&self, contracts: &[BoundContract]) -> ReaderResult<()>;

    /// Reads the latest value of `read_identifier`.
    async fn get_latest_value(
        &self,
        read_identifier: &str,
        confidence: Confidence,
        params: &Value,
    ) -> ReaderResult<Value>;
}

/// Builds contract readers for one network and chain.
#[async_trait]
pub trait Relayer: Send + Sync {
    /// Creates an unbound reader from a raw reader configuration.
    async fn new_contract_reader(&self, config: &[u8]) -> ReaderResult<Arc<dyn ContractReader>>;
}

/// Looks up relayers.
pub trait RelayerGetter: Send + Sync {
    /// Returns the relayer for `relay_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::RelayerNotFound`] if none is registered.
    fn get(&self, relay_id: &RelayId) -> ReaderResult<Arc<dyn Relayer>>;
}

/// Joins the components of a [`ReaderKey`].
pub const KEY_SEPARATOR: &str = "/";

/// Identity of a cached reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReaderKey {
    network: String,
    chain_id: String,
    contract_address: String,
    method: String,
    key: String,
}

impl ReaderKey {
    /// Creates a key; every component must be non-empty and free of
    /// [`KEY_SEPARATOR`].
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::EmptyKeyComponent`] naming the first empty
    /// component, or [`ReaderError::InvalidKeyComponent`] naming the first one
    /// containing the separator.
    pub fn new(
        network: impl Into<String>,
        chain_id: impl Into<String>,
        contract_address: impl Into<String>,
        method: impl Into<String>,
    ) -> ReaderResult<Self> {
        let (network, chain_id, contract_address, method) =
            (network.into(), chain_id.into(), contract_address.into(), method.into());

        for (name, value) in [
            ("network", &network),
            ("chain_id", &chain_id),
            ("contract_address", &contract_address),
            ("method", &method),
        ] {
            if value.is_empty() {
                return Err(ReaderError::EmptyKeyComponent(name));
            }
            if value.contains(KEY_SEPARATOR) {
                return Err(ReaderError::InvalidKeyComponent(name));
            }
        }

        let key = [&network, &chain_id, &contract_address, &method]
            .map(String::as_str)
            .join(KEY_SEPARATOR);
        Ok(Self {
            network,
            chain_id,
            contract_address,
            method,
            key,
        })
    }

    /// The cache key: every component joined by [`KEY_SEPARATOR`].
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Relay network.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Chain identifier.
    #[must_use]
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Contract address.
    #[must_use]
    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    /// Method read through the reader.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The relayer that builds readers for this key.
    #[must_use]
    pub fn relay_id(&self) -> RelayId {
        RelayId::new(&self.network, &self.chain_id)
    }
}

impl fmt::Display for ReaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Everything needed to build the reader for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSpec {
    /// Cache identity.
    pub key: ReaderKey,
    /// Contract name the reader binds to.
    pub contract_name: String,
    /// Raw reader configuration handed to the relayer.
    pub config: Vec<u8>,
}

impl ReaderSpec {
    /// Creates a spec.
    #[must_use]
    pub fn new(key: ReaderKey, contract_name: impl Into<String>, config: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            contract_name: contract_name.into(),
            config: config.into(),
        }
    }

    /// The contract binding for this spec.
    #[must_use]
    pub fn binding(&self) -> BoundContract {
        BoundContract {
            address: self.key.contract_address.clone(),
            name: self.contract_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_joins_components() {
        let key = ReaderKey::new("evm", "1", "0xabc", "latestAnswer").unwrap();
        assert_eq!(key.as_str(), "evm/1/0xabc/latestAnswer");
        assert_eq!(key.to_string(), key.as_str());
        assert_eq!(key.relay_id(), RelayId::new("evm", "1"));
    }

    #[test]
    fn test_each_empty_component_is_rejected() {
        let cases = [
            (("", "1", "0xabc", "m"), "network"),
            (("evm", "", "0xabc", "m"), "chain_id"),
            (("evm", "1", "", "m"), "contract_address"),
            (("evm", "1", "0xabc", ""), "method"),
        ];
        for ((network, chain, address, method), component) in cases {
            assert_eq!(
                ReaderKey::new(network, chain, address, method),
                Err(ReaderError::EmptyKeyComponent(component))
            );
        }
    }

    #[test]
    fn test_shifted_components_give_distinct_keys() {
        let left = ReaderKey::new("evm", "12", "3", "m").unwrap();
        let right = ReaderKey::new("evm", "1", "23", "m").unwrap();
        assert_ne!(left.as_str(), right.as_str());
        assert_ne!(left, right);
    }

    #[test]
    fn test_separator_in_component_is_rejected() {
        assert_eq!(
            ReaderKey::new("evm", "1/2", "0xabc", "m"),
            Err(ReaderError::InvalidKeyComponent("chain_id"))
        );
        assert_eq!(
            ReaderKey::new("evm", "1", "0xabc", "get/latest"),
            Err(ReaderError::InvalidKeyComponent("method"))
        );
    }

    #[test]
    fn test_spec_binding() {
        let key = ReaderKey::new("evm", "1", "0xabc", "m").unwrap();
        let spec = ReaderSpec::new(key, "Aggregator", b"{}".to_vec());
        assert_eq!(
            spec.binding(),
            BoundContract {
                address: "0xabc".to_string(),
                name: "Aggregator".to_string()
            }
        );
    }
}
