use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ConfirmationError, SyncError};
use crate::events::EventDefinition;

/// Step sizes for ledgers whose block rate is known. Anything else falls back
/// to [`Synchronizer::default_step_size`].
const BUILTIN_STEP_SIZES: &[(&str, u64)] = &[("base", 500), ("base-sepolia", 500), ("arbitrum", 2500)];

/// The top-level configuration for the `chainlog-connector` library.
///
/// This struct aggregates the ledgers to talk to, the sources to mirror and the
/// behaviour of the synchronizer and confirmation waiter. It is typically
/// deserialized from a configuration file and handed to the `SyncManager`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectorConfig {
    /// Ledgers keyed by ledger id (e.g. `base`, `arbitrum`).
    #[serde(default)]
    pub ledgers: BTreeMap<String, LedgerConfig>,
    /// Event sources keyed by source id.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub synchronizer: Synchronizer,
    #[serde(default)]
    pub confirmation: Confirmation,
}

/// Connection settings for one ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerConfig {
    pub rpc_url: String,
    /// Overrides the built-in step size for this ledger.
    #[serde(default)]
    pub step_size: Option<u64>,
}

/// A deployed event emitter, possibly present on several ledgers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Block the source was deployed at. Used as the starting point when no
    /// checkpoint exists yet.
    #[serde(default)]
    pub deployment_block: u64,
    /// Source address keyed by ledger id.
    #[serde(default)]
    pub addresses: BTreeMap<String, String>,
    /// Event name to event signature (or literal primary topic).
    #[serde(default)]
    pub events: BTreeMap<String, String>,
}

/// Defines behavior of the window synchronizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Synchronizer {
    /// Step size for ledgers with neither a configured nor a built-in step size.
    pub default_step_size: u64,
    /// How long a sync lease is held before it is considered abandoned. Leases
    /// are not renewed, so this must cover the slowest expected run.
    pub lease_ttl_secs: u64,
    /// The interval at which the scheduler runs every configured (ledger, source) pair.
    pub poll_interval_secs: u64,
}

/// Defines how long and how often submitted transactions are checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Confirmation {
    /// Interval between receipt polls.
    pub poll_interval_ms: u64,
    /// Upper bound on the whole confirmation race.
    pub timeout_secs: u64,
}

/// Upper bound on the lease TTL: one week. Lease expiry is stored in epoch
/// milliseconds, so the bound also keeps it representable.
pub const MAX_LEASE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

impl Synchronizer {
    /// The lease TTL. Zero would make every lease expire on creation.
    pub fn lease_ttl(&self) -> Result<Duration, SyncError> {
        if self.lease_ttl_secs == 0 {
            return Err(SyncError::Configuration(
                "synchronizer lease-ttl-secs must be positive".to_string(),
            ));
        }
        if self.lease_ttl_secs > MAX_LEASE_TTL_SECS {
            return Err(SyncError::Configuration(format!(
                "synchronizer lease-ttl-secs must not exceed {MAX_LEASE_TTL_SECS}"
            )));
        }
        Ok(Duration::from_secs(self.lease_ttl_secs))
    }
}

impl Confirmation {
    /// The receipt poll interval. Zero would poll the node in a tight loop.
    pub fn poll_interval(&self) -> Result<Duration, ConfirmationError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfirmationError::Configuration(
                "confirmation poll-interval-ms must be positive".to_string(),
            ));
        }
        Ok(Duration::from_millis(self.poll_interval_ms))
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self {
            default_step_size: 750,
            lease_ttl_secs: 300,
            poll_interval_secs: 60,
        }
    }
}

impl Default for Confirmation {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            timeout_secs: 300,
        }
    }
}

impl ConnectorConfig {
    pub fn ledger(&self, ledger_id: &str) -> Result<&LedgerConfig, SyncError> {
        self.ledgers
            .get(ledger_id)
            .ok_or_else(|| SyncError::UnknownLedger(ledger_id.to_string()))
    }

    pub fn source(&self, source_id: &str) -> Result<&SourceConfig, SyncError> {
        self.sources
            .get(source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))
    }

    /// Resolves the step size of a ledger: configured value, then built-in value,
    /// then the synchronizer default.
    pub fn step_size_for(&self, ledger_id: &str) -> u64 {
        self.ledgers
            .get(ledger_id)
            .and_then(|ledger| ledger.step_size)
            .or_else(|| {
                BUILTIN_STEP_SIZES
                    .iter()
                    .find(|(id, _)| *id == ledger_id)
                    .map(|(_, step)| *step)
            })
            .unwrap_or(self.synchronizer.default_step_size)
    }

    /// Every (ledger, source) pair that has an address configured.
    pub fn sync_pairs(&self) -> Vec<(String, String)> {
        self.sources
            .iter()
            .flat_map(|(source_id, source)| {
                source
                    .addresses
                    .keys()
                    .map(move |ledger_id| (ledger_id.clone(), source_id.clone()))
            })
            .collect()
    }
}

impl SourceConfig {
    pub fn address_on(&self, ledger_id: &str) -> Option<&str> {
        self.addresses.get(ledger_id).map(String::as_str)
    }

    pub fn event_definitions(&self) -> Vec<EventDefinition> {
        self.events
            .iter()
            .map(|(name, selector)| EventDefinition::new(name, selector))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectorConfig {
        let mut config = ConnectorConfig::default();
        for (id, step) in [("base", None), ("arbitrum", None), ("polygon", Some(1200)), ("mainnet", None)] {
            config.ledgers.insert(
                id.to_string(),
                LedgerConfig {
                    rpc_url: format!("http://{id}.local"),
                    step_size: step,
                },
            );
        }
        config
    }

    #[test]
    fn step_size_resolution_order() {
        let config = config();
        assert_eq!(config.step_size_for("base"), 500);
        assert_eq!(config.step_size_for("base-sepolia"), 500);
        assert_eq!(config.step_size_for("arbitrum"), 2500);
        assert_eq!(config.step_size_for("polygon"), 1200);
        assert_eq!(config.step_size_for("mainnet"), 750);
        assert_eq!(config.step_size_for("unheard-of"), 750);
    }

    #[test]
    fn unknown_ids_are_configuration_errors() {
        let config = config();
        assert!(matches!(config.ledger("nope"), Err(SyncError::UnknownLedger(_))));
        assert!(matches!(config.source("nope"), Err(SyncError::UnknownSource(_))));
    }

    #[test]
    fn sync_pairs_follow_addresses() {
        let mut config = config();
        let mut source = SourceConfig::default();
        source.addresses.insert("base".into(), "0xabc".into());
        source.addresses.insert("arbitrum".into(), "0xdef".into());
        config.sources.insert("token".into(), source);

        let pairs = config.sync_pairs();
        assert_eq!(
            pairs,
            vec![
                ("arbitrum".to_string(), "token".to_string()),
                ("base".to_string(), "token".to_string())
            ]
        );
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let synchronizer = Synchronizer {
            lease_ttl_secs: 0,
            ..Default::default()
        };
        assert!(matches!(synchronizer.lease_ttl(), Err(SyncError::Configuration(_))));
        assert_eq!(Synchronizer::default().lease_ttl().unwrap(), Duration::from_secs(300));

        let synchronizer = Synchronizer {
            lease_ttl_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(synchronizer.lease_ttl(), Err(SyncError::Configuration(_))));

        let confirmation = Confirmation {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            confirmation.poll_interval(),
            Err(ConfirmationError::Configuration(_))
        ));
        assert_eq!(
            Confirmation::default().poll_interval().unwrap(),
            Duration::from_millis(3000)
        );
    }
}
