use serde::Deserialize;
use std::time::Duration;

/// Policy knobs for a pairwise ratchet session.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RatchetConfig {
    /// Largest gap between the expected and the received message index that
    /// will be bridged by caching intermediate message keys.
    pub max_skip: u32,
    /// Total number of skipped message keys retained per session. The oldest
    /// key is evicted first once the store is full.
    pub max_skipped_keys: usize,
    /// Number of previous receiving chains whose skipped keys stay reachable.
    pub max_retired_chains: usize,
    /// Number of evicted remote ratchet keys remembered so that late messages
    /// under them fail as expired instead of starting a new ratchet.
    pub max_expired_chains: usize,
    /// Age after which [`RatchetSession::sweep_skipped_keys`] drops a skipped key.
    ///
    /// [`RatchetSession::sweep_skipped_keys`]: crate::RatchetSession::sweep_skipped_keys
    pub skipped_key_ttl: Duration,
    /// Domain separation label mixed into every message AAD.
    pub protocol_info: Vec<u8>,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            max_skip: 1000,
            max_skipped_keys: 2000,
            max_retired_chains: 4,
            max_expired_chains: 64,
            skipped_key_ttl: Duration::from_secs(7 * 24 * 60 * 60), // 1 week
            protocol_info: b"Paladin-DR-v1".to_vec(),
        }
    }
}

/// Policy knobs for a ratchet-tree group.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Domain separation label for epoch secrets and sealed path secrets.
    pub protocol_info: Vec<u8>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            protocol_info: b"Paladin-MLS-v1".to_vec(),
        }
    }
}
