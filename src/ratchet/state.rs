use crate::kdf::derive_key_array;
use crate::ratchet::chain::Chain;
use crate::ratchet::skipped::StagedKeys;
use crate::{Error, RatchetConfig, X25519PublicKey, X25519Secret};
use std::collections::VecDeque;
use zeroize::Zeroize;

/// A receiving chain that was replaced by a DH ratchet step.
#[derive(Clone)]
pub(crate) struct RetiredChain {
    pub(crate) ratchet_key: X25519PublicKey,
    pub(crate) generation: u32,
    /// First index whose key was never derived.
    pub(crate) next_index: u32,
}

/// Where the receiving side stands with a remote ratchet key.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum KnownKey {
    /// The live receiving chain.
    Current(u32),
    /// A retired chain whose skipped keys may still be held.
    Retired { generation: u32, next_index: u32 },
    /// A chain whose keys have all been evicted.
    Expired(u32),
}

/// Chains, keys and counters of a session. Operations run on a clone of this
/// value and the clone replaces the original only on success; skipped-key
/// store edits are staged separately in a [`StagedKeys`].
#[derive(Clone)]
pub(crate) struct RatchetState {
    pub(crate) root_key: [u8; 32],
    pub(crate) dh_self: X25519Secret,
    pub(crate) dh_remote: Option<X25519PublicKey>,

    pub(crate) sending_chain: Option<Chain>,
    pub(crate) receiving_chain: Option<Chain>,
    pub(crate) receiving_generation: u32,
    pub(crate) previous_sending_chain_length: u32,

    // Oldest first.
    pub(crate) retired_chains: VecDeque<RetiredChain>,
    pub(crate) expired_chains: VecDeque<(X25519PublicKey, u32)>,
}

/// Root KDF: `(root', chain) = derive_keys(dh_output, salt = root)`.
pub(crate) fn kdf_rk(root_key: &[u8; 32], dh_output: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), Error> {
    let [new_root_key, chain_key] = derive_key_array::<2>(dh_output, Some(root_key))?;
    Ok((new_root_key, chain_key))
}

impl RatchetState {
    pub(crate) fn new(root_key: [u8; 32], dh_self: X25519Secret) -> Self {
        Self {
            root_key,
            dh_self,
            dh_remote: None,
            sending_chain: None,
            receiving_chain: None,
            receiving_generation: 0,
            previous_sending_chain_length: 0,
            retired_chains: VecDeque::new(),
            expired_chains: VecDeque::new(),
        }
    }

    /// Looks up the receiving chain a ratchet key belongs to.
    pub(crate) fn lookup(&self, ratchet_key: &X25519PublicKey) -> Option<KnownKey> {
        if self.receiving_chain.is_some() && self.dh_remote.as_ref() == Some(ratchet_key) {
            return Some(KnownKey::Current(self.receiving_generation));
        }
        if let Some(chain) = self.retired_chains.iter().find(|chain| &chain.ratchet_key == ratchet_key) {
            return Some(KnownKey::Retired {
                generation: chain.generation,
                next_index: chain.next_index,
            });
        }
        self.expired_chains
            .iter()
            .find(|(key, _)| key == ratchet_key)
            .map(|(_, generation)| KnownKey::Expired(*generation))
    }

    /// Stages receiving-chain message keys up to (excluding) `until`.
    pub(crate) fn skip_message_keys(
        &mut self,
        until: u32,
        config: &RatchetConfig,
        staged: &mut StagedKeys,
    ) -> Result<(), Error> {
        let generation = self.receiving_generation;
        let Some(chain) = self.receiving_chain.as_mut() else {
            return Ok(());
        };

        let requested = until.saturating_sub(chain.index());
        if requested > config.max_skip {
            return Err(Error::SkipLimitExceeded {
                requested,
                max: config.max_skip,
            });
        }

        while chain.index() < until {
            let index = chain.index();
            let message_key = chain.next()?;
            staged.insert((generation, index), message_key);
        }
        Ok(())
    }

    /// Diffie-Hellman ratchet step towards `remote`.
    ///
    /// Installs a fresh receiving chain (index 0) and a fresh key pair with
    /// its sending chain (index 0). The previous receiving chain is retired.
    pub(crate) fn dh_ratchet(
        &mut self,
        remote: X25519PublicKey,
        config: &RatchetConfig,
        staged: &mut StagedKeys,
    ) -> Result<(), Error> {
        let retiring = self.receiving_chain.as_ref().map(Chain::index);
        if let (Some(previous), Some(next_index)) = (self.dh_remote.take(), retiring) {
            self.retire(previous, next_index, config, staged);
        }

        self.previous_sending_chain_length = self.sending_chain.as_ref().map_or(0, Chain::index);
        self.receiving_generation = self
            .receiving_generation
            .checked_add(1)
            .ok_or_else(|| Error::Session("Ratchet generation exhausted".to_string()))?;

        // Derive new receiving chain
        let mut dh_output = self.dh_self.dh(&remote)?;
        let (root_key, chain_key) = kdf_rk(&self.root_key, &dh_output)?;
        self.root_key = root_key;
        self.receiving_chain = Some(Chain::new(chain_key));
        self.dh_remote = Some(remote);

        // Generate new DH key pair
        self.dh_self = X25519Secret::generate()?;

        // Derive new sending chain
        dh_output = self.dh_self.dh(&remote)?;
        let (root_key, chain_key) = kdf_rk(&self.root_key, &dh_output)?;
        dh_output.zeroize();
        self.root_key = root_key;
        self.sending_chain = Some(Chain::new(chain_key));

        Ok(())
    }

    fn retire(
        &mut self,
        ratchet_key: X25519PublicKey,
        next_index: u32,
        config: &RatchetConfig,
        staged: &mut StagedKeys,
    ) {
        self.retired_chains.push_back(RetiredChain {
            ratchet_key,
            generation: self.receiving_generation,
            next_index,
        });
        while self.retired_chains.len() > config.max_retired_chains {
            let Some(chain) = self.retired_chains.pop_front() else {
                break;
            };
            staged.evict_generation(chain.generation);
            self.expired_chains.push_back((chain.ratchet_key, chain.generation));
        }
        while self.expired_chains.len() > config.max_expired_chains {
            self.expired_chains.pop_front();
        }
    }
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}
