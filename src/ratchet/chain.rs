use crate::Error;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Symmetric-key ratchet chain for deriving message keys
#[derive(Clone)]
pub(crate) struct Chain {
    chain_key: [u8; 32],
    index: u32,
}

impl Chain {
    pub(crate) fn new(chain_key: [u8; 32]) -> Self {
        Self {
            chain_key,
            index: 0,
        }
    }

    /// Advances the chain and returns the message key for the current index.
    ///
    /// `mk = HMAC(ck, 0x01)`, `ck' = HMAC(ck, 0x02)`.
    pub(crate) fn next(&mut self) -> Result<[u8; 32], Error> {
        let next_index = self
            .index
            .checked_add(1)
            .ok_or_else(|| Error::Session("Chain index exhausted".to_string()))?;

        let message_key = self.mac(0x01)?;
        self.chain_key = self.mac(0x02)?;
        self.index = next_index;

        Ok(message_key)
    }

    fn mac(&self, constant: u8) -> Result<[u8; 32], Error> {
        let mut mac = HmacSha256::new_from_slice(&self.chain_key)
            .map_err(|_| Error::InvalidKey("HMAC initialization failed".to_string()))?;
        mac.update(&[constant]);

        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    /// Number of message keys derived from this chain so far.
    pub(crate) fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}
