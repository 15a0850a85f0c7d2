//! Namespaced, time-windowed key derivation.
//!
//! One master secret fans out into many short-lived, purpose-separated
//! subkeys:
//!
//!   scheduling_key  = PRF(secret, "graphseal.schedule\nv=..\nkey_lifetime=..")
//!   encryption_root = PRF(scheduling_key, "encryption")
//!   signing_root    = PRF(scheduling_key, "signatures")
//!   per call:         PRF(root, "t=<window>\n" || namespace)
//!
//! The encryption and signing roots live under separate labels, so the two
//! derived subkeys are computationally independent. Every subkey is scoped
//! to a namespace and to a coarse time window, which bounds the useful
//! lifetime of a compromised subkey regardless of any token's explicit ttl.
//! Bumping [`FORMAT_VERSION`] changes the scheduling key and thereby
//! invalidates every previously issued token; there is no migration path
//! and none is intended.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::Error;

/// Format version, folded into the scheduling-key domain string.
pub const FORMAT_VERSION: &str = "1";

/// AES-256 key length; the encryption subkey is truncated to this.
pub(crate) const ENC_KEY_LEN: usize = 32;

/// Keyed PRF backing derivation and authentication tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrfAlgorithm {
    HmacSha256,
    HmacSha512,
}

impl PrfAlgorithm {
    /// PRF output length, which is also the on-wire tag length.
    pub fn output_len(self) -> usize {
        match self {
            PrfAlgorithm::HmacSha256 => 32,
            PrfAlgorithm::HmacSha512 => 64,
        }
    }

    pub(crate) fn mac_parts(self, key: &[u8], parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
        match self {
            PrfAlgorithm::HmacSha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                for part in parts {
                    mac.update(part);
                }
                Zeroizing::new(mac.finalize().into_bytes().to_vec())
            }
            PrfAlgorithm::HmacSha512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                for part in parts {
                    mac.update(part);
                }
                Zeroizing::new(mac.finalize().into_bytes().to_vec())
            }
        }
    }
}

/// An encryption/authentication subkey pair for one namespace and window.
pub struct SubkeyPair {
    pub(crate) enc_key: Zeroizing<[u8; ENC_KEY_LEN]>,
    pub(crate) sig_key: Zeroizing<Vec<u8>>,
}

/// Derives window-scoped subkey pairs from a master secret.
///
/// Stateless after construction apart from the two cached roots, so one
/// schedule is safe to share across threads.
pub struct KeySchedule {
    prf: PrfAlgorithm,
    key_lifetime_secs: u64,
    encryption_root: Zeroizing<Vec<u8>>,
    signing_root: Zeroizing<Vec<u8>>,
}

impl KeySchedule {
    pub fn new(
        master_secret: &[u8],
        prf: PrfAlgorithm,
        key_lifetime_secs: u64,
    ) -> Result<Self, Error> {
        if master_secret.is_empty() {
            return Err(Error::Configuration("master secret must not be empty"));
        }
        if key_lifetime_secs == 0 {
            return Err(Error::Configuration("key lifetime must be positive"));
        }
        let domain =
            format!("graphseal.schedule\nv={FORMAT_VERSION}\nkey_lifetime={key_lifetime_secs}");
        let scheduling_key = prf.mac_parts(master_secret, &[domain.as_bytes()]);
        let encryption_root = prf.mac_parts(&scheduling_key, &[b"encryption"]);
        let signing_root = prf.mac_parts(&scheduling_key, &[b"signatures"]);
        Ok(Self {
            prf,
            key_lifetime_secs,
            encryption_root,
            signing_root,
        })
    }

    /// Key window containing `now`, shifted by `offset` windows.
    pub fn window(&self, now: u64, offset: i64) -> i64 {
        (now / self.key_lifetime_secs) as i64 + offset
    }

    /// Derives the subkey pair for one namespace and window.
    pub fn window_keys(&self, namespace: &[u8], now: u64, offset: i64) -> SubkeyPair {
        let label = format!("t={}\n", self.window(now, offset));
        let enc_full = self
            .prf
            .mac_parts(&self.encryption_root, &[label.as_bytes(), namespace]);
        let sig_key = self
            .prf
            .mac_parts(&self.signing_root, &[label.as_bytes(), namespace]);
        let mut enc_key = Zeroizing::new([0u8; ENC_KEY_LEN]);
        enc_key.copy_from_slice(&enc_full[..ENC_KEY_LEN]);
        SubkeyPair { enc_key, sig_key }
    }

    pub(crate) fn prf(&self) -> PrfAlgorithm {
        self.prf
    }

    /// On-wire authentication tag length.
    pub fn tag_len(&self) -> usize {
        self.prf.output_len()
    }
}
