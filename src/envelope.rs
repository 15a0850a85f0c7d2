//! Envelope protocol: encode, derive, encrypt, authenticate, frame.
//!
//! Token (base64url, no padding):
//!   tag[S] || iv[16] || ciphertext[n*16]        S = PRF output length
//!
//! Plaintext layout before encryption:
//!   timestamp[8 BE] || ttl[8 BE] || codec bytes || pad[1..=16, value = count]
//!
//! The tag covers `iv || ciphertext` (encrypt-then-MAC) and is verified,
//! through the hardened comparator, before the encryption key touches a
//! single ciphertext byte. Expiry is checked before padding removal and
//! decoding, so no attacker-controlled byte reaches the codec or a
//! decompressor until authenticity and freshness are established.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::codec::{Codec, DEFAULT_MAX_DECODE_BYTES};
use crate::ct;
use crate::error::{CodecError, Error};
use crate::schedule::{KeySchedule, PrfAlgorithm, SubkeyPair};
use crate::value::ValueGraph;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Cipher block length; also the IV length.
pub const BLOCK_LEN: usize = 16;

/// timestamp[8] || ttl[8]
const HEADER_LEN: usize = 16;

/// Verification offsets: current window first, then the straddle cases.
const WINDOW_OFFSETS: [i64; 3] = [0, -1, 1];

/// Construction parameters for [`Envelope`].
pub struct EnvelopeConfig {
    /// Long-lived master secret; consumed and zeroized at construction.
    pub master_secret: Vec<u8>,
    /// Used when `seal` is called without an explicit ttl.
    pub default_ttl_secs: u64,
    /// Rotation granularity of derived subkeys.
    pub key_lifetime_secs: u64,
    /// PRF backing derivation and tags; fixes the on-wire tag length.
    pub prf: PrfAlgorithm,
    /// Allocation ceiling for decoding opened tokens.
    pub max_decode_bytes: usize,
    /// Optional pre-trained zstd dictionary for the codec.
    pub zstd_dictionary: Option<Vec<u8>>,
}

impl EnvelopeConfig {
    pub fn new(master_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            master_secret: master_secret.into(),
            default_ttl_secs: 3600,
            key_lifetime_secs: 3600,
            prf: PrfAlgorithm::HmacSha256,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
            zstd_dictionary: None,
        }
    }
}

/// Seals value graphs into authenticated tokens and opens them again.
///
/// Stateless across calls apart from the key schedule's cached roots;
/// safe for concurrent use from multiple threads.
pub struct Envelope {
    schedule: KeySchedule,
    codec: Codec,
    clock: Box<dyn Clock>,
    default_ttl_secs: u64,
}

impl Envelope {
    pub fn new(config: EnvelopeConfig) -> Result<Self, Error> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// Constructs an envelope with an explicit clock capability.
    pub fn with_clock(config: EnvelopeConfig, clock: Box<dyn Clock>) -> Result<Self, Error> {
        if config.default_ttl_secs == 0 {
            return Err(Error::Configuration("default ttl must be positive"));
        }
        if config.max_decode_bytes == 0 {
            return Err(Error::Configuration("decode ceiling must be positive"));
        }
        let master_secret = Zeroizing::new(config.master_secret);
        let schedule = KeySchedule::new(&master_secret, config.prf, config.key_lifetime_secs)?;
        let mut codec = Codec::new().with_ceiling(config.max_decode_bytes);
        if let Some(dictionary) = config.zstd_dictionary {
            codec = codec.with_zstd_dictionary(dictionary);
        }
        debug!(
            prf = ?config.prf,
            key_lifetime_secs = config.key_lifetime_secs,
            "envelope constructed"
        );
        Ok(Self {
            schedule,
            codec,
            clock,
            default_ttl_secs: config.default_ttl_secs,
        })
    }

    /// Seals a value graph under `namespace`.
    ///
    /// `ttl_secs` defaults to the configured ttl when `None`.
    pub fn seal(
        &self,
        graph: &ValueGraph,
        namespace: &[u8],
        ttl_secs: Option<u64>,
    ) -> Result<String, Error> {
        let now = self.clock.now_unix();
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        let encoded = self.codec.encode(graph)?;

        let mut plaintext = Zeroizing::new(Vec::with_capacity(HEADER_LEN + encoded.len()));
        plaintext.extend_from_slice(&now.to_be_bytes());
        plaintext.extend_from_slice(&ttl.to_be_bytes());
        plaintext.extend_from_slice(&encoded);

        let keys = self.schedule.window_keys(namespace, now, 0);
        let mut iv = [0u8; BLOCK_LEN];
        getrandom::getrandom(&mut iv).map_err(|_| Error::Rng)?;
        let ciphertext = Aes256CbcEnc::new_from_slices(keys.enc_key.as_slice(), &iv)
            .map_err(|_| Error::Configuration("cipher key or iv length"))?
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let tag = self
            .schedule
            .prf()
            .mac_parts(&keys.sig_key, &[&iv, &ciphertext]);

        let mut frame = Vec::with_capacity(tag.len() + BLOCK_LEN + ciphertext.len());
        frame.extend_from_slice(&tag);
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(&frame))
    }

    /// Opens a token sealed under `namespace`. Fails closed.
    pub fn open(&self, token: &str, namespace: &[u8]) -> Result<ValueGraph, Error> {
        let frame = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| Error::MalformedToken)?;
        let tag_len = self.schedule.tag_len();
        if frame.len() < tag_len + 2 * BLOCK_LEN {
            return Err(Error::MalformedToken);
        }
        let (tag, body) = frame.split_at(tag_len);
        if body.len() % BLOCK_LEN != 0 {
            return Err(Error::MalformedToken);
        }

        let now = self.clock.now_unix();
        let mut matched: Option<SubkeyPair> = None;
        for offset in WINDOW_OFFSETS {
            let keys = self.schedule.window_keys(namespace, now, offset);
            let expected = self.schedule.prf().mac_parts(&keys.sig_key, &[body]);
            trace!(offset, "verifying tag against window");
            if ct::equals_hardened(&expected, tag)? {
                matched = Some(keys);
                break;
            }
        }
        let keys = match matched {
            Some(keys) => keys,
            None => {
                debug!("token failed authentication in every window");
                return Err(Error::InvalidToken);
            }
        };

        // Authenticated from here on.
        let (iv, ciphertext) = body.split_at(BLOCK_LEN);
        let plaintext = Zeroizing::new(
            Aes256CbcDec::new_from_slices(keys.enc_key.as_slice(), iv)
                .map_err(|_| Error::InvalidToken)?
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                .map_err(|_| Error::InvalidToken)?,
        );
        if plaintext.len() < HEADER_LEN + 1 {
            return Err(Error::Codec(CodecError::Truncated));
        }

        let mut field = [0u8; 8];
        field.copy_from_slice(&plaintext[..8]);
        let timestamp = u64::from_be_bytes(field);
        field.copy_from_slice(&plaintext[8..HEADER_LEN]);
        let ttl = u64::from_be_bytes(field);

        // Freshness before any parsing of the payload.
        let age = now.saturating_sub(timestamp);
        if age > ttl {
            debug!(age, ttl, "token expired");
            return Err(Error::ExpiredToken);
        }

        // Padding is trusted: the tag covered these exact bytes.
        let pad = plaintext[plaintext.len() - 1] as usize;
        if pad == 0 || pad > BLOCK_LEN || plaintext.len() - HEADER_LEN < pad {
            return Err(Error::Codec(CodecError::BadPadding));
        }
        let payload = &plaintext[HEADER_LEN..plaintext.len() - pad];

        let graph = self.codec.decode(payload)?;
        Ok(graph)
    }
}
