//! # graphseal
//!
//! Authenticated envelopes for structured value graphs.
//!
//! A caller-supplied master secret seals arbitrary value graphs — numbers,
//! booleans, null, strings, byte strings, lists, mappings, tuples, and
//! cyclic or shared references among them — into opaque encrypt-then-MAC
//! tokens, and opens them again while rejecting anything tampered with,
//! forged, or expired.
//!
//! ## Quick Start
//!
//! ```rust
//! use graphseal::{Envelope, EnvelopeConfig, ValueGraph};
//!
//! let envelope = Envelope::new(EnvelopeConfig::new(&b"a master secret"[..])).unwrap();
//!
//! let mut graph = ValueGraph::new();
//! let greeting = graph.text("hello");
//! let count = graph.int(3);
//! let root = graph.list(vec![greeting, count]);
//! graph.set_root(root);
//!
//! let token = envelope.seal(&graph, b"session", Some(60)).unwrap();
//! let opened = envelope.open(&token, b"session").unwrap();
//! assert!(graph.deep_eq(&opened));
//! ```
//!
//! ## Security Properties
//!
//! - **Encrypt-then-MAC**: the tag covers `iv || ciphertext` and is checked
//!   before decryption; expiry is checked before decoding
//! - **Windowed keys**: every subkey is scoped to a namespace and a coarse
//!   time window, derived from domain-separated PRF roots
//! - **Uniform failure**: authentication failure is one opaque error, no
//!   matter which window or byte disagreed
//! - **Constant-time verification**: tags are compared through a hardened,
//!   randomly re-keyed comparator
//!
//! ## What's NOT Provided
//!
//! - Key management or secret storage
//! - Schema evolution — bumping the format version invalidates all tokens
//! - Transport or storage of the resulting tokens

#![deny(unsafe_code)]

// ---------------------------------------------------------------------------
// Internal modules
// ---------------------------------------------------------------------------

mod envelope;
mod error;
mod varint;

// Capability modules, usable on their own
pub mod clock;
pub mod codec;
pub mod compress;
pub mod ct;
pub mod schedule;
pub mod value;

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

pub use clock::{Clock, SystemClock};
pub use codec::{Codec, DEFAULT_MAX_DECODE_BYTES};
pub use envelope::{Envelope, EnvelopeConfig, BLOCK_LEN};
pub use error::{CodecError, Error};
pub use schedule::{KeySchedule, PrfAlgorithm, SubkeyPair, FORMAT_VERSION};
pub use value::{NodeId, Value, ValueGraph};
