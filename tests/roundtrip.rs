//! Envelope seal/open round trips, expiry, tampering, and framing errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use graphseal::{
    Clock, CodecError, Envelope, EnvelopeConfig, Error, PrfAlgorithm, Value, ValueGraph,
};

/// Settable clock so every test controls the notion of "now".
#[derive(Clone)]
struct TestClock(Arc<AtomicU64>);

impl TestClock {
    fn at(now: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now)))
    }

    fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_unix(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn envelope_at(now: u64) -> (Envelope, TestClock) {
    let clock = TestClock::at(now);
    let env = Envelope::with_clock(
        EnvelopeConfig::new(&b"a master secret"[..]),
        Box::new(clock.clone()),
    )
    .unwrap();
    (env, clock)
}

fn sample_graph() -> ValueGraph {
    let mut graph = ValueGraph::new();
    let key_list = graph.text("list");
    let one = graph.int(1);
    let two = graph.int(2);
    let three = graph.int(3);
    let list = graph.list(vec![one, two, three]);
    let key_self = graph.text("self");
    let root = graph.map(vec![(key_list, list)]);
    if let Some(Value::Map(pairs)) = graph.get_mut(root) {
        pairs.push((key_self, root));
    }
    graph.set_root(root);
    graph
}

#[test]
fn roundtrip_basic() {
    let (env, _) = envelope_at(1_700_000_000);
    let graph = sample_graph();
    let token = env.seal(&graph, b"ns1", Some(60)).unwrap();
    let opened = env.open(&token, b"ns1").unwrap();
    assert!(graph.deep_eq(&opened));

    // the cycle survives the trip
    let root = opened.root().unwrap();
    let Some(Value::Map(pairs)) = opened.get(root) else {
        panic!("root is not a map");
    };
    assert!(pairs.iter().any(|&(_, v)| v == root));
}

#[test]
fn namespaces_are_isolated() {
    let (env, _) = envelope_at(1_700_000_000);
    let token = env.seal(&sample_graph(), b"ns1", Some(60)).unwrap();
    assert_eq!(env.open(&token, b"ns2"), Err(Error::InvalidToken));
    assert!(env.open(&token, b"ns1").is_ok());
}

#[test]
fn different_secrets_reject_each_other() {
    let clock = TestClock::at(1_700_000_000);
    let a = Envelope::with_clock(
        EnvelopeConfig::new(&b"secret a"[..]),
        Box::new(clock.clone()),
    )
    .unwrap();
    let b = Envelope::with_clock(
        EnvelopeConfig::new(&b"secret b"[..]),
        Box::new(clock.clone()),
    )
    .unwrap();
    let token = a.seal(&sample_graph(), b"ns", Some(60)).unwrap();
    assert_eq!(b.open(&token, b"ns"), Err(Error::InvalidToken));
}

#[test]
fn sealing_twice_yields_distinct_tokens() {
    let (env, _) = envelope_at(1_700_000_000);
    let graph = sample_graph();
    let t1 = env.seal(&graph, b"ns", Some(60)).unwrap();
    let t2 = env.seal(&graph, b"ns", Some(60)).unwrap();
    assert_ne!(t1, t2);
    assert!(env.open(&t1, b"ns").is_ok());
    assert!(env.open(&t2, b"ns").is_ok());
}

#[test]
fn tokens_are_url_safe() {
    let (env, _) = envelope_at(1_700_000_000);
    let mut graph = ValueGraph::new();
    graph.insert_root(Value::Bytes((0..=255u8).collect()));
    let token = env.seal(&graph, b"ns", Some(60)).unwrap();
    assert!(token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
}

#[test]
fn expiry_is_enforced() {
    let (env, clock) = envelope_at(1000);
    let token = env.seal(&sample_graph(), b"ns", Some(1)).unwrap();

    // age == ttl is still fresh
    clock.set(1001);
    assert!(env.open(&token, b"ns").is_ok());

    clock.set(1002);
    assert_eq!(env.open(&token, b"ns"), Err(Error::ExpiredToken));
}

#[test]
fn default_ttl_applies_when_unspecified() {
    let (env, clock) = envelope_at(1000);
    let token = env.seal(&sample_graph(), b"ns", None).unwrap();

    clock.set(1000 + 3600);
    assert!(env.open(&token, b"ns").is_ok());

    clock.set(1000 + 3601);
    assert_eq!(env.open(&token, b"ns"), Err(Error::ExpiredToken));
}

#[test]
fn open_straddles_window_boundaries() {
    // key lifetime 100s: seal just before a rotation, open just after,
    // and the reverse
    let clock = TestClock::at(199);
    let mut config = EnvelopeConfig::new(&b"a master secret"[..]);
    config.key_lifetime_secs = 100;
    let env = Envelope::with_clock(config, Box::new(clock.clone())).unwrap();

    let token = env.seal(&sample_graph(), b"ns", Some(600)).unwrap();
    clock.set(205);
    assert!(env.open(&token, b"ns").is_ok());

    clock.set(200);
    let token = env.seal(&sample_graph(), b"ns", Some(600)).unwrap();
    clock.set(199);
    assert!(env.open(&token, b"ns").is_ok());

    // two full windows away is out of tolerance
    clock.set(200);
    let token = env.seal(&sample_graph(), b"ns", Some(600)).unwrap();
    clock.set(405);
    assert_eq!(env.open(&token, b"ns"), Err(Error::InvalidToken));
}

#[test]
fn tampering_anywhere_is_invalid_not_malformed() {
    let (env, _) = envelope_at(1_700_000_000);
    let token = env.seal(&sample_graph(), b"ns", Some(60)).unwrap();
    let frame = URL_SAFE_NO_PAD.decode(token.as_bytes()).unwrap();

    // one bit in the tag, the iv, the first ciphertext block, the last byte
    for index in [0, 16, 31, 32, 40, 48, 64, frame.len() - 1] {
        let mut mutated = frame.clone();
        mutated[index] ^= 0x01;
        let forged = URL_SAFE_NO_PAD.encode(&mutated);
        assert_eq!(
            env.open(&forged, b"ns"),
            Err(Error::InvalidToken),
            "byte {index} flipped"
        );
    }
}

#[test]
fn truncated_ciphertext_is_invalid() {
    let (env, _) = envelope_at(1_700_000_000);
    let token = env.seal(&sample_graph(), b"ns", Some(60)).unwrap();
    let frame = URL_SAFE_NO_PAD.decode(token.as_bytes()).unwrap();

    // dropping a whole block keeps the framing plausible but breaks the tag
    let shortened = URL_SAFE_NO_PAD.encode(&frame[..frame.len() - 16]);
    assert_eq!(env.open(&shortened, b"ns"), Err(Error::InvalidToken));
}

#[test]
fn garbage_tokens_are_malformed() {
    let (env, _) = envelope_at(1_700_000_000);
    // not base64url
    assert_eq!(env.open("not a token!!", b"ns"), Err(Error::MalformedToken));
    assert_eq!(env.open("abc+/def", b"ns"), Err(Error::MalformedToken));
    // valid base64url, far too short to carry tag + iv + one block
    assert_eq!(env.open("AAAA", b"ns"), Err(Error::MalformedToken));
    assert_eq!(env.open("", b"ns"), Err(Error::MalformedToken));
    // long enough but not a whole number of blocks past the tag
    let odd = URL_SAFE_NO_PAD.encode(vec![0u8; 32 + 16 + 17]);
    assert_eq!(env.open(&odd, b"ns"), Err(Error::MalformedToken));
}

#[test]
fn sha512_prf_roundtrip() {
    let clock = TestClock::at(1_700_000_000);
    let mut config = EnvelopeConfig::new(&b"a master secret"[..]);
    config.prf = PrfAlgorithm::HmacSha512;
    let env = Envelope::with_clock(config, Box::new(clock.clone())).unwrap();

    let graph = sample_graph();
    let token = env.seal(&graph, b"ns", Some(60)).unwrap();
    assert!(graph.deep_eq(&env.open(&token, b"ns").unwrap()));

    // 64-byte tag instead of 32
    let frame = URL_SAFE_NO_PAD.decode(token.as_bytes()).unwrap();
    assert!(frame.len() >= 64 + 16 + 16);
}

#[test]
fn decode_ceiling_applies_to_opened_tokens() {
    let clock = TestClock::at(1_700_000_000);

    let sealer = Envelope::with_clock(
        EnvelopeConfig::new(&b"a master secret"[..]),
        Box::new(clock.clone()),
    )
    .unwrap();
    let mut graph = ValueGraph::new();
    graph.insert_root(Value::Bytes((0..200_000).map(|i| (i % 251) as u8).collect()));
    let token = sealer.seal(&graph, b"ns", Some(60)).unwrap();

    let mut config = EnvelopeConfig::new(&b"a master secret"[..]);
    config.max_decode_bytes = 1024;
    let opener = Envelope::with_clock(config, Box::new(clock.clone())).unwrap();
    assert!(matches!(
        opener.open(&token, b"ns"),
        Err(Error::Codec(CodecError::AllocationCeiling { .. }))
    ));
}

#[test]
fn configuration_is_validated() {
    let err = |config| Envelope::new(config).err();

    assert!(matches!(
        err(EnvelopeConfig::new(&b""[..])),
        Some(Error::Configuration(_))
    ));

    let mut config = EnvelopeConfig::new(&b"secret"[..]);
    config.default_ttl_secs = 0;
    assert!(matches!(err(config), Some(Error::Configuration(_))));

    let mut config = EnvelopeConfig::new(&b"secret"[..]);
    config.key_lifetime_secs = 0;
    assert!(matches!(err(config), Some(Error::Configuration(_))));

    let mut config = EnvelopeConfig::new(&b"secret"[..]);
    config.max_decode_bytes = 0;
    assert!(matches!(err(config), Some(Error::Configuration(_))));
}

#[test]
fn concurrent_seal_and_open() {
    let (env, _) = envelope_at(1_700_000_000);
    let env = Arc::new(env);
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let env = Arc::clone(&env);
            std::thread::spawn(move || {
                let mut graph = ValueGraph::new();
                graph.insert_root(Value::Int(i.into()));
                let token = env.seal(&graph, b"ns", Some(60)).unwrap();
                assert!(graph.deep_eq(&env.open(&token, b"ns").unwrap()));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn empty_payload_roundtrip() {
    let (env, _) = envelope_at(1_700_000_000);
    let mut graph = ValueGraph::new();
    graph.insert_root(Value::Null);
    let token = env.seal(&graph, b"ns", Some(60)).unwrap();
    assert!(graph.deep_eq(&env.open(&token, b"ns").unwrap()));
}
