//! Binary graph codec.
//!
//! Self-describing, tag-prefixed format. One tag byte per node, then a
//! payload:
//!
//!   NULL / TRUE / FALSE            (no payload)
//!   BACKREF                        varint id of an earlier node
//!   INT+ / INT-                    varint magnitude (negative n stores -n - 1)
//!   FLOAT                          IEEE double, 8 bytes big-endian
//!   BYTES / BYTES.z / BYTES.zstd   varint length, then payload
//!   TEXT  / TEXT.z  / TEXT.zstd    varint length, then utf-8 payload
//!   LIST / TUPLE                   varint count, then elements
//!   MAP                            varint pair count, then key/value pairs
//!
//! Sharing and cycles ride on backreferences. Lists and maps are assigned
//! their backref id before their children encode, so a container can be
//! referenced from inside itself; the decoder mirrors this by appending
//! every backrefable node to the read-side table on tag dispatch, before
//! decoding children. Floats, bytes, and text backreference by value, so
//! repeated equal literals collapse; ints, booleans, null, and tuples are
//! never backreferenced.

use std::borrow::Cow;
use std::collections::HashMap;

use num_bigint::{BigInt, BigUint, Sign};

use crate::compress::{Compressor, DeflateCompressor, Method, ZstdCompressor};
use crate::error::CodecError;
use crate::value::{NodeId, Value, ValueGraph};
use crate::varint;

const TAG_NULL: u8 = 0;
const TAG_TRUE: u8 = 1;
const TAG_FALSE: u8 = 2;
const TAG_BACKREF: u8 = 3;
const TAG_INT_POS: u8 = 4;
const TAG_INT_NEG: u8 = 5;
const TAG_FLOAT: u8 = 6;
const TAG_BYTES: u8 = 7;
const TAG_BYTES_ZSTD: u8 = 9;
const TAG_TEXT: u8 = 10;
const TAG_TEXT_ZSTD: u8 = 12;
const TAG_LIST: u8 = 13;
const TAG_MAP: u8 = 14;
const TAG_TUPLE: u8 = 15;

/// Default allocation ceiling for decoding: 64 MiB.
pub const DEFAULT_MAX_DECODE_BYTES: usize = 64 * 1024 * 1024;

/// Maximum container nesting accepted by the decoder. The decoder recurses
/// per level, so the cap must stay well inside a 2 MiB thread stack.
const MAX_DEPTH: usize = 256;

/// Encoder/decoder for [`ValueGraph`]s.
pub struct Codec {
    deflate: DeflateCompressor,
    zstd: ZstdCompressor,
    max_decode_bytes: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    pub fn new() -> Self {
        Self {
            deflate: DeflateCompressor::default(),
            zstd: ZstdCompressor::default(),
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
        }
    }

    /// Caps the total bytes the decoder will allocate for one call.
    pub fn with_ceiling(mut self, max_decode_bytes: usize) -> Self {
        self.max_decode_bytes = max_decode_bytes;
        self
    }

    /// Installs a pre-trained dictionary for the zstd backend.
    pub fn with_zstd_dictionary(mut self, dictionary: Vec<u8>) -> Self {
        self.zstd = ZstdCompressor::with_dictionary(3, dictionary);
        self
    }

    pub fn encode(&self, graph: &ValueGraph) -> Result<Vec<u8>, CodecError> {
        let root = graph.root().ok_or(CodecError::InvalidGraph)?;
        let mut out = Vec::new();
        let mut refs = HashMap::new();
        self.encode_node(graph, root, &mut refs, &mut out)?;
        Ok(out)
    }

    pub fn decode(&self, input: &[u8]) -> Result<ValueGraph, CodecError> {
        let mut reader = Reader::new(input);
        let mut graph = ValueGraph::new();
        let mut refs = Vec::new();
        let mut budget = AllocBudget::new(self.max_decode_bytes);
        let root = self.decode_node(&mut reader, &mut graph, &mut refs, &mut budget, 0)?;
        if reader.remaining() != 0 {
            return Err(CodecError::TrailingBytes);
        }
        graph.set_root(root);
        Ok(graph)
    }

    fn encode_node<'g>(
        &self,
        graph: &'g ValueGraph,
        id: NodeId,
        refs: &mut HashMap<IdKey<'g>, u64>,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let value = graph.get(id).ok_or(CodecError::InvalidGraph)?;
        if let Some(key) = identity_key(id, value) {
            if let Some(&backref) = refs.get(&key) {
                out.push(TAG_BACKREF);
                varint::encode_u64(out, backref);
                return Ok(());
            }
            // Assigned before recursing, so children can point back here.
            let next = refs.len() as u64;
            refs.insert(key, next);
        }
        match value {
            Value::Null => out.push(TAG_NULL),
            Value::Bool(true) => out.push(TAG_TRUE),
            Value::Bool(false) => out.push(TAG_FALSE),
            Value::Int(n) => match n.sign() {
                Sign::Minus => {
                    out.push(TAG_INT_NEG);
                    varint::encode_big(out, &(n.magnitude() - 1u32));
                }
                _ => {
                    out.push(TAG_INT_POS);
                    varint::encode_big(out, n.magnitude());
                }
            },
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Bytes(b) => self.encode_blob(TAG_BYTES, b, out)?,
            Value::Text(s) => self.encode_blob(TAG_TEXT, s.as_bytes(), out)?,
            Value::List(items) => {
                out.push(TAG_LIST);
                varint::encode_u64(out, items.len() as u64);
                for &item in items {
                    self.encode_node(graph, item, refs, out)?;
                }
            }
            Value::Map(pairs) => {
                out.push(TAG_MAP);
                varint::encode_u64(out, pairs.len() as u64);
                for &(k, v) in pairs {
                    self.encode_node(graph, k, refs, out)?;
                    self.encode_node(graph, v, refs, out)?;
                }
            }
            Value::Tuple(items) => {
                out.push(TAG_TUPLE);
                varint::encode_u64(out, items.len() as u64);
                for &item in items {
                    self.encode_node(graph, item, refs, out)?;
                }
            }
        }
        Ok(())
    }

    fn encode_blob(&self, base_tag: u8, data: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
        let (method, payload) = self.try_compress(data)?;
        out.push(base_tag + method as u8);
        varint::encode_u64(out, payload.len() as u64);
        out.extend_from_slice(&payload);
        Ok(())
    }

    /// Offers `data` to both backends, keeping the strictly smallest output.
    fn try_compress<'d>(&self, data: &'d [u8]) -> Result<(Method, Cow<'d, [u8]>), CodecError> {
        let mut best = (Method::Identity, Cow::Borrowed(data));
        if data.is_empty() {
            return Ok(best);
        }
        let deflated = self.deflate.compress(data)?;
        if deflated.len() < best.1.len() {
            best = (Method::Deflate, Cow::Owned(deflated));
        }
        let zstded = self.zstd.compress(data)?;
        if zstded.len() < best.1.len() {
            best = (Method::Zstd, Cow::Owned(zstded));
        }
        Ok(best)
    }

    fn decode_node(
        &self,
        r: &mut Reader<'_>,
        graph: &mut ValueGraph,
        refs: &mut Vec<NodeId>,
        budget: &mut AllocBudget,
        depth: usize,
    ) -> Result<NodeId, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::NestingTooDeep);
        }
        let tag = r.read_u8()?;
        match tag {
            TAG_NULL => Ok(graph.insert(Value::Null)),
            TAG_TRUE => Ok(graph.insert(Value::Bool(true))),
            TAG_FALSE => Ok(graph.insert(Value::Bool(false))),
            TAG_BACKREF => {
                let id = r.read_uint()?;
                usize::try_from(id)
                    .ok()
                    .and_then(|i| refs.get(i))
                    .copied()
                    .ok_or(CodecError::BadBackref(id))
            }
            TAG_INT_POS => {
                let magnitude = r.read_big_uint()?;
                Ok(graph.insert(Value::Int(BigInt::from(magnitude))))
            }
            TAG_INT_NEG => {
                let magnitude = r.read_big_uint()?;
                Ok(graph.insert(Value::Int(-(BigInt::from(magnitude) + 1u32))))
            }
            TAG_FLOAT => {
                let raw = r.read_array::<8>()?;
                let node = graph.insert(Value::Float(f64::from_bits(u64::from_be_bytes(raw))));
                refs.push(node);
                Ok(node)
            }
            TAG_BYTES..=TAG_BYTES_ZSTD => {
                let data = self.decode_blob(tag - TAG_BYTES, r, budget)?;
                let node = graph.insert(Value::Bytes(data));
                refs.push(node);
                Ok(node)
            }
            TAG_TEXT..=TAG_TEXT_ZSTD => {
                let data = self.decode_blob(tag - TAG_TEXT, r, budget)?;
                let text = String::from_utf8(data).map_err(|_| CodecError::InvalidText)?;
                let node = graph.insert(Value::Text(text));
                refs.push(node);
                Ok(node)
            }
            TAG_LIST => {
                let count = r.read_count(1)?;
                budget.charge((count as u64).saturating_mul(8))?;
                // Allocated (and registered) before children, so a list can
                // contain a backreference to itself.
                let node = graph.insert(Value::List(Vec::new()));
                refs.push(node);
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.decode_node(r, graph, refs, budget, depth + 1)?);
                }
                if let Some(slot) = graph.get_mut(node) {
                    *slot = Value::List(items);
                }
                Ok(node)
            }
            TAG_MAP => {
                let count = r.read_count(2)?;
                budget.charge((count as u64).saturating_mul(16))?;
                let node = graph.insert(Value::Map(Vec::new()));
                refs.push(node);
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self.decode_node(r, graph, refs, budget, depth + 1)?;
                    let value = self.decode_node(r, graph, refs, budget, depth + 1)?;
                    pairs.push((key, value));
                }
                if let Some(slot) = graph.get_mut(node) {
                    *slot = Value::Map(pairs);
                }
                Ok(node)
            }
            TAG_TUPLE => {
                let count = r.read_count(1)?;
                budget.charge((count as u64).saturating_mul(8))?;
                // Tuples are never backrefable, so children decode first.
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.decode_node(r, graph, refs, budget, depth + 1)?);
                }
                Ok(graph.insert(Value::Tuple(items)))
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }

    fn decode_blob(
        &self,
        tag_offset: u8,
        r: &mut Reader<'_>,
        budget: &mut AllocBudget,
    ) -> Result<Vec<u8>, CodecError> {
        let method = Method::from_tag_offset(tag_offset).ok_or(CodecError::UnknownTag(tag_offset))?;
        let len = r.read_uint()?;
        if len > r.remaining() as u64 {
            return Err(CodecError::Truncated);
        }
        let raw = r.read_exact(len as usize)?;
        match method {
            Method::Identity => {
                budget.charge(len)?;
                Ok(raw.to_vec())
            }
            Method::Deflate => {
                let out = self.deflate.decompress(raw, budget.available())?;
                budget.charge(out.len() as u64)?;
                Ok(out)
            }
            Method::Zstd => {
                let out = self.zstd.decompress(raw, budget.available())?;
                budget.charge(out.len() as u64)?;
                Ok(out)
            }
        }
    }
}

/// Write-side identity, per the backreference policy.
#[derive(PartialEq, Eq, Hash)]
enum IdKey<'g> {
    Node(NodeId),
    Float(u64),
    Bytes(&'g [u8]),
    Text(&'g str),
}

fn identity_key(id: NodeId, value: &Value) -> Option<IdKey<'_>> {
    match value {
        Value::Float(f) => Some(IdKey::Float(f.to_bits())),
        Value::Bytes(b) => Some(IdKey::Bytes(b)),
        Value::Text(s) => Some(IdKey::Text(s)),
        Value::List(_) | Value::Map(_) => Some(IdKey::Node(id)),
        _ => None,
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let b = *self.buf.get(self.pos).ok_or(CodecError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    fn read_uint(&mut self) -> Result<u64, CodecError> {
        let (value, used) = varint::decode_u64(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    fn read_big_uint(&mut self) -> Result<BigUint, CodecError> {
        let (value, used) = varint::decode_big(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    /// Reads an element count; each element needs at least `min_bytes` of
    /// input, which bounds hostile counts by the stream length.
    fn read_count(&mut self, min_bytes: usize) -> Result<usize, CodecError> {
        let count = self.read_uint()?;
        let floor = count.saturating_mul(min_bytes as u64);
        if floor > self.remaining() as u64 {
            return Err(CodecError::Truncated);
        }
        Ok(count as usize)
    }
}

struct AllocBudget {
    used: u64,
    ceiling: u64,
}

impl AllocBudget {
    fn new(ceiling: usize) -> Self {
        Self {
            used: 0,
            ceiling: ceiling as u64,
        }
    }

    fn charge(&mut self, bytes: u64) -> Result<(), CodecError> {
        let requested = self.used.saturating_add(bytes);
        if requested > self.ceiling {
            return Err(CodecError::AllocationCeiling {
                requested,
                ceiling: self.ceiling,
            });
        }
        self.used = requested;
        Ok(())
    }

    fn available(&self) -> usize {
        usize::try_from(self.ceiling - self.used).unwrap_or(usize::MAX)
    }
}
