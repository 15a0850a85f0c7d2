//! Arena-backed value graphs.
//!
//! Values live in a flat arena and refer to each other through [`NodeId`]
//! indices, so cyclic and shared structure needs no reference counting and
//! no garbage collector. A graph plus its root is the unit the codec
//! encodes and decodes.

use std::collections::HashSet;

use num_bigint::BigInt;

/// Index of a node within one [`ValueGraph`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// One node of a value graph.
///
/// Containers hold [`NodeId`]s into the owning arena. A `Tuple` is a
/// fixed-length sequence distinguished from `List` only by its type tag.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<NodeId>),
    Map(Vec<(NodeId, NodeId)>),
    Tuple(Vec<NodeId>),
}

/// A rooted arena of values, possibly cyclic.
///
/// The derived `PartialEq` compares arenas node for node; use
/// [`ValueGraph::deep_eq`] for structural equality that ignores node
/// numbering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueGraph {
    nodes: Vec<Value>,
    root: Option<NodeId>,
}

impl ValueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the arena and returns its id.
    pub fn insert(&mut self, value: Value) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(value);
        id
    }

    /// Adds a node and makes it the root in one step.
    pub fn insert_root(&mut self, value: Value) -> NodeId {
        let id = self.insert(value);
        self.root = Some(id);
        id
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Value> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Value> {
        self.nodes.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // Convenience constructors for building graphs by hand.

    pub fn null(&mut self) -> NodeId {
        self.insert(Value::Null)
    }

    pub fn boolean(&mut self, b: bool) -> NodeId {
        self.insert(Value::Bool(b))
    }

    pub fn int(&mut self, n: impl Into<BigInt>) -> NodeId {
        self.insert(Value::Int(n.into()))
    }

    pub fn float(&mut self, f: f64) -> NodeId {
        self.insert(Value::Float(f))
    }

    pub fn bytes(&mut self, b: impl Into<Vec<u8>>) -> NodeId {
        self.insert(Value::Bytes(b.into()))
    }

    pub fn text(&mut self, s: impl Into<String>) -> NodeId {
        self.insert(Value::Text(s.into()))
    }

    pub fn list(&mut self, items: Vec<NodeId>) -> NodeId {
        self.insert(Value::List(items))
    }

    pub fn map(&mut self, pairs: Vec<(NodeId, NodeId)>) -> NodeId {
        self.insert(Value::Map(pairs))
    }

    pub fn tuple(&mut self, items: Vec<NodeId>) -> NodeId {
        self.insert(Value::Tuple(items))
    }

    /// Structural equality of two rooted graphs, cycle-safe.
    ///
    /// Node pairs already under comparison are assumed equal (bisimulation),
    /// so self-referencing structures compare without recursing forever.
    /// Floats compare by bit pattern, which keeps NaN payloads honest.
    pub fn deep_eq(&self, other: &ValueGraph) -> bool {
        match (self.root, other.root) {
            (Some(a), Some(b)) => {
                let mut seen = HashSet::new();
                self.node_eq(a, other, b, &mut seen)
            }
            (None, None) => true,
            _ => false,
        }
    }

    fn node_eq(
        &self,
        a: NodeId,
        other: &ValueGraph,
        b: NodeId,
        seen: &mut HashSet<(NodeId, NodeId)>,
    ) -> bool {
        if !seen.insert((a, b)) {
            return true;
        }
        let (va, vb) = match (self.get(a), other.get(b)) {
            (Some(va), Some(vb)) => (va, vb),
            _ => return false,
        };
        match (va, vb) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
            (Value::Bytes(x), Value::Bytes(y)) => x == y,
            (Value::Text(x), Value::Text(y)) => x == y,
            (Value::List(xs), Value::List(ys)) | (Value::Tuple(xs), Value::Tuple(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys.iter())
                        .all(|(&x, &y)| self.node_eq(x, other, y, seen))
            }
            (Value::Map(xs), Value::Map(ys)) => {
                xs.len() == ys.len()
                    && xs.iter().zip(ys.iter()).all(|(&(kx, vx), &(ky, vy))| {
                        self.node_eq(kx, other, ky, seen) && self.node_eq(vx, other, vy, seen)
                    })
            }
            _ => false,
        }
    }
}
