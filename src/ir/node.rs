// Node identities and node kinds of the sea-of-nodes IR. A NodeId is a stable index into the
// graph's node arena and is never reused within one graph, so a deleted id can always be
// detected. NodeKind is the tagged enum of operations; its Opcode is the dense tag the
// canonicalizer uses to index its rule table. Each kind knows whether it is floating (a pure
// value scheduled by its inputs) or fixed (part of the control chain, with successor slots
// and a predecessor), how many inputs it accepts, whether it has a side effect, and how to
// derive its stamp from its input stamps. Node itself is the per-vertex record: ordered
// inputs, the usage multiset (a secondary index maintained by Graph), the current stamp and
// the control links of fixed nodes.

//! Node ids, kinds and the per-node record.

use super::stamp::{self, Stamp, StampKind};
use std::fmt;

/// Stable index of a node inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Dense tag of a node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Start,
    Param,
    Constant,
    Add,
    Sub,
    Mul,
    MulHigh,
    And,
    Or,
    Xor,
    Neg,
    Not,
    Narrow,
    SignExtend,
    Address,
    IntegerLessThan,
    IntegerEquals,
    Read,
    Write,
    If,
    Begin,
    Return,
}

impl Opcode {
    pub const COUNT: usize = Opcode::Return as usize + 1;

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Start => "start",
            Opcode::Param => "param",
            Opcode::Constant => "const",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::MulHigh => "mulhi",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Neg => "neg",
            Opcode::Not => "not",
            Opcode::Narrow => "narrow",
            Opcode::SignExtend => "sext",
            Opcode::Address => "address",
            Opcode::IntegerLessThan => "lt",
            Opcode::IntegerEquals => "eq",
            Opcode::Read => "read",
            Opcode::Write => "write",
            Opcode::If => "if",
            Opcode::Begin => "begin",
            Opcode::Return => "return",
        }
    }
}

/// Operation performed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    Param(u32),
    Constant(i64),
    Add,
    Sub,
    Mul,
    MulHigh,
    And,
    Or,
    Xor,
    Neg,
    Not,
    /// Guard-derived refinement of its input to `[lo, hi]`.
    Narrow { lo: i64, hi: i64 },
    /// 32-bit input widened to 64 bits.
    SignExtend,
    /// `base + offset`.
    Address,
    IntegerLessThan,
    IntegerEquals,
    Read,
    Write,
    If,
    Begin,
    Return,
}

impl NodeKind {
    pub fn opcode(&self) -> Opcode {
        match self {
            NodeKind::Start => Opcode::Start,
            NodeKind::Param(_) => Opcode::Param,
            NodeKind::Constant(_) => Opcode::Constant,
            NodeKind::Add => Opcode::Add,
            NodeKind::Sub => Opcode::Sub,
            NodeKind::Mul => Opcode::Mul,
            NodeKind::MulHigh => Opcode::MulHigh,
            NodeKind::And => Opcode::And,
            NodeKind::Or => Opcode::Or,
            NodeKind::Xor => Opcode::Xor,
            NodeKind::Neg => Opcode::Neg,
            NodeKind::Not => Opcode::Not,
            NodeKind::Narrow { .. } => Opcode::Narrow,
            NodeKind::SignExtend => Opcode::SignExtend,
            NodeKind::Address => Opcode::Address,
            NodeKind::IntegerLessThan => Opcode::IntegerLessThan,
            NodeKind::IntegerEquals => Opcode::IntegerEquals,
            NodeKind::Read => Opcode::Read,
            NodeKind::Write => Opcode::Write,
            NodeKind::If => Opcode::If,
            NodeKind::Begin => Opcode::Begin,
            NodeKind::Return => Opcode::Return,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::Read
                | NodeKind::Write
                | NodeKind::If
                | NodeKind::Begin
                | NodeKind::Return
        )
    }

    pub fn is_floating(&self) -> bool {
        !self.is_fixed()
    }

    /// Nodes that must stay even without usages.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            NodeKind::Start | NodeKind::Write | NodeKind::If | NodeKind::Return
        )
    }

    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            NodeKind::Add
                | NodeKind::Mul
                | NodeKind::MulHigh
                | NodeKind::And
                | NodeKind::Or
                | NodeKind::Xor
                | NodeKind::IntegerEquals
        )
    }

    pub fn is_binary_arithmetic(&self) -> bool {
        matches!(
            self,
            NodeKind::Add
                | NodeKind::Sub
                | NodeKind::Mul
                | NodeKind::MulHigh
                | NodeKind::And
                | NodeKind::Or
                | NodeKind::Xor
        )
    }

    /// Inclusive bounds on the number of inputs.
    pub fn input_arity(&self) -> (usize, usize) {
        match self {
            NodeKind::Start | NodeKind::Param(_) | NodeKind::Constant(_) | NodeKind::Begin => (0, 0),
            NodeKind::Neg
            | NodeKind::Not
            | NodeKind::Narrow { .. }
            | NodeKind::SignExtend
            | NodeKind::Read
            | NodeKind::If => (1, 1),
            NodeKind::Return => (0, 1),
            _ => (2, 2),
        }
    }

    /// Number of successor slots of a fixed node.
    pub fn successor_slots(&self) -> usize {
        match self {
            NodeKind::Start | NodeKind::Read | NodeKind::Write | NodeKind::Begin => 1,
            NodeKind::If => 2,
            _ => 0,
        }
    }

    /// Stamp derived from the input stamps, or `None` for kinds whose stamp
    /// is not a function of their inputs.
    pub fn infer_stamp(&self, inputs: &[Stamp]) -> Option<Stamp> {
        let binary = |f: fn(&Stamp, &Stamp) -> Stamp| match inputs {
            [a, b] if a.kind() == b.kind() => Some(f(a, b)),
            [a, _] => Some(Stamp::unrestricted(a.kind())),
            _ => None,
        };
        match self {
            NodeKind::Add => binary(stamp::add),
            NodeKind::Sub => binary(stamp::sub),
            NodeKind::Mul => binary(stamp::mul),
            NodeKind::MulHigh => binary(stamp::mul_high),
            NodeKind::And => binary(stamp::and),
            NodeKind::Or => binary(stamp::or),
            NodeKind::Xor => binary(stamp::xor),
            NodeKind::IntegerLessThan => match inputs {
                [a, b] => Some(stamp::less_than(a, b)),
                _ => None,
            },
            NodeKind::IntegerEquals => match inputs {
                [a, b] => Some(stamp::equals(a, b)),
                _ => None,
            },
            NodeKind::Neg => inputs.first().map(stamp::neg),
            NodeKind::Not => inputs.first().map(stamp::not),
            NodeKind::Narrow { lo, hi } => inputs
                .first()
                .map(|s| s.meet(&Stamp::range(s.kind(), *lo, *hi))),
            NodeKind::SignExtend => inputs.first().map(stamp::sign_extend),
            NodeKind::Address => Some(Stamp::unrestricted(StampKind::Pointer)),
            NodeKind::Start
            | NodeKind::Write
            | NodeKind::If
            | NodeKind::Begin
            | NodeKind::Return => Some(Stamp::void()),
            NodeKind::Param(_) | NodeKind::Constant(_) | NodeKind::Read => None,
        }
    }
}

/// One vertex of the graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) usages: Vec<NodeId>,
    pub(crate) stamp: Stamp,
    pub(crate) successors: Vec<Option<NodeId>>,
    pub(crate) predecessor: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, inputs: Vec<NodeId>, stamp: Stamp) -> Self {
        Self {
            kind,
            inputs,
            usages: Vec::new(),
            stamp,
            successors: vec![None; kind.successor_slots()],
            predecessor: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn opcode(&self) -> Opcode {
        self.kind.opcode()
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index).copied()
    }

    /// Users of this node, one entry per input edge.
    pub fn usages(&self) -> &[NodeId] {
        &self.usages
    }

    pub fn has_usages(&self) -> bool {
        !self.usages.is_empty()
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub fn is_fixed(&self) -> bool {
        self.kind.is_fixed()
    }

    pub fn is_floating(&self) -> bool {
        self.kind.is_floating()
    }

    pub fn successors(&self) -> &[Option<NodeId>] {
        &self.successors
    }

    /// The single control successor of a non-branching fixed node.
    pub fn next(&self) -> Option<NodeId> {
        if self.successors.len() == 1 {
            self.successors[0]
        } else {
            None
        }
    }

    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor
    }

    /// Linked into the control chain in either direction.
    pub fn is_linked(&self) -> bool {
        self.predecessor.is_some() || self.successors.iter().any(Option::is_some)
    }
}
