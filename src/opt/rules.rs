// Local rewrite rules of the canonicalizer. A rule inspects one node and the stamps and
// identities of its inputs and proposes a Rewrite without touching the graph; the engine
// applies it. Rules are grouped per opcode in RULES, a table indexed by the node kind's dense
// tag, and are tried in table order until one fires. Every rule moves the graph strictly
// down a well-founded order: it replaces a node by one of its inputs or a constant, removes
// a fixed node, folds a split, moves a constant operand to the right (which cannot fire
// again on the result) or shortens a chain of nested address expressions. Stamp-driven
// folding (a floating node whose stamp is a single value becomes a constant) and value
// numbering are handled by the engine itself and do not appear here.

//! Rewrite rules, indexed by opcode.

use crate::ir::{Graph, NodeId, NodeKind, Opcode, Stamp, StampKind};

/// Input of a node built by a [`Rewrite::New`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewInput {
    Node(NodeId),
    /// A floating value built first, inputs before users, with its stamp inferred.
    Value(NodeKind, Vec<NewInput>),
}

/// Change proposed by a rule for the node it was applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Replace the node by an existing node.
    Replace(NodeId),
    /// Replace the node by the shared constant of its stamp kind.
    Constant(i64),
    /// Replace the node by a new floating node.
    New { kind: NodeKind, inputs: Vec<NewInput> },
    /// Unlink and delete a side-effect-free fixed node.
    RemoveFixed,
    /// Fold an `If`, keeping the successor at `surviving`.
    RemoveSplit { surviving: usize },
}

#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&Graph, NodeId) -> Option<Rewrite>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Rules per opcode, in `Opcode` order.
pub static RULES: [&[Rule]; Opcode::COUNT] = [
    &[],                                          // start
    &[],                                          // param
    &[],                                          // const
    &[CONSTANT_TO_RIGHT, ADD_ZERO],               // add
    &[SUB_ZERO, SUB_SELF],                        // sub
    &[CONSTANT_TO_RIGHT, MUL_ONE, MUL_ZERO],      // mul
    &[CONSTANT_TO_RIGHT, MUL_ZERO],               // mulhi
    &[CONSTANT_TO_RIGHT, AND_SELF, AND_ZERO, AND_ALL_ONES], // and
    &[CONSTANT_TO_RIGHT, OR_SELF, OR_ZERO],       // or
    &[CONSTANT_TO_RIGHT, XOR_SELF, XOR_ZERO],     // xor
    &[NEG_NEG],                                   // neg
    &[NOT_NOT],                                   // not
    &[NARROW_REDUNDANT],                          // narrow
    &[],                                          // sext
    &[FOLD_ADDRESS],                              // address
    &[LT_SELF],                                   // lt
    &[CONSTANT_TO_RIGHT, EQ_SELF],                // eq
    &[REMOVE_UNUSED_READ],                        // read
    &[],                                          // write
    &[FOLD_CONSTANT_IF],                          // if
    &[REMOVE_BEGIN],                              // begin
    &[],                                          // return
];

pub fn rules_for(opcode: Opcode) -> &'static [Rule] {
    RULES[opcode as usize]
}

const CONSTANT_TO_RIGHT: Rule = Rule {
    name: "constant_to_right",
    apply: constant_to_right,
};
const ADD_ZERO: Rule = Rule {
    name: "add_zero",
    apply: |g, n| right_is(g, n, 0).then(|| Rewrite::Replace(g.inputs(n)[0])),
};
const SUB_ZERO: Rule = Rule {
    name: "sub_zero",
    apply: |g, n| right_is(g, n, 0).then(|| Rewrite::Replace(g.inputs(n)[0])),
};
const SUB_SELF: Rule = Rule {
    name: "sub_self",
    apply: |g, n| same_inputs(g, n).then_some(Rewrite::Constant(0)),
};
const MUL_ONE: Rule = Rule {
    name: "mul_one",
    apply: |g, n| right_is(g, n, 1).then(|| Rewrite::Replace(g.inputs(n)[0])),
};
const MUL_ZERO: Rule = Rule {
    name: "mul_zero",
    apply: |g, n| right_is(g, n, 0).then_some(Rewrite::Constant(0)),
};
const AND_SELF: Rule = Rule {
    name: "and_self",
    apply: |g, n| same_inputs(g, n).then(|| Rewrite::Replace(g.inputs(n)[0])),
};
const AND_ZERO: Rule = Rule {
    name: "and_zero",
    apply: |g, n| right_is(g, n, 0).then_some(Rewrite::Constant(0)),
};
const AND_ALL_ONES: Rule = Rule {
    name: "and_all_ones",
    apply: |g, n| right_is(g, n, -1).then(|| Rewrite::Replace(g.inputs(n)[0])),
};
const OR_SELF: Rule = Rule {
    name: "or_self",
    apply: |g, n| same_inputs(g, n).then(|| Rewrite::Replace(g.inputs(n)[0])),
};
const OR_ZERO: Rule = Rule {
    name: "or_zero",
    apply: |g, n| right_is(g, n, 0).then(|| Rewrite::Replace(g.inputs(n)[0])),
};
const XOR_SELF: Rule = Rule {
    name: "xor_self",
    apply: |g, n| same_inputs(g, n).then_some(Rewrite::Constant(0)),
};
const XOR_ZERO: Rule = Rule {
    name: "xor_zero",
    apply: |g, n| right_is(g, n, 0).then(|| Rewrite::Replace(g.inputs(n)[0])),
};
const NEG_NEG: Rule = Rule {
    name: "neg_neg",
    apply: |g, n| double_unary(g, n, NodeKind::Neg),
};
const NOT_NOT: Rule = Rule {
    name: "not_not",
    apply: |g, n| double_unary(g, n, NodeKind::Not),
};
const NARROW_REDUNDANT: Rule = Rule {
    name: "narrow_redundant",
    apply: narrow_redundant,
};
const FOLD_ADDRESS: Rule = Rule {
    name: "fold_address",
    apply: fold_address,
};
const LT_SELF: Rule = Rule {
    name: "lt_self",
    apply: |g, n| same_inputs(g, n).then_some(Rewrite::Constant(0)),
};
const EQ_SELF: Rule = Rule {
    name: "eq_self",
    apply: |g, n| same_inputs(g, n).then_some(Rewrite::Constant(1)),
};
const REMOVE_UNUSED_READ: Rule = Rule {
    name: "remove_unused_read",
    apply: |g, n| g.usages(n).is_empty().then_some(Rewrite::RemoveFixed),
};
const FOLD_CONSTANT_IF: Rule = Rule {
    name: "fold_constant_if",
    apply: fold_constant_if,
};
const REMOVE_BEGIN: Rule = Rule {
    name: "remove_begin",
    apply: remove_begin,
};

fn constant_value(graph: &Graph, id: NodeId) -> Option<i64> {
    match graph.kind(id)? {
        NodeKind::Constant(value) => Some(value),
        _ => None,
    }
}

fn right_is(graph: &Graph, id: NodeId, value: i64) -> bool {
    match graph.inputs(id) {
        [_, y] => {
            let kind = graph.stamp(*y).map(|s| s.kind());
            constant_value(graph, *y).is_some_and(|c| Some(c) == kind.map(|k| k.wrap(value)))
        }
        _ => false,
    }
}

fn same_inputs(graph: &Graph, id: NodeId) -> bool {
    matches!(graph.inputs(id), [x, y] if x == y)
}

fn constant_to_right(graph: &Graph, id: NodeId) -> Option<Rewrite> {
    let kind = graph.kind(id)?;
    let &[x, y] = graph.inputs(id) else {
        return None;
    };
    if !kind.is_commutative() || constant_value(graph, x).is_none() || constant_value(graph, y).is_some() {
        return None;
    }
    Some(Rewrite::New {
        kind,
        inputs: vec![NewInput::Node(y), NewInput::Node(x)],
    })
}

fn double_unary(graph: &Graph, id: NodeId, kind: NodeKind) -> Option<Rewrite> {
    let &[inner] = graph.inputs(id) else {
        return None;
    };
    if graph.kind(inner)? != kind {
        return None;
    }
    graph.inputs(inner).first().map(|&x| Rewrite::Replace(x))
}

fn narrow_redundant(graph: &Graph, id: NodeId) -> Option<Rewrite> {
    let NodeKind::Narrow { lo, hi } = graph.kind(id)? else {
        return None;
    };
    let &[input] = graph.inputs(id) else {
        return None;
    };
    let stamp = graph.stamp(input)?;
    Stamp::range(stamp.kind(), lo, hi)
        .encloses(&stamp)
        .then_some(Rewrite::Replace(input))
}

/// `address(address(b, o1), o2)` becomes `address(b, add(o1, o2))` once the
/// inner address is itself canonical, so nested chains fold inside out. A
/// 32-bit offset next to a wider one is sign-extended before the add.
fn fold_address(graph: &Graph, id: NodeId) -> Option<Rewrite> {
    let &[inner, outer_offset] = graph.inputs(id) else {
        return None;
    };
    if graph.kind(inner)? != NodeKind::Address {
        return None;
    }
    let &[base, inner_offset] = graph.inputs(inner) else {
        return None;
    };
    if graph.kind(base)? == NodeKind::Address {
        return None;
    }
    let inner_kind = graph.stamp(inner_offset)?.kind();
    let outer_kind = graph.stamp(outer_offset)?.kind();
    let widen = |offset: NodeId, kind: StampKind, other: StampKind| {
        if kind == StampKind::Int32 && other != StampKind::Int32 {
            NewInput::Value(NodeKind::SignExtend, vec![NewInput::Node(offset)])
        } else {
            NewInput::Node(offset)
        }
    };
    Some(Rewrite::New {
        kind: NodeKind::Address,
        inputs: vec![
            NewInput::Node(base),
            NewInput::Value(
                NodeKind::Add,
                vec![
                    widen(inner_offset, inner_kind, outer_kind),
                    widen(outer_offset, outer_kind, inner_kind),
                ],
            ),
        ],
    })
}

fn fold_constant_if(graph: &Graph, id: NodeId) -> Option<Rewrite> {
    let &[condition] = graph.inputs(id) else {
        return None;
    };
    let value = graph.stamp(condition)?.as_constant()?;
    Some(Rewrite::RemoveSplit {
        surviving: if value != 0 { 0 } else { 1 },
    })
}

fn remove_begin(graph: &Graph, id: NodeId) -> Option<Rewrite> {
    let pred = graph.get(id)?.predecessor()?;
    (graph.kind(pred)? != NodeKind::If).then_some(Rewrite::RemoveFixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::StampKind;
    use crate::kir::parse_graph;

    fn find(graph: &Graph, opcode: Opcode) -> NodeId {
        graph.nodes_with_opcode(opcode).next().unwrap()
    }

    #[test]
    fn test_table_matches_opcodes() {
        assert_eq!(rules_for(Opcode::Address)[0].name, "fold_address");
        assert_eq!(rules_for(Opcode::If)[0].name, "fold_constant_if");
        assert!(rules_for(Opcode::Return).is_empty());
        assert_eq!(rules_for(Opcode::Begin)[0].name, "remove_begin");
    }

    #[test]
    fn test_identity_rules() {
        let graph = parse_graph(
            "graph f(%a: i32) {\n  %z = const i32 0\n  %s = add %a, %z\n  %d = sub %a, %a\n  %m = mul %d, %s\n  return %m\n}",
        )
        .unwrap();
        let a = graph.params()[0];
        let add = find(&graph, Opcode::Add);
        let sub = find(&graph, Opcode::Sub);
        assert_eq!((ADD_ZERO.apply)(&graph, add), Some(Rewrite::Replace(a)));
        assert_eq!((SUB_SELF.apply)(&graph, sub), Some(Rewrite::Constant(0)));
        assert_eq!((SUB_ZERO.apply)(&graph, sub), None);
    }

    #[test]
    fn test_constant_to_right() {
        let graph = parse_graph(
            "graph f(%a: i32) {\n  %c = const i32 7\n  %s = add %c, %a\n  return %s\n}",
        )
        .unwrap();
        let a = graph.params()[0];
        let add = find(&graph, Opcode::Add);
        let c = find(&graph, Opcode::Constant);
        assert_eq!(
            constant_to_right(&graph, add),
            Some(Rewrite::New {
                kind: NodeKind::Add,
                inputs: vec![NewInput::Node(a), NewInput::Node(c)],
            })
        );
    }

    #[test]
    fn test_fold_address_waits_for_inner() {
        let mut graph = Graph::new("f");
        let p = graph.add_param(0, Stamp::unrestricted(StampKind::Pointer)).unwrap();
        let c1 = graph.unique_constant(StampKind::Int64, 1);
        let a1 = graph.add_value(NodeKind::Address, &[p, c1]).unwrap();
        let a2 = graph.add_value(NodeKind::Address, &[a1, c1]).unwrap();
        let a3 = graph.add_value(NodeKind::Address, &[a2, c1]).unwrap();
        assert!(fold_address(&graph, a1).is_none());
        assert!(fold_address(&graph, a2).is_some());
        assert!(fold_address(&graph, a3).is_none());
    }

    #[test]
    fn test_fold_address_widens_narrow_offset() {
        let mut graph = Graph::new("f");
        let p = graph.add_param(0, Stamp::unrestricted(StampKind::Pointer)).unwrap();
        let c32 = graph.unique_constant(StampKind::Int32, 3);
        let c64 = graph.unique_constant(StampKind::Int64, 5);
        let inner = graph.add_value(NodeKind::Address, &[p, c32]).unwrap();
        let outer = graph.add_value(NodeKind::Address, &[inner, c64]).unwrap();
        assert_eq!(
            fold_address(&graph, outer),
            Some(Rewrite::New {
                kind: NodeKind::Address,
                inputs: vec![
                    NewInput::Node(p),
                    NewInput::Value(
                        NodeKind::Add,
                        vec![
                            NewInput::Value(NodeKind::SignExtend, vec![NewInput::Node(c32)]),
                            NewInput::Node(c64),
                        ],
                    ),
                ],
            })
        );

        let swapped = graph.add_value(NodeKind::Address, &[p, c64]).unwrap();
        let outer = graph.add_value(NodeKind::Address, &[swapped, c32]).unwrap();
        let Some(Rewrite::New { inputs, .. }) = fold_address(&graph, outer) else {
            panic!("mixed offsets not folded");
        };
        assert_eq!(
            inputs[1],
            NewInput::Value(
                NodeKind::Add,
                vec![
                    NewInput::Node(c64),
                    NewInput::Value(NodeKind::SignExtend, vec![NewInput::Node(c32)]),
                ],
            )
        );
    }
}
