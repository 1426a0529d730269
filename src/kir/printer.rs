//! KIR printer.
//!
//! Values are named `%v0`, `%v1`, ... in the order a deterministic walk from
//! the start node first reaches them, so the printed text does not depend on
//! node ids. Two graphs print identically iff they are isomorphic.

use crate::ir::{Graph, NodeId, NodeKind};
use hashbrown::HashMap;
use std::fmt::Write;

/// Print `graph` in KIR syntax.
pub fn print_graph(graph: &Graph) -> String {
    let mut printer = Printer {
        graph,
        names: HashMap::new(),
        out: String::new(),
    };
    printer.print();
    printer.out
}

struct Printer<'g> {
    graph: &'g Graph,
    names: HashMap<NodeId, usize>,
    out: String,
}

impl<'g> Printer<'g> {
    fn name(&mut self, id: NodeId) -> String {
        let next = self.names.len();
        let index = *self.names.entry(id).or_insert(next);
        format!("%v{index}")
    }

    fn line(&mut self, indent: usize, text: &str) {
        let _ = writeln!(self.out, "{:width$}{}", "", text, width = indent * 2);
    }

    fn print(&mut self) {
        let graph = self.graph;
        let params: Vec<String> = graph
            .params()
            .into_iter()
            .map(|p| {
                let stamp = graph.stamp(p).map(|s| s.to_string()).unwrap_or_default();
                format!("{}: {}", self.name(p), stamp)
            })
            .collect();
        let _ = writeln!(self.out, "graph {}({}) {{", graph.name(), params.join(", "));

        let first = graph.get(graph.start()).and_then(|n| n.next());
        self.print_chain(first, 1);

        let leftovers: Vec<NodeId> = graph
            .floating_nodes()
            .filter(|id| !self.names.contains_key(id))
            .collect();
        if !leftovers.is_empty() {
            self.line(1, "; unreachable");
            for id in leftovers {
                self.define(id, 1);
            }
        }
        self.out.push_str("}\n");
    }

    /// Print the floating value `id` after its inputs, once.
    fn define(&mut self, id: NodeId, indent: usize) {
        if self.names.contains_key(&id) {
            return;
        }
        let graph = self.graph;
        let Some(node) = graph.get(id) else {
            return;
        };
        if node.is_fixed() {
            return;
        }
        for &input in node.inputs() {
            self.define(input, indent);
        }
        let operands = self.operands(node.inputs());
        let stamp = node.stamp();
        let text = match node.kind() {
            NodeKind::Param(_) => return,
            NodeKind::Constant(value) => {
                format!("{} = const {} {}", self.name(id), stamp.kind().name(), value)
            }
            NodeKind::Narrow { lo, hi } => {
                format!("{} = narrow {}, {}, {} ; {}", self.name(id), operands, lo, hi, stamp)
            }
            kind => format!("{} = {} {} ; {}", self.name(id), kind.opcode().name(), operands, stamp),
        };
        self.line(indent, &text);
    }

    fn operands(&mut self, inputs: &[NodeId]) -> String {
        let names: Vec<String> = inputs.iter().map(|&i| self.name(i)).collect();
        names.join(", ")
    }

    fn print_chain(&mut self, mut current: Option<NodeId>, indent: usize) {
        let graph = self.graph;
        while let Some(id) = current {
            let Some(node) = graph.get(id) else {
                return;
            };
            for &input in node.inputs() {
                self.define(input, indent);
            }
            match node.kind() {
                NodeKind::Begin => {
                    let after_split = node
                        .predecessor()
                        .and_then(|p| graph.kind(p))
                        .is_some_and(|k| k == NodeKind::If);
                    if !after_split {
                        self.line(indent, "begin");
                    }
                }
                NodeKind::Read => {
                    let text = format!(
                        "{} = read {} {}",
                        self.name(id),
                        node.stamp(),
                        self.operands(node.inputs())
                    );
                    self.line(indent, &text);
                }
                NodeKind::Write => {
                    let text = format!("write {}", self.operands(node.inputs()));
                    self.line(indent, &text);
                }
                NodeKind::Return => {
                    let text = if node.inputs().is_empty() {
                        "return".to_string()
                    } else {
                        format!("return {}", self.operands(node.inputs()))
                    };
                    self.line(indent, &text);
                }
                NodeKind::If => {
                    let text = format!("if {} {{", self.operands(node.inputs()));
                    self.line(indent, &text);
                    let successors = node.successors().to_vec();
                    self.print_chain(successors.first().copied().flatten(), indent + 1);
                    self.line(indent, "} else {");
                    self.print_chain(successors.get(1).copied().flatten(), indent + 1);
                    self.line(indent, "}");
                    return;
                }
                _ => {}
            }
            current = node.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kir::parse_graph;

    #[test]
    fn test_print_is_id_independent() {
        // The same graph with definitions in different textual order.
        let a = parse_graph(
            "graph f(%x: i32) {\n  %c = const i32 2\n  %n = not %x\n  %s = add %x, %c\n  %t = sub %s, %n\n  return %t\n}",
        )
        .unwrap();
        let b = parse_graph(
            "graph f(%x: i32) {\n  %n = not %x\n  %c = const i32 2\n  %s = add %x, %c\n  %t = sub %s, %n\n  return %t\n}",
        )
        .unwrap();
        assert_eq!(print_graph(&a), print_graph(&b));
    }

    #[test]
    fn test_print_round_trips() {
        let text = "graph g(%a: i32[0, 9], %p: ptr) {\n  %v = read i64 %p\n  %t = lt %a, %a\n  if %t {\n    write %p, %v\n    return\n  } else {\n    return %a\n  }\n}";
        let graph = parse_graph(text).unwrap();
        let printed = print_graph(&graph);
        assert!(printed.starts_with("graph g(%v0: i32[0, 9], %v1: ptr) {"));
        assert!(printed.contains("%v2 = read i64 %v1"));
        assert!(printed.contains("} else {"));
        let reparsed = parse_graph(&printed).unwrap();
        assert_eq!(print_graph(&reparsed), printed);
    }
}
