// Worklist-driven rewrite engine. The worklist starts with every live node (in id order, or
// in a caller-supplied order) and a node is queued at most once at a time. Processing a node
// runs, in order: dead-code elimination for unused floating nodes, stamp re-inference (the
// inferred stamp is met with the current one so stamps only ever narrow), replacement of a
// floating node whose stamp is a single value by the graph's shared constant, the opcode's
// rules from the rule table, and finally value numbering against an identical floating node.
// Whenever something changes, the nodes whose inputs or usages were affected are queued again.
// The engine stops at a fixed point; the total number of processed nodes is capped at a
// budget proportional to the initial graph size, and exceeding it aborts the compilation unit
// with the identity of the node being processed.

//! Canonicalization of a [`Graph`] to a fixed point.

use super::rules::{rules_for, NewInput, Rewrite};
use crate::core::config::CanonicalizerConfig;
use crate::core::error::{CompileError, CompileResult};
use crate::ir::{Graph, NodeId, NodeKind};
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;
use std::fmt;

/// What one canonicalizer run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalizerStats {
    pub iterations: usize,
    pub nodes_deleted: usize,
    pub stamps_narrowed: usize,
    rewrites: HashMap<&'static str, usize>,
}

impl CanonicalizerStats {
    pub fn total_rewrites(&self) -> usize {
        self.rewrites.values().sum()
    }

    pub fn rewrite_count(&self, rule: &str) -> usize {
        self.rewrites.get(rule).copied().unwrap_or(0)
    }

    /// Applied rewrites per rule, sorted by rule name.
    pub fn rewrites(&self) -> Vec<(&'static str, usize)> {
        let mut rewrites: Vec<_> = self.rewrites.iter().map(|(&k, &v)| (k, v)).collect();
        rewrites.sort_unstable();
        rewrites
    }

    /// Whether the run left the graph untouched.
    pub fn is_noop(&self) -> bool {
        self.rewrites.is_empty() && self.nodes_deleted == 0 && self.stamps_narrowed == 0
    }
}

impl fmt::Display for CanonicalizerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "; canonicalized in {} iterations: {} rewrites, {} nodes deleted, {} stamps narrowed",
            self.iterations,
            self.total_rewrites(),
            self.nodes_deleted,
            self.stamps_narrowed
        )?;
        for (rule, count) in self.rewrites() {
            writeln!(f, ";   {rule}: {count}")?;
        }
        Ok(())
    }
}

pub struct Canonicalizer {
    config: CanonicalizerConfig,
    worklist: VecDeque<NodeId>,
    in_worklist: HashSet<NodeId>,
    stats: CanonicalizerStats,
}

impl Canonicalizer {
    pub fn new(config: CanonicalizerConfig) -> Self {
        Self {
            config,
            worklist: VecDeque::new(),
            in_worklist: HashSet::new(),
            stats: CanonicalizerStats::default(),
        }
    }

    pub fn config(&self) -> &CanonicalizerConfig {
        &self.config
    }

    /// Rewrite `graph` to a fixed point, seeding the worklist in id order.
    pub fn canonicalize(&mut self, graph: &mut Graph) -> CompileResult<CanonicalizerStats> {
        let order = graph.node_ids();
        self.canonicalize_with_order(graph, &order)
    }

    /// Like [`canonicalize`](Self::canonicalize) with an explicit initial
    /// worklist order. Live nodes missing from `order` are appended.
    pub fn canonicalize_with_order(
        &mut self,
        graph: &mut Graph,
        order: &[NodeId],
    ) -> CompileResult<CanonicalizerStats> {
        self.worklist.clear();
        self.in_worklist.clear();
        self.stats = CanonicalizerStats::default();

        let limit = self.config.iteration_limit(graph.node_count());
        let before = graph.node_count();
        let mark = graph.mark();
        log::debug!(
            "canonicalizing {} ({} nodes, iteration limit {})",
            graph.name(),
            before,
            limit
        );

        for &id in order {
            self.push(id);
        }
        for id in graph.node_ids() {
            self.push(id);
        }

        while let Some(id) = self.worklist.pop_front() {
            self.in_worklist.remove(&id);
            if !graph.contains(id) {
                continue;
            }
            if self.stats.iterations >= limit {
                log::warn!("{}: iteration limit {} exceeded at {}", graph.name(), limit, id);
                return Err(CompileError::IterationLimitExceeded { limit, node: id });
            }
            self.stats.iterations += 1;
            self.process(graph, id)?;
        }

        self.stats.nodes_deleted = (before + graph.created_since(mark)).saturating_sub(graph.node_count());
        log::debug!(
            "canonicalized {}: {} iterations, {} rewrites, {} nodes left",
            graph.name(),
            self.stats.iterations,
            self.stats.total_rewrites(),
            graph.node_count()
        );
        Ok(std::mem::take(&mut self.stats))
    }

    fn push(&mut self, id: NodeId) {
        if self.in_worklist.insert(id) {
            self.worklist.push_back(id);
        }
    }

    fn push_all(&mut self, ids: &[NodeId]) {
        ids.iter().for_each(|&id| self.push(id));
    }

    fn push_usages(&mut self, graph: &Graph, id: NodeId) {
        let usages = graph.usages(id).to_vec();
        self.push_all(&usages);
    }

    fn record(&mut self, rule: &'static str, id: NodeId) {
        log::trace!("{rule} fired on {id}");
        *self.stats.rewrites.entry(rule).or_insert(0) += 1;
    }

    fn process(&mut self, graph: &mut Graph, id: NodeId) -> CompileResult<()> {
        let node = graph.node(id)?;
        let kind = node.kind();

        if node.is_floating() {
            if self.config.dead_code_elimination && !node.has_usages() && !matches!(kind, NodeKind::Param(_)) {
                let inputs = node.inputs().to_vec();
                graph.delete(id)?;
                self.push_all(&inputs);
                return Ok(());
            }
            self.update_stamp(graph, id)?;
            if self.fold_to_constant(graph, id)? {
                return Ok(());
            }
        }

        for rule in rules_for(kind.opcode()) {
            if let Some(rewrite) = (rule.apply)(graph, id) {
                self.record(rule.name, id);
                return self.apply(graph, id, rewrite);
            }
        }

        if self.config.value_numbering {
            if let Some(duplicate) = graph.find_duplicate(id) {
                self.record("value_numbering", id);
                self.replace(graph, id, duplicate)?;
            }
        }
        Ok(())
    }

    /// Narrow the stamp of `id` to what its inputs imply.
    fn update_stamp(&mut self, graph: &mut Graph, id: NodeId) -> CompileResult<()> {
        let node = graph.node(id)?;
        let stamps: Vec<_> = node.inputs().iter().filter_map(|&i| graph.stamp(i)).collect();
        let Some(inferred) = node.kind().infer_stamp(&stamps) else {
            return Ok(());
        };
        let old = node.stamp();
        if inferred.kind() != old.kind() {
            return Ok(());
        }
        let narrowed = old.meet(&inferred);
        if narrowed != old {
            log::trace!("{id}: stamp {old} -> {narrowed}");
            graph.set_stamp(id, narrowed)?;
            self.stats.stamps_narrowed += 1;
            self.push_usages(graph, id);
        }
        Ok(())
    }

    fn fold_to_constant(&mut self, graph: &mut Graph, id: NodeId) -> CompileResult<bool> {
        let node = graph.node(id)?;
        let kind = node.kind();
        let stamp = node.stamp();
        let Some(value) = stamp.as_constant() else {
            return Ok(false);
        };
        match kind {
            NodeKind::Constant(_) => Ok(false),
            NodeKind::Param(_) => {
                if !node.has_usages() {
                    return Ok(false);
                }
                let constant = graph.unique_constant(stamp.kind(), value);
                self.record("constant_param", id);
                graph.replace_at_usages(id, constant)?;
                self.push(constant);
                self.push_usages(graph, constant);
                Ok(true)
            }
            _ => {
                let constant = graph.unique_constant(stamp.kind(), value);
                self.record("fold_stamp_constant", id);
                self.replace(graph, id, constant)?;
                Ok(true)
            }
        }
    }

    /// Replace the floating node `id` by `new` and delete it.
    fn replace(&mut self, graph: &mut Graph, id: NodeId, new: NodeId) -> CompileResult<()> {
        let inputs = graph.inputs(id).to_vec();
        graph.replace_and_delete(id, new)?;
        self.push(new);
        self.push_usages(graph, new);
        self.push_all(&inputs);
        Ok(())
    }

    fn build(&mut self, graph: &mut Graph, input: NewInput) -> CompileResult<NodeId> {
        match input {
            NewInput::Node(node) => Ok(node),
            NewInput::Value(kind, operands) => {
                let mut resolved = Vec::with_capacity(operands.len());
                for operand in operands {
                    resolved.push(self.build(graph, operand)?);
                }
                let value = graph.add_value(kind, &resolved)?;
                self.push(value);
                Ok(value)
            }
        }
    }

    fn apply(&mut self, graph: &mut Graph, id: NodeId, rewrite: Rewrite) -> CompileResult<()> {
        match rewrite {
            Rewrite::Replace(new) => self.replace(graph, id, new),
            Rewrite::Constant(value) => {
                let kind = graph.node(id)?.stamp().kind();
                let constant = graph.unique_constant(kind, value);
                self.replace(graph, id, constant)
            }
            Rewrite::New { kind, inputs } => {
                let mut resolved = Vec::with_capacity(inputs.len());
                for input in inputs {
                    resolved.push(self.build(graph, input)?);
                }
                let new = graph.add_value(kind, &resolved)?;
                self.replace(graph, id, new)
            }
            Rewrite::RemoveFixed => {
                let next = graph.node(id)?.next();
                let inputs = graph.remove_fixed(id)?;
                self.push_all(&inputs);
                if let Some(next) = next {
                    self.push(next);
                }
                Ok(())
            }
            Rewrite::RemoveSplit { surviving } => {
                let touched = graph.remove_split(id, surviving)?;
                self.push_all(&touched);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Opcode, Stamp, StampKind};
    use crate::kir::{parse_graph, print_graph};

    fn canon(text: &str) -> (Graph, CanonicalizerStats) {
        let mut graph = parse_graph(text).unwrap();
        let stats = Canonicalizer::new(CanonicalizerConfig::default())
            .canonicalize(&mut graph)
            .unwrap();
        graph.verify().unwrap();
        (graph, stats)
    }

    #[test]
    fn test_dead_node_removed_in_one_pass() {
        let (graph, stats) = canon(
            "graph f(%a: i32) {\n  %unused = mul %a, %a\n  return %a\n}",
        );
        assert_eq!(graph.nodes_with_opcode(Opcode::Mul).count(), 0);
        assert_eq!(stats.nodes_deleted, 1);
    }

    #[test]
    fn test_constant_folding_through_stamps() {
        let (graph, stats) = canon(
            "graph f() {\n  %a = const i32 6\n  %b = const i32 7\n  %m = mul %a, %b\n  return %m\n}",
        );
        let ret = graph.nodes_with_opcode(Opcode::Return).next().unwrap();
        let value = graph.inputs(ret)[0];
        assert_eq!(graph.kind(value), Some(NodeKind::Constant(42)));
        assert_eq!(stats.rewrite_count("fold_stamp_constant"), 1);
    }

    #[test]
    fn test_fixed_point() {
        let text = "graph f(%a: i32, %p: ptr) {\n  %c = const i64 3\n  %d = const i64 5\n  %x = address %p, %c\n  %y = address %x, %d\n  %z = const i32 0\n  %s = add %a, %z\n  %t = xor %s, %s\n  %u = or %t, %a\n  write %y, %u\n  return %u\n}";
        let (mut graph, stats) = canon(text);
        assert!(!stats.is_noop());
        let printed = print_graph(&graph);
        let again = Canonicalizer::new(CanonicalizerConfig::default())
            .canonicalize(&mut graph)
            .unwrap();
        assert!(again.is_noop(), "second run changed the graph: {again}");
        assert_eq!(print_graph(&graph), printed);
    }

    #[test]
    fn test_stamps_only_narrow() {
        let (graph, _) = canon(
            "graph f(%a: i32[0, 10]) {\n  %n = narrow %a, 5, 100\n  %c = const i32 1\n  %s = add %n, %c\n  return %s\n}",
        );
        let ret = graph.nodes_with_opcode(Opcode::Return).next().unwrap();
        let value = graph.inputs(ret)[0];
        assert_eq!(graph.stamp(value), Some(Stamp::range(StampKind::Int32, 6, 11)));
    }

    #[test]
    fn test_value_numbering() {
        let text = "graph f(%a: i32, %b: i32) {\n  %x = add %a, %b\n  %y = add %a, %b\n  %s = sub %x, %y\n  return %s\n}";
        let (graph, stats) = canon(text);
        // sub(x, x) after merging the duplicate adds.
        let ret = graph.nodes_with_opcode(Opcode::Return).next().unwrap();
        assert_eq!(graph.kind(graph.inputs(ret)[0]), Some(NodeKind::Constant(0)));
        assert_eq!(stats.rewrite_count("value_numbering"), 1);

        let mut graph = parse_graph(text).unwrap();
        let config = CanonicalizerConfig::default().with_value_numbering(false);
        Canonicalizer::new(config).canonicalize(&mut graph).unwrap();
        assert_eq!(graph.nodes_with_opcode(Opcode::Add).count(), 2);
    }

    #[test]
    fn test_constant_if_folds_branch() {
        let text = "graph f(%a: i32[0, 5]) {\n  %b = const i32 10\n  %t = lt %a, %b\n  if %t {\n    return %a\n  } else {\n    %n = neg %a\n    return %n\n  }\n}";
        let (graph, stats) = canon(text);
        assert_eq!(graph.nodes_with_opcode(Opcode::If).count(), 0);
        assert_eq!(graph.nodes_with_opcode(Opcode::Begin).count(), 0);
        assert_eq!(graph.nodes_with_opcode(Opcode::Neg).count(), 0);
        assert_eq!(graph.nodes_with_opcode(Opcode::Return).count(), 1);
        assert_eq!(stats.rewrite_count("fold_constant_if"), 1);
        assert_eq!(stats.rewrite_count("remove_begin"), 1);
    }

    #[test]
    fn test_iteration_limit() {
        let mut graph = parse_graph(
            "graph f(%a: i32) {\n  %z = const i32 0\n  %s = add %a, %z\n  return %s\n}",
        )
        .unwrap();
        let config = CanonicalizerConfig::default().with_fixed_iteration_limit(2);
        let err = Canonicalizer::new(config).canonicalize(&mut graph).unwrap_err();
        assert!(matches!(err, CompileError::IterationLimitExceeded { limit: 2, .. }));
        assert!(err.is_resource_exhaustion());
    }
}
