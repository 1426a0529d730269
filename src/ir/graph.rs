// The Graph owns every node of one compilation unit in an arena of slots indexed by NodeId.
// Ids are handed out sequentially and never reused; deleting a node empties its slot. All
// mutation goes through a small set of primitives (add, delete, replace-and-delete plus the
// edge editors built on them) and each primitive keeps two invariants: A lists B as an input
// exactly as many times as B lists A as a usage, and a fixed node's successor points back
// to it through its predecessor link. Deleting a node that still has usages, or a fixed
// node that is still linked, is refused with an invariant violation. Constants are interned
// per (kind, value) in a hashbrown map so that folding never duplicates them.

//! Node arena with edge-consistent mutation primitives.

use super::node::{Node, NodeId, NodeKind, Opcode};
use super::stamp::{Stamp, StampKind};
use crate::core::error::{CompileError, CompileResult};
use hashbrown::{HashMap, HashSet};

/// Position in the id sequence, used to find nodes created after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// A graph of nodes for one compilation unit.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    nodes: Vec<Option<Node>>,
    start: NodeId,
    live: usize,
    constants: HashMap<(StampKind, i64), NodeId>,
}

impl Graph {
    /// Create a graph holding only its start node.
    pub fn new(name: impl Into<String>) -> Self {
        let mut graph = Self {
            name: name.into(),
            nodes: Vec::new(),
            start: NodeId::new(0),
            live: 0,
            constants: HashMap::new(),
        };
        graph.start = graph.push(Node::new(NodeKind::Start, Vec::new(), Stamp::void()));
        graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.live
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn node(&self, id: NodeId) -> CompileResult<&Node> {
        self.get(id).ok_or(CompileError::DeletedNode { node: id })
    }

    fn node_mut(&mut self, id: NodeId) -> CompileResult<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(CompileError::DeletedNode { node: id })
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        self.live += 1;
        id
    }

    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::inputs).unwrap_or(&[])
    }

    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::usages).unwrap_or(&[])
    }

    pub fn stamp(&self, id: NodeId) -> Option<Stamp> {
        self.get(id).map(Node::stamp)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.get(id).map(Node::kind)
    }

    pub fn is_floating(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_floating)
    }

    pub fn is_fixed(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_fixed)
    }

    // ==== Node creation ====

    /// Add a node with the given inputs and initial stamp.
    pub fn add_node(&mut self, kind: NodeKind, inputs: &[NodeId], stamp: Stamp) -> CompileResult<NodeId> {
        let (min, max) = kind.input_arity();
        if inputs.len() < min || inputs.len() > max {
            return Err(CompileError::invariant(format!(
                "{} takes {}..={} inputs, got {}",
                kind.opcode().name(),
                min,
                max,
                inputs.len()
            )));
        }
        for &input in inputs {
            self.node(input)?;
        }
        let id = self.push(Node::new(kind, inputs.to_vec(), stamp));
        for &input in inputs {
            self.node_mut(input)?.usages.push(id);
        }
        if let NodeKind::Constant(value) = kind {
            self.constants.entry((stamp.kind(), value)).or_insert(id);
        }
        log::trace!("add {} {:?} {:?}", id, kind, inputs);
        Ok(id)
    }

    /// Add a node whose stamp is derived from its inputs.
    pub fn add_value(&mut self, kind: NodeKind, inputs: &[NodeId]) -> CompileResult<NodeId> {
        let stamps = inputs
            .iter()
            .map(|&i| self.node(i).map(Node::stamp))
            .collect::<CompileResult<Vec<_>>>()?;
        let stamp = kind.infer_stamp(&stamps).ok_or_else(|| {
            CompileError::invariant(format!("{} needs an explicit stamp", kind.opcode().name()))
        })?;
        self.add_node(kind, inputs, stamp)
    }

    pub fn add_param(&mut self, index: u32, stamp: Stamp) -> CompileResult<NodeId> {
        self.add_node(NodeKind::Param(index), &[], stamp)
    }

    /// The shared constant node for `value` of `kind`.
    pub fn unique_constant(&mut self, kind: StampKind, value: i64) -> NodeId {
        let value = kind.wrap(value);
        if let Some(&id) = self.constants.get(&(kind, value)) {
            if self.contains(id) {
                return id;
            }
        }
        let id = self.push(Node::new(
            NodeKind::Constant(value),
            Vec::new(),
            Stamp::constant(kind, value),
        ));
        self.constants.insert((kind, value), id);
        id
    }

    pub fn params(&self) -> Vec<NodeId> {
        let mut params: Vec<(u32, NodeId)> = self
            .iter()
            .filter_map(|(id, n)| match n.kind() {
                NodeKind::Param(index) => Some((index, id)),
                _ => None,
            })
            .collect();
        params.sort_unstable();
        params.into_iter().map(|(_, id)| id).collect()
    }

    // ==== Input edges ====

    fn remove_usage(&mut self, input: NodeId, user: NodeId) -> CompileResult<()> {
        let usages = &mut self.node_mut(input)?.usages;
        match usages.iter().position(|&u| u == user) {
            Some(pos) => {
                usages.remove(pos);
                Ok(())
            }
            None => Err(CompileError::invariant(format!(
                "{input} does not list {user} as a usage"
            ))),
        }
    }

    pub fn add_input(&mut self, node: NodeId, input: NodeId) -> CompileResult<()> {
        self.node(input)?;
        let n = self.node_mut(node)?;
        let (_, max) = n.kind.input_arity();
        if n.inputs.len() >= max {
            return Err(CompileError::InputOutOfRange {
                node,
                index: n.inputs.len(),
                len: max,
            });
        }
        n.inputs.push(input);
        self.node_mut(input)?.usages.push(node);
        Ok(())
    }

    /// Remove the input at `index`, shifting later inputs down.
    pub fn remove_input(&mut self, node: NodeId, index: usize) -> CompileResult<NodeId> {
        let n = self.node_mut(node)?;
        if index >= n.inputs.len() {
            return Err(CompileError::InputOutOfRange {
                node,
                index,
                len: n.inputs.len(),
            });
        }
        let input = n.inputs.remove(index);
        self.remove_usage(input, node)?;
        Ok(input)
    }

    pub fn set_input(&mut self, node: NodeId, index: usize, new: NodeId) -> CompileResult<()> {
        self.node(new)?;
        let n = self.node_mut(node)?;
        let len = n.inputs.len();
        let slot = n
            .inputs
            .get_mut(index)
            .ok_or(CompileError::InputOutOfRange { node, index, len })?;
        let old = std::mem::replace(slot, new);
        if old != new {
            self.remove_usage(old, node)?;
            self.node_mut(new)?.usages.push(node);
        }
        Ok(())
    }

    /// Replace the first occurrence of `old` among the inputs of `node`.
    pub fn replace_first_input(&mut self, node: NodeId, old: NodeId, new: NodeId) -> CompileResult<bool> {
        match self.node(node)?.inputs.iter().position(|&i| i == old) {
            Some(index) => {
                self.set_input(node, index, new)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every input edge of `node` and return the former inputs.
    pub fn clear_inputs(&mut self, node: NodeId) -> CompileResult<Vec<NodeId>> {
        let inputs = std::mem::take(&mut self.node_mut(node)?.inputs);
        for &input in &inputs {
            self.remove_usage(input, node)?;
        }
        Ok(inputs)
    }

    pub fn set_stamp(&mut self, node: NodeId, stamp: Stamp) -> CompileResult<()> {
        self.node_mut(node)?.stamp = stamp;
        Ok(())
    }

    // ==== Replacement and deletion ====

    /// Rewire every usage of `old` to `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) -> CompileResult<()> {
        if old == new {
            return Ok(());
        }
        self.node(new)?;
        if self.node(old)?.usages.contains(&new) {
            return Err(CompileError::invariant(format!(
                "replacing {old} with its user {new} would create a cycle"
            )));
        }
        let users = std::mem::take(&mut self.node_mut(old)?.usages);
        let mut seen = HashSet::new();
        for user in users {
            if !seen.insert(user) {
                continue;
            }
            let mut count = 0;
            for input in self.node_mut(user)?.inputs.iter_mut() {
                if *input == old {
                    *input = new;
                    count += 1;
                }
            }
            let target = self.node_mut(new)?;
            target.usages.extend(std::iter::repeat(user).take(count));
        }
        Ok(())
    }

    /// Remove a node from the graph.
    ///
    /// The node must have no usages and, if fixed, must already be unlinked
    /// from the control chain.
    pub fn delete(&mut self, id: NodeId) -> CompileResult<()> {
        let node = self.node(id)?;
        if node.has_usages() {
            return Err(CompileError::NodeHasUsages {
                node: id,
                usages: node.usages.clone(),
            });
        }
        if node.is_linked() {
            return Err(CompileError::invariant(format!(
                "{id} is still linked into the control chain"
            )));
        }
        let kind = node.kind;
        let stamp_kind = node.stamp.kind();
        self.clear_inputs(id)?;
        if let NodeKind::Constant(value) = kind {
            if self.constants.get(&(stamp_kind, value)) == Some(&id) {
                self.constants.remove(&(stamp_kind, value));
            }
        }
        self.nodes[id.index()] = None;
        self.live -= 1;
        log::trace!("delete {} {:?}", id, kind);
        Ok(())
    }

    /// Rewire all usages of `old` to `new`, then delete `old`.
    pub fn replace_and_delete(&mut self, old: NodeId, new: NodeId) -> CompileResult<()> {
        if old == new {
            return Err(CompileError::invariant(format!("cannot replace {old} with itself")));
        }
        self.replace_at_usages(old, new)?;
        self.delete(old)
    }

    // ==== Control chain ====

    /// Link `successor` into slot `slot` of the fixed node `node`.
    pub fn set_successor(&mut self, node: NodeId, slot: usize, successor: NodeId) -> CompileResult<()> {
        let succ = self.node(successor)?;
        if !succ.is_fixed() || succ.predecessor.is_some() || successor == self.start {
            return Err(CompileError::invariant(format!(
                "{successor} cannot become a successor of {node}"
            )));
        }
        let n = self.node_mut(node)?;
        let len = n.successors.len();
        let entry = n
            .successors
            .get_mut(slot)
            .ok_or(CompileError::InputOutOfRange { node, index: slot, len })?;
        if let Some(existing) = *entry {
            return Err(CompileError::invariant(format!(
                "successor slot {slot} of {node} already holds {existing}"
            )));
        }
        *entry = Some(successor);
        self.node_mut(successor)?.predecessor = Some(node);
        Ok(())
    }

    fn replace_successor(&mut self, node: NodeId, old: NodeId, new: Option<NodeId>) -> CompileResult<()> {
        let n = self.node_mut(node)?;
        match n.successors.iter_mut().find(|s| **s == Some(old)) {
            Some(slot) => {
                *slot = new;
                Ok(())
            }
            None => Err(CompileError::invariant(format!(
                "{node} does not have {old} as a successor"
            ))),
        }
    }

    /// Insert the unlinked fixed node `node` directly after `pred`.
    pub fn add_fixed_after(&mut self, pred: NodeId, node: NodeId) -> CompileResult<()> {
        let n = self.node(node)?;
        if n.successors.len() != 1 || n.is_linked() {
            return Err(CompileError::invariant(format!(
                "{node} cannot be inserted into the control chain"
            )));
        }
        let p = self.node(pred)?;
        if p.successors.len() != 1 {
            return Err(CompileError::invariant(format!(
                "{pred} does not have a single successor"
            )));
        }
        let next = p.successors[0];
        self.node_mut(pred)?.successors[0] = Some(node);
        let n = self.node_mut(node)?;
        n.predecessor = Some(pred);
        n.successors[0] = next;
        if let Some(next) = next {
            self.node_mut(next)?.predecessor = Some(node);
        }
        Ok(())
    }

    /// Unlink a side-effect-free fixed node from the control chain and delete
    /// it. Returns the former inputs.
    pub fn remove_fixed(&mut self, node: NodeId) -> CompileResult<Vec<NodeId>> {
        let n = self.node(node)?;
        if n.kind.has_side_effect() || n.successors.len() != 1 {
            return Err(CompileError::invariant(format!(
                "{node} ({}) cannot be removed from the control chain",
                n.kind.opcode().name()
            )));
        }
        if n.has_usages() {
            return Err(CompileError::NodeHasUsages {
                node,
                usages: n.usages.clone(),
            });
        }
        let pred = n.predecessor;
        let next = n.successors[0];
        let n = self.node_mut(node)?;
        n.predecessor = None;
        n.successors[0] = None;
        if let Some(pred) = pred {
            self.replace_successor(pred, node, next)?;
        }
        if let Some(next) = next {
            self.node_mut(next)?.predecessor = pred;
        }
        let inputs = self.clear_inputs(node)?;
        self.delete(node)?;
        Ok(inputs)
    }

    /// Fold an `If` to its successor at `surviving`, killing the other branch.
    ///
    /// Returns the surviving nodes whose usages shrank, plus the surviving
    /// branch entry.
    pub fn remove_split(&mut self, if_node: NodeId, surviving: usize) -> CompileResult<Vec<NodeId>> {
        let n = self.node(if_node)?;
        if n.kind != NodeKind::If || surviving > 1 {
            return Err(CompileError::invariant(format!(
                "{if_node} is not a two-way split with successor {surviving}"
            )));
        }
        let pred = n.predecessor;
        let keep = n.successors[surviving].ok_or_else(|| {
            CompileError::invariant(format!("{if_node} has no successor {surviving}"))
        })?;
        let dead = n.successors[1 - surviving];

        let n = self.node_mut(if_node)?;
        n.successors = vec![None, None];
        n.predecessor = None;
        self.node_mut(keep)?.predecessor = None;
        if let Some(dead) = dead {
            self.node_mut(dead)?.predecessor = None;
        }
        if let Some(pred) = pred {
            self.replace_successor(pred, if_node, Some(keep))?;
            self.node_mut(keep)?.predecessor = Some(pred);
        }

        let mut touched = self.clear_inputs(if_node)?;
        self.delete(if_node)?;
        if let Some(dead) = dead {
            touched.extend(self.kill_cfg(dead)?);
        }
        let mut touched = self.kill_unused_floating(touched)?;
        touched.push(keep);
        let mut seen = HashSet::new();
        touched.retain(|&id| self.contains(id) && seen.insert(id));
        log::debug!("removed split {} keeping successor {}", if_node, surviving);
        Ok(touched)
    }

    /// Delete the fixed chain starting at `first` together with the floating
    /// nodes that only it uses. Returns surviving nodes whose usages shrank.
    pub fn kill_cfg(&mut self, first: NodeId) -> CompileResult<Vec<NodeId>> {
        if let Some(pred) = self.node(first)?.predecessor {
            self.replace_successor(pred, first, None)?;
            self.node_mut(first)?.predecessor = None;
        }

        let mut doomed = Vec::new();
        let mut in_doomed = HashSet::new();
        let mut stack = vec![first];
        while let Some(id) = stack.pop() {
            if !in_doomed.insert(id) {
                continue;
            }
            doomed.push(id);
            stack.extend(self.node(id)?.successors.iter().flatten().copied());
        }
        let mut i = 0;
        while i < doomed.len() {
            let users: Vec<NodeId> = self.usages(doomed[i]).to_vec();
            for user in users {
                if self.is_floating(user) && in_doomed.insert(user) {
                    doomed.push(user);
                }
            }
            i += 1;
        }

        let mut touched = Vec::new();
        for &id in &doomed {
            let n = self.node_mut(id)?;
            n.predecessor = None;
            n.successors.iter_mut().for_each(|s| *s = None);
            for input in self.clear_inputs(id)? {
                if !in_doomed.contains(&input) {
                    touched.push(input);
                }
            }
        }
        for &id in &doomed {
            self.delete(id)?;
        }
        log::trace!("killed {} nodes starting at {}", doomed.len(), first);
        self.kill_unused_floating(touched)
    }

    /// Delete the candidates that are unused floating nodes, then their inputs
    /// in turn. Params are kept. Returns the surviving candidates.
    fn kill_unused_floating(&mut self, candidates: Vec<NodeId>) -> CompileResult<Vec<NodeId>> {
        let mut survivors = Vec::new();
        let mut work = candidates;
        while let Some(id) = work.pop() {
            let Some(node) = self.get(id) else { continue };
            if node.is_floating() && !node.has_usages() && !matches!(node.kind, NodeKind::Param(_)) {
                work.extend(self.clear_inputs(id)?);
                self.delete(id)?;
            } else {
                survivors.push(id);
            }
        }
        let mut seen = HashSet::new();
        survivors.retain(|&id| self.contains(id) && seen.insert(id));
        Ok(survivors)
    }

    // ==== Iteration ====

    pub fn mark(&self) -> Mark {
        Mark(self.nodes.len())
    }

    /// Number of ids handed out after `mark`, including deleted nodes.
    pub fn created_since(&self, mark: Mark) -> usize {
        self.nodes.len().saturating_sub(mark.0)
    }

    /// Live nodes created after `mark` was taken.
    pub fn nodes_since(&self, mark: Mark) -> Vec<NodeId> {
        (mark.0..self.nodes.len())
            .map(|i| NodeId::new(i as u32))
            .filter(|&id| self.contains(id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId::new(i as u32), n)))
    }

    /// Snapshot of the live node ids; safe to hold across mutations.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn fixed_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.iter().filter(|(_, n)| n.is_fixed()).map(|(id, _)| id)
    }

    pub fn floating_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.iter().filter(|(_, n)| n.is_floating()).map(|(id, _)| id)
    }

    pub fn nodes_with_opcode(&self, opcode: Opcode) -> impl Iterator<Item = NodeId> + '_ {
        self.iter()
            .filter(move |(_, n)| n.opcode() == opcode)
            .map(|(id, _)| id)
    }

    // ==== Value numbering ====

    /// A different live floating node computing the same value as `id`.
    pub fn find_duplicate(&self, id: NodeId) -> Option<NodeId> {
        let node = self.get(id)?;
        if node.is_fixed() {
            return None;
        }
        match node.kind {
            NodeKind::Param(_) => None,
            NodeKind::Constant(value) => self
                .constants
                .get(&(node.stamp.kind(), value))
                .copied()
                .filter(|&c| c != id && self.contains(c)),
            _ => {
                let first = node.inputs.first()?;
                self.usages(*first).iter().copied().find(|&other| {
                    other != id
                        && self.get(other).is_some_and(|o| {
                            o.kind == node.kind && o.inputs == node.inputs && o.stamp == node.stamp
                        })
                })
            }
        }
    }

    // ==== Verification ====

    /// Check the edge invariants of every live node.
    pub fn verify(&self) -> CompileResult<()> {
        for (id, node) in self.iter() {
            let (min, max) = node.kind.input_arity();
            if node.inputs.len() < min || node.inputs.len() > max {
                return Err(CompileError::invariant(format!(
                    "{id} ({}) has {} inputs",
                    node.kind.opcode().name(),
                    node.inputs.len()
                )));
            }
            for &input in &node.inputs {
                let target = self.get(input).ok_or_else(|| {
                    CompileError::invariant(format!("{id} uses deleted node {input}"))
                })?;
                let edges = node.inputs.iter().filter(|&&i| i == input).count();
                let back = target.usages.iter().filter(|&&u| u == id).count();
                if edges != back {
                    return Err(CompileError::invariant(format!(
                        "{id} uses {input} {edges} times but {input} records {back} usages"
                    )));
                }
            }
            for &user in &node.usages {
                let user_node = self.get(user).ok_or_else(|| {
                    CompileError::invariant(format!("{id} lists deleted usage {user}"))
                })?;
                if !user_node.inputs.contains(&id) {
                    return Err(CompileError::invariant(format!(
                        "{id} lists {user} as a usage without a matching input"
                    )));
                }
            }
            for &succ in node.successors.iter().flatten() {
                let s = self.get(succ).ok_or_else(|| {
                    CompileError::invariant(format!("{id} has deleted successor {succ}"))
                })?;
                if s.predecessor != Some(id) {
                    return Err(CompileError::invariant(format!(
                        "successor {succ} of {id} does not point back"
                    )));
                }
            }
            if let Some(pred) = node.predecessor {
                let p = self.get(pred).ok_or_else(|| {
                    CompileError::invariant(format!("{id} has deleted predecessor {pred}"))
                })?;
                if !p.successors.contains(&Some(id)) {
                    return Err(CompileError::invariant(format!(
                        "predecessor {pred} of {id} does not list it"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i32_param(graph: &mut Graph, index: u32) -> NodeId {
        graph
            .add_param(index, Stamp::unrestricted(StampKind::Int32))
            .unwrap()
    }

    #[test]
    fn test_add_node_records_usages() {
        let mut graph = Graph::new("t");
        let a = i32_param(&mut graph, 0);
        let sum = graph.add_value(NodeKind::Add, &[a, a]).unwrap();
        assert_eq!(graph.usages(a), &[sum, sum]);
        graph.verify().unwrap();
    }

    #[test]
    fn test_edge_primitives_keep_invariant() {
        let mut graph = Graph::new("t");
        let a = i32_param(&mut graph, 0);
        let b = i32_param(&mut graph, 1);
        let ret = graph.add_node(NodeKind::Return, &[], Stamp::void()).unwrap();
        graph.set_successor(graph.start(), 0, ret).unwrap();

        graph.add_input(ret, a).unwrap();
        graph.verify().unwrap();
        graph.set_input(ret, 0, b).unwrap();
        graph.verify().unwrap();
        assert!(graph.usages(a).is_empty());
        assert!(graph.replace_first_input(ret, b, a).unwrap());
        graph.verify().unwrap();
        assert_eq!(graph.remove_input(ret, 0).unwrap(), a);
        graph.verify().unwrap();
        assert!(matches!(
            graph.remove_input(ret, 0),
            Err(CompileError::InputOutOfRange { .. })
        ));
    }

    #[test]
    fn test_delete_with_usages_is_refused() {
        let mut graph = Graph::new("t");
        let a = i32_param(&mut graph, 0);
        let neg = graph.add_value(NodeKind::Neg, &[a]).unwrap();
        let err = graph.delete(a).unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(matches!(err, CompileError::NodeHasUsages { node, .. } if node == a));
        graph.delete(neg).unwrap();
        assert!(graph.usages(a).is_empty());
        graph.verify().unwrap();
    }

    #[test]
    fn test_replace_and_delete() {
        let mut graph = Graph::new("t");
        let a = i32_param(&mut graph, 0);
        let b = i32_param(&mut graph, 1);
        let neg = graph.add_value(NodeKind::Neg, &[a]).unwrap();
        let sum = graph.add_value(NodeKind::Add, &[neg, neg]).unwrap();
        graph.replace_and_delete(neg, b).unwrap();
        assert!(!graph.contains(neg));
        assert_eq!(graph.inputs(sum), &[b, b]);
        assert!(graph.iter().all(|(_, n)| !n.inputs().contains(&neg)));
        graph.verify().unwrap();
    }

    #[test]
    fn test_unique_constant() {
        let mut graph = Graph::new("t");
        let c = graph.unique_constant(StampKind::Int32, 7);
        assert_eq!(graph.unique_constant(StampKind::Int32, 7), c);
        assert_ne!(graph.unique_constant(StampKind::Int64, 7), c);
        graph.delete(c).unwrap();
        let again = graph.unique_constant(StampKind::Int32, 7);
        assert_ne!(again, c);
    }

    #[test]
    fn test_fixed_chain_editing() {
        let mut graph = Graph::new("t");
        let p = graph.add_param(0, Stamp::unrestricted(StampKind::Pointer)).unwrap();
        let ret = graph.add_node(NodeKind::Return, &[], Stamp::void()).unwrap();
        graph.set_successor(graph.start(), 0, ret).unwrap();
        let read = graph
            .add_node(NodeKind::Read, &[p], Stamp::unrestricted(StampKind::Int64))
            .unwrap();
        graph.add_fixed_after(graph.start(), read).unwrap();
        assert_eq!(graph.node(read).unwrap().next(), Some(ret));
        graph.verify().unwrap();

        assert!(graph.delete(read).is_err());
        assert_eq!(graph.remove_fixed(read).unwrap(), vec![p]);
        assert_eq!(graph.node(graph.start()).unwrap().next(), Some(ret));
        assert_eq!(graph.node(ret).unwrap().predecessor(), Some(graph.start()));
        graph.verify().unwrap();
    }

    #[test]
    fn test_remove_split_kills_dead_branch() {
        let mut graph = Graph::new("t");
        let a = i32_param(&mut graph, 0);
        let cond = graph.unique_constant(StampKind::Int32, 1);
        let if_node = graph.add_node(NodeKind::If, &[cond], Stamp::void()).unwrap();
        graph.set_successor(graph.start(), 0, if_node).unwrap();
        let branch = |graph: &mut Graph, slot: usize, value: NodeId| {
            let begin = graph.add_node(NodeKind::Begin, &[], Stamp::void()).unwrap();
            let ret = graph.add_node(NodeKind::Return, &[value], Stamp::void()).unwrap();
            graph.set_successor(if_node, slot, begin).unwrap();
            graph.set_successor(begin, 0, ret).unwrap();
            begin
        };
        let neg = graph.add_value(NodeKind::Neg, &[a]).unwrap();
        let t = branch(&mut graph, 0, a);
        let f = branch(&mut graph, 1, neg);
        graph.verify().unwrap();

        let touched = graph.remove_split(if_node, 0).unwrap();
        assert!(touched.contains(&t));
        assert!(touched.contains(&a));
        assert!(!graph.contains(if_node));
        assert!(!graph.contains(f));
        assert!(!graph.contains(neg));
        assert!(!graph.contains(cond));
        assert_eq!(graph.node(graph.start()).unwrap().next(), Some(t));
        graph.verify().unwrap();
    }

    #[test]
    fn test_mark_and_snapshot() {
        let mut graph = Graph::new("t");
        let a = i32_param(&mut graph, 0);
        let mark = graph.mark();
        let snapshot = graph.node_ids();
        let n = graph.add_value(NodeKind::Not, &[a]).unwrap();
        assert_eq!(graph.nodes_since(mark), vec![n]);
        assert_eq!(snapshot.len() + 1, graph.node_count());
    }

    #[test]
    fn test_find_duplicate() {
        let mut graph = Graph::new("t");
        let a = i32_param(&mut graph, 0);
        let b = i32_param(&mut graph, 1);
        let x = graph.add_value(NodeKind::Sub, &[a, b]).unwrap();
        let y = graph.add_value(NodeKind::Sub, &[a, b]).unwrap();
        let z = graph.add_value(NodeKind::Sub, &[b, a]).unwrap();
        assert_eq!(graph.find_duplicate(y), Some(x));
        assert_eq!(graph.find_duplicate(z), None);
        assert_eq!(graph.find_duplicate(a), None);
    }
}
