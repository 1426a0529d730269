// The ir module holds the graph-based intermediate representation: the stamp lattice that
// describes the possible values of a node, the node kinds with their floating/fixed
// classification, and the Graph arena with the mutation primitives that keep input/usage
// and successor/predecessor edges consistent.

//! Graph IR and its abstract value domain.

pub mod graph;
pub mod node;
pub mod stamp;

pub use graph::{Graph, Mark};
pub use node::{Node, NodeId, NodeKind, Opcode};
pub use stamp::{Stamp, StampKind};
