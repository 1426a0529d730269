// This module defines the error type shared by every stage of kelp using the thiserror
// crate. CompileError covers the three failure classes of a compilation unit: invariant
// violations (inconsistent input/usage edges, deleting a live node, double-binding a
// label, querying an unbound label), resource exhaustion (the canonicalizer's iteration
// cap, buffer growth) and contract violations detected before emission (unallocated LIR
// operands, alive operands sharing storage with a def or temp). Each variant carries the
// node, label or buffer position needed to diagnose it. None of these errors is
// recoverable inside the unit: the driver abandons the Graph and Buffer and may retry
// the whole compilation with a different strategy.

//! Error types for the kelp compiler core.
//!
//! Using thiserror for more idiomatic error handling.

use crate::asm::label::LabelId;
use crate::ir::node::NodeId;
use thiserror::Error;

/// Main error type for a compilation unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("Cannot delete {node}: still used by {usages:?}")]
    NodeHasUsages { node: NodeId, usages: Vec<NodeId> },

    #[error("Node {node} is not alive")]
    DeletedNode { node: NodeId },

    #[error("Input index {index} out of range for {node} ({len} inputs)")]
    InputOutOfRange { node: NodeId, index: usize, len: usize },

    #[error("Canonicalization did not reach a fixed point after {limit} iterations (last node {node})")]
    IterationLimitExceeded { limit: usize, node: NodeId },

    #[error("Label {label} ({name}) is already bound at {position}")]
    LabelAlreadyBound { label: LabelId, name: String, position: usize },

    #[error("Label {label} ({name}) is not bound")]
    LabelUnbound { label: LabelId, name: String },

    #[error("Cannot bind label {label} to negative position {position}")]
    NegativeLabelPosition { label: LabelId, position: i64 },

    #[error("Unknown label {label}")]
    UnknownLabel { label: LabelId },

    #[error("Buffer position {position} out of range (capacity {capacity})")]
    PositionOutOfRange { position: usize, capacity: usize },

    #[error("Write to a closed buffer")]
    BufferClosed,

    #[error("Buffer cannot grow to {requested} bytes")]
    BufferGrowth { requested: usize },

    #[error("Invalid opcode {opcode:#04x} at patch site {site}")]
    InvalidPatchSite { site: usize, opcode: u8 },

    #[error("Branch displacement {displacement} does not fit the encoding at {site}")]
    BranchTargetOutOfBounds { site: usize, displacement: i64 },

    #[error("Encoding failed: {reason}")]
    Encoding { reason: String },

    #[error("Operand {index} of {instruction} has no location: {reason}")]
    UnallocatedOperand {
        instruction: &'static str,
        index: usize,
        reason: String,
    },

    #[error("Alive operand of {instruction} shares storage with a def/temp: {location}")]
    AliveOperandClobbered {
        instruction: &'static str,
        location: String,
    },

    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Lowering failed: {reason}")]
    Lowering { reason: String },
}

impl CompileError {
    /// Errors that mean the graph or the label state can no longer be trusted.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            CompileError::InvariantViolation { .. }
                | CompileError::NodeHasUsages { .. }
                | CompileError::DeletedNode { .. }
                | CompileError::InputOutOfRange { .. }
                | CompileError::LabelAlreadyBound { .. }
                | CompileError::LabelUnbound { .. }
                | CompileError::NegativeLabelPosition { .. }
                | CompileError::UnknownLabel { .. }
                | CompileError::PositionOutOfRange { .. }
                | CompileError::BufferClosed
        )
    }

    /// Errors raised by the resource safeguards (iteration cap, buffer growth).
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            CompileError::IterationLimitExceeded { .. } | CompileError::BufferGrowth { .. }
        )
    }

    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        CompileError::InvariantViolation {
            reason: reason.into(),
        }
    }
}

impl From<iced_x86::IcedError> for CompileError {
    fn from(e: iced_x86::IcedError) -> Self {
        CompileError::Encoding {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
