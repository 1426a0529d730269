//! Configuration of the canonicalizer and of a whole compilation.

use crate::asm::ByteOrder;

/// Knobs of the rewrite engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalizerConfig {
    /// Iterations allowed per node of the initial graph.
    pub iterations_per_node: usize,
    /// Iterations allowed on top of the per-node budget.
    pub iteration_slack: usize,
    pub value_numbering: bool,
    pub dead_code_elimination: bool,
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        Self {
            iterations_per_node: 32,
            iteration_slack: 1024,
            value_numbering: true,
            dead_code_elimination: true,
        }
    }
}

impl CanonicalizerConfig {
    pub fn with_value_numbering(mut self, enabled: bool) -> Self {
        self.value_numbering = enabled;
        self
    }

    pub fn with_dead_code_elimination(mut self, enabled: bool) -> Self {
        self.dead_code_elimination = enabled;
        self
    }

    pub fn with_per_node_limit(mut self, iterations: usize) -> Self {
        self.iterations_per_node = iterations;
        self
    }

    /// Replace the budget with a fixed number of iterations.
    pub fn with_fixed_iteration_limit(mut self, limit: usize) -> Self {
        self.iterations_per_node = 0;
        self.iteration_slack = limit;
        self
    }

    /// Iteration cap for a graph with `node_count` nodes.
    pub fn iteration_limit(&self, node_count: usize) -> usize {
        node_count
            .saturating_mul(self.iterations_per_node)
            .saturating_add(self.iteration_slack)
    }
}

/// Settings for one [`Compiler`](crate::core::Compiler) run.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub canonicalizer: CanonicalizerConfig,
    pub initial_buffer_capacity: usize,
    pub byte_order: ByteOrder,
    /// Cut the code to the emitted size on close.
    pub trim: bool,
    /// Run `Graph::verify` after canonicalization.
    pub verify: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            canonicalizer: CanonicalizerConfig::default(),
            initial_buffer_capacity: 256,
            byte_order: ByteOrder::Little,
            trim: true,
            verify: cfg!(debug_assertions),
        }
    }
}

impl CompilerConfig {
    pub fn with_canonicalizer(mut self, canonicalizer: CanonicalizerConfig) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.initial_buffer_capacity = capacity;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }
}
