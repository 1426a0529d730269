//! Graph optimization: the canonicalizer and its rewrite rules.

pub mod canonicalizer;
pub mod rules;

pub use canonicalizer::{Canonicalizer, CanonicalizerStats};
pub use rules::{NewInput, Rewrite, Rule, RULES};
