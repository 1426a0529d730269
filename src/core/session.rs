// Arena-backed state shared by every compilation unit of one kelp run. A CompilationSession
// borrows a bumpalo arena and interns unit names in it, so reports and compiled code can refer
// to names for the lifetime of the session without cloning. It also accumulates SessionStats
// across units: graphs canonicalized, canonicalizer iterations, rewrites applied per rule,
// nodes deleted, LIR instructions emitted per instruction name, labels bound, branch patches
// applied and bytes of machine code produced. The statistics live behind a RefCell so that
// stages holding a shared session reference can record into it. A session is confined to
// one thread; parallel compilation uses one session per thread.

//! Arena-based compilation session and statistics.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Compilation session owning interned names and run statistics.
pub struct CompilationSession<'arena> {
    arena: &'arena Bump,

    stats: RefCell<SessionStats>,

    /// String interning for unit names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Fold the statistics of one canonicalizer run into the session.
    pub fn record_canonicalization(&self, iterations: usize, nodes_deleted: usize, rewrites: &[(&'static str, usize)]) {
        let mut stats = self.stats.borrow_mut();
        stats.graphs_canonicalized += 1;
        stats.canonicalizer_iterations += iterations;
        stats.nodes_deleted += nodes_deleted;
        for &(rule, count) in rewrites {
            *stats.rewrite_counts.entry(rule.to_string()).or_insert(0) += count;
        }
    }

    pub fn record_instruction_emitted(&self, name: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_emitted += 1;
        *stats.instruction_counts.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn record_labels(&self, bound: usize, patches: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.labels_bound += bound;
        stats.patches_applied += patches;
    }

    /// Record a finished unit and its code size.
    pub fn record_unit_compiled(&self, name: &str, code_size: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.units_compiled += 1;
        stats.total_code_size += code_size;

        if stats.largest_unit_size < code_size {
            stats.largest_unit_size = code_size;
            stats.largest_unit_name = name.to_string();
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub units_compiled: usize,

    /// Total code size generated (bytes).
    pub total_code_size: usize,

    pub largest_unit_size: usize,
    pub largest_unit_name: String,

    pub graphs_canonicalized: usize,
    pub canonicalizer_iterations: usize,
    pub nodes_deleted: usize,

    /// Rewrites applied, keyed by rule name.
    pub rewrite_counts: HashMap<String, usize>,

    pub instructions_emitted: usize,

    /// LIR instructions emitted, keyed by instruction name.
    pub instruction_counts: HashMap<String, usize>,

    pub labels_bound: usize,
    pub patches_applied: usize,
}

impl SessionStats {
    pub fn total_rewrites(&self) -> usize {
        self.rewrite_counts.values().sum()
    }
}

fn write_top(f: &mut fmt::Formatter<'_>, title: &str, counts: &HashMap<String, usize>) -> fmt::Result {
    if counts.is_empty() {
        return Ok(());
    }
    writeln!(f, "  {title}:")?;
    let mut sorted: Vec<_> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (name, count) in sorted.into_iter().take(10) {
        writeln!(f, "    {}: {}", name, count)?;
    }
    Ok(())
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Units compiled: {}", self.units_compiled)?;
        writeln!(f, "  Graphs canonicalized: {}", self.graphs_canonicalized)?;
        writeln!(f, "  Canonicalizer iterations: {}", self.canonicalizer_iterations)?;
        writeln!(f, "  Rewrites applied: {}", self.total_rewrites())?;
        writeln!(f, "  Nodes deleted: {}", self.nodes_deleted)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Labels bound: {}", self.labels_bound)?;
        writeln!(f, "  Patches applied: {}", self.patches_applied)?;
        writeln!(f, "  Total code size: {} bytes", self.total_code_size)?;

        if !self.largest_unit_name.is_empty() {
            writeln!(
                f,
                "  Largest unit: {} ({} bytes)",
                self.largest_unit_name, self.largest_unit_size
            )?;
        }

        write_top(f, "Rewrite breakdown", &self.rewrite_counts)?;
        write_top(f, "Instruction breakdown", &self.instruction_counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let s1 = session.intern_str("hello");
        let s2 = session.intern_str("hello");
        let s3 = session.intern_str("world");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_canonicalization(12, 3, &[("add_zero", 2), ("fold_constant", 1)]);
        session.record_canonicalization(5, 0, &[("add_zero", 1)]);
        session.record_instruction_emitted("move");
        session.record_instruction_emitted("move");
        session.record_instruction_emitted("return");
        session.record_labels(2, 3);
        session.record_unit_compiled("f", 64);
        session.record_unit_compiled("g", 16);

        let stats = session.stats();
        assert_eq!(stats.graphs_canonicalized, 2);
        assert_eq!(stats.canonicalizer_iterations, 17);
        assert_eq!(stats.rewrite_counts["add_zero"], 3);
        assert_eq!(stats.total_rewrites(), 4);
        assert_eq!(stats.instruction_counts["move"], 2);
        assert_eq!(stats.total_code_size, 80);
        assert_eq!(stats.largest_unit_name, "f");

        let report = stats.to_string();
        assert!(report.contains("Units compiled: 2"));
        assert!(report.contains("add_zero: 3"));
    }
}
