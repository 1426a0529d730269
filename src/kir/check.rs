//! FileCheck-style test validation for KIR files.
//!
//! A test file holds `; RUN:` lines naming the pipeline to run, `; CHECK*`
//! directives matched against the printed output, and the graphs themselves.

use super::{parse_graphs, print_graph};
use crate::core::config::CanonicalizerConfig;
use crate::opt::Canonicalizer;

/// A CHECK directive extracted from a KIR file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match on this or a later line
    Check(String),
    /// CHECK-LABEL: pattern - Start of a section
    CheckLabel(String),
    /// CHECK-NEXT: pattern - Match on the line right after the previous match
    CheckNext(String),
    /// CHECK-NOT: pattern - Must not occur before the next positive match
    CheckNot(String),
    /// COM: comment
    Comment(String),
}

/// A RUN directive naming the pipeline to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
}

/// Test specification extracted from a KIR file
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
    pub kir_content: String,
}

impl TestSpec {
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();
        let mut kir_lines = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if let Some(run_cmd) = trimmed.strip_prefix("; RUN:") {
                let parts: Vec<&str> = run_cmd.split_whitespace().collect();
                match parts.split_first() {
                    Some((command, args)) => run_directives.push(RunDirective {
                        command: command.to_string(),
                        args: args.iter().map(|s| s.to_string()).collect(),
                    }),
                    None => return Err("empty RUN directive".to_string()),
                }
            } else if let Some(p) = trimmed.strip_prefix("; CHECK-LABEL:") {
                check_directives.push(CheckDirective::CheckLabel(p.trim().to_string()));
            } else if let Some(p) = trimmed.strip_prefix("; CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(p.trim().to_string()));
            } else if let Some(p) = trimmed.strip_prefix("; CHECK-NOT:") {
                check_directives.push(CheckDirective::CheckNot(p.trim().to_string()));
            } else if let Some(p) = trimmed.strip_prefix("; CHECK:") {
                check_directives.push(CheckDirective::Check(p.trim().to_string()));
            } else if let Some(p) = trimmed.strip_prefix("; COM:") {
                check_directives.push(CheckDirective::Comment(p.trim().to_string()));
            } else {
                kir_lines.push(line);
            }
        }

        if run_directives.is_empty() {
            return Err("test has no RUN directive".to_string());
        }
        Ok(TestSpec {
            run_directives,
            check_directives,
            kir_content: kir_lines.join("\n"),
        })
    }
}

/// Test runner that executes KIR tests
pub struct TestRunner {
    verbose: bool,
}

impl TestRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn run_test(&self, spec: &TestSpec) -> Result<(), String> {
        for run_dir in &spec.run_directives {
            let output = self.execute_command(&spec.kir_content, run_dir)?;
            if self.verbose {
                println!("{output}");
            }
            self.validate_output(&output, &spec.check_directives)?;
        }
        Ok(())
    }

    /// Run `print`, `verify` or `canon [--iteration-limit N] [--no-gvn]
    /// [--stats]` over every graph and return the output.
    fn execute_command(&self, kir: &str, run_dir: &RunDirective) -> Result<String, String> {
        let mut graphs = parse_graphs(kir).map_err(|e| e.to_string())?;
        let mut output = Vec::new();

        match run_dir.command.as_str() {
            "print" => {}
            "verify" => {
                for graph in &graphs {
                    graph.verify().map_err(|e| e.to_string())?;
                    output.push(format!("{}: ok", graph.name()));
                }
                return Ok(output.join("\n"));
            }
            "canon" => {
                let mut config = CanonicalizerConfig::default();
                let mut print_stats = false;
                let mut args = run_dir.args.iter();
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--no-gvn" => config = config.with_value_numbering(false),
                        "--stats" => print_stats = true,
                        "--iteration-limit" => {
                            let limit = args
                                .next()
                                .and_then(|v| v.parse().ok())
                                .ok_or("--iteration-limit needs a number")?;
                            config = config.with_fixed_iteration_limit(limit);
                        }
                        other => return Err(format!("unknown canon flag {other}")),
                    }
                }
                for graph in &mut graphs {
                    let mut canonicalizer = Canonicalizer::new(config.clone());
                    match canonicalizer.canonicalize(graph) {
                        Ok(stats) => {
                            if print_stats {
                                output.push(stats.to_string());
                            }
                        }
                        Err(e) => output.push(format!("error: {e}")),
                    }
                }
            }
            other => return Err(format!("unknown RUN command {other}")),
        }

        for graph in &graphs {
            output.push(print_graph(graph));
        }
        Ok(output.join("\n"))
    }

    /// Validate output against CHECK directives
    pub fn validate_output(&self, output: &str, directives: &[CheckDirective]) -> Result<(), String> {
        let lines: Vec<&str> = output.lines().collect();
        let mut line_idx = 0;
        let mut pending_not: Vec<&str> = Vec::new();

        let check_not = |pending: &mut Vec<&str>, from: usize, to: usize| -> Result<(), String> {
            for pattern in pending.drain(..) {
                if let Some(line) = lines[from..to].iter().find(|l| l.contains(pattern)) {
                    return Err(format!("CHECK-NOT: pattern '{pattern}' found in '{line}'"));
                }
            }
            Ok(())
        };

        for directive in directives {
            match directive {
                CheckDirective::Comment(_) => continue,

                CheckDirective::CheckNot(pattern) => pending_not.push(pattern.as_str()),

                CheckDirective::Check(pattern) | CheckDirective::CheckLabel(pattern) => {
                    let found = lines
                        .iter()
                        .skip(line_idx)
                        .position(|line| line.contains(pattern.as_str()));
                    match found {
                        Some(idx) => {
                            check_not(&mut pending_not, line_idx, line_idx + idx)?;
                            line_idx += idx + 1;
                            if self.verbose {
                                println!("CHECK: '{}' found at line {}", pattern, line_idx - 1);
                            }
                        }
                        None => return Err(format!("CHECK: pattern '{pattern}' not found in output")),
                    }
                }

                CheckDirective::CheckNext(pattern) => {
                    let Some(line) = lines.get(line_idx) else {
                        return Err(format!("CHECK-NEXT: no more lines, expected '{pattern}'"));
                    };
                    if !line.contains(pattern.as_str()) {
                        return Err(format!("CHECK-NEXT: expected '{pattern}' but got '{line}'"));
                    }
                    check_not(&mut pending_not, line_idx, line_idx)?;
                    line_idx += 1;
                }
            }
        }
        check_not(&mut pending_not, line_idx, lines.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        let content = "; RUN: canon --stats\n; CHECK-LABEL: graph f\n; CHECK-NOT: add\n; CHECK: return\n; COM: note\ngraph f() {\n  return\n}";
        let spec = TestSpec::parse(content).unwrap();
        assert_eq!(spec.run_directives[0].command, "canon");
        assert_eq!(spec.run_directives[0].args, vec!["--stats".to_string()]);
        assert_eq!(spec.check_directives.len(), 4);
        assert!(spec.kir_content.contains("graph f()"));
    }

    #[test]
    fn test_check_matching() {
        let runner = TestRunner::new(false);
        let output = "graph f() {\n  %v0 = const i32 1\n  return %v0\n}";
        let directives = vec![
            CheckDirective::CheckLabel("graph f".to_string()),
            CheckDirective::CheckNot("add".to_string()),
            CheckDirective::Check("const i32 1".to_string()),
            CheckDirective::CheckNext("return %v0".to_string()),
        ];
        runner.validate_output(output, &directives).unwrap();
    }

    #[test]
    fn test_check_not_failure() {
        let runner = TestRunner::new(false);
        let output = "a\nadd\nreturn";
        let directives = vec![
            CheckDirective::CheckNot("add".to_string()),
            CheckDirective::Check("return".to_string()),
        ];
        let err = runner.validate_output(output, &directives).unwrap_err();
        assert!(err.contains("CHECK-NOT"));
    }

    #[test]
    fn test_check_next_failure() {
        let runner = TestRunner::new(false);
        let directives = vec![
            CheckDirective::Check("Line 1".to_string()),
            CheckDirective::CheckNext("Line 3".to_string()),
        ];
        let result = runner.validate_output("Line 1\nLine 2\nLine 3\n", &directives);
        assert!(result.unwrap_err().contains("CHECK-NEXT"));
    }

    #[test]
    fn test_run_canon_pipeline() {
        let spec = TestSpec::parse(
            "; RUN: canon\n; CHECK: return %v0\n; CHECK-NOT: add\ngraph f(%a: i32) {\n  %z = const i32 0\n  %s = add %a, %z\n  return %s\n}",
        )
        .unwrap();
        TestRunner::new(false).run_test(&spec).unwrap();
    }
}
