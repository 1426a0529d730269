//! FileCheck-style tests for KIR files
//!
//! Every `.kir` file under `tests/filetests` carries its own RUN line and
//! CHECK directives; see `kelp::kir::check` for the directive syntax.

mod common;

use kelp::kir::{TestRunner, TestSpec};
use std::fs;
use std::path::{Path, PathBuf};

fn filetest_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("filetests")
}

/// Discovers all .kir files in a directory recursively
fn discover_kir_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(discover_kir_files(&path));
            } else if path.extension().and_then(|s| s.to_str()) == Some("kir") {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

fn run_kir_file(path: &Path) -> Result<(), String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let spec = TestSpec::parse(&contents)?;
    TestRunner::new(false).run_test(&spec)
}

/// Test helper that runs a KIR file through FileCheck validation
fn run_filecheck_test(kir_file: &str) {
    common::init_logging();
    let path = filetest_dir().join(kir_file);
    run_kir_file(&path).unwrap_or_else(|e| panic!("Test {} failed: {}", kir_file, e));
}

#[test]
fn test_identities_filecheck() {
    run_filecheck_test("identities.kir");
}

#[test]
fn test_addresses_filecheck() {
    run_filecheck_test("addresses.kir");
}

#[test]
fn test_branches_filecheck() {
    run_filecheck_test("branches.kir");
}

#[test]
fn test_print_filecheck() {
    run_filecheck_test("print.kir");
}

#[test]
fn test_verify_filecheck() {
    run_filecheck_test("verify.kir");
}

#[test]
fn test_value_numbering_filecheck() {
    run_filecheck_test("value_numbering.kir");
    run_filecheck_test("no_value_numbering.kir");
}

#[test]
fn test_stats_filecheck() {
    run_filecheck_test("stats.kir");
}

#[test]
fn test_iteration_limit_filecheck() {
    run_filecheck_test("iteration_limit.kir");
}

/// Run every file in the directory, so new files are picked up without a
/// dedicated test function.
#[test]
fn test_all_filetests() {
    common::init_logging();
    let files = discover_kir_files(&filetest_dir());
    assert!(!files.is_empty(), "no .kir files found");

    let failures: Vec<String> = files
        .iter()
        .filter_map(|path| run_kir_file(path).err().map(|e| format!("{}: {}", path.display(), e)))
        .collect();
    assert!(failures.is_empty(), "{} filetests failed:\n{}", failures.len(), failures.join("\n"));
}
