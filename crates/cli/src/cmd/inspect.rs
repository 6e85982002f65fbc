//! Implementation of the `xsuite inspect` command.
//!
//! Scans an install tree for ELF files whose run-paths would stop it from
//! being relocated.

use std::path::Path;

use anyhow::{Context, Result, bail};

use xsuite_lib::inspect::inspect_tree;

use crate::output::{OutputFormat, print_error, print_json, print_stat, print_success};

pub fn cmd_inspect(path: &Path, format: OutputFormat) -> Result<()> {
  if !path.is_dir() {
    bail!("Not a directory: {}", path.display());
  }
  let report = inspect_tree(path).with_context(|| format!("Failed to inspect {}", path.display()))?;

  if format.is_json() {
    let findings: Vec<_> = report
      .findings
      .iter()
      .map(|f| {
        serde_json::json!({
          "file": f.file,
          "entry": f.entry,
          "violation": f.violation.to_string(),
        })
      })
      .collect();
    print_json(&serde_json::json!({
      "files_scanned": report.files_scanned,
      "elf_files": report.elf_files,
      "with_run_paths": report.with_run_paths,
      "findings": findings,
    }))?;
  } else {
    for finding in &report.findings {
      print_error(&finding.to_string());
    }
    if report.is_clean() {
      print_success(&format!("No run-path problems under {}", path.display()));
    }
    print_stat("Files scanned", &report.files_scanned.to_string());
    print_stat("ELF files", &report.elf_files.to_string());
    print_stat("With run-paths", &report.with_run_paths.to_string());
  }

  if !report.is_clean() {
    bail!("{} run-path problem(s) found", report.findings.len());
  }
  Ok(())
}
