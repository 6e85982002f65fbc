//! Run-path inspection of installed ELF files.
//!
//! A runtime tree is only relocatable if every `DT_RPATH`/`DT_RUNPATH` entry
//! is expressed relative to `$ORIGIN` and stays inside the tree. Entries are
//! read straight from the dynamic section without spawning `readelf`.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use object::elf::{DT_NULL, DT_RPATH, DT_RUNPATH, FileHeader32, FileHeader64};
use object::read::elf::{Dyn, FileHeader, SectionHeader};
use object::{Endianness, FileKind};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::util::path::normalize;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InspectError {
  #[error("io error at '{path}': {message}")]
  Io { path: PathBuf, message: String },

  #[error("malformed ELF file '{path}': {message}")]
  Parse { path: PathBuf, message: String },
}

/// Why a run-path entry makes a tree non-relocatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
  /// An absolute directory, valid only on the build machine.
  Absolute,
  /// Relative to the process working directory rather than `$ORIGIN`.
  NotOriginRelative,
  /// `$ORIGIN`-relative but resolving outside the inspected tree.
  EscapesRoot,
}

impl fmt::Display for Violation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Violation::Absolute => "absolute path",
      Violation::NotOriginRelative => "not relative to $ORIGIN",
      Violation::EscapesRoot => "resolves outside the install tree",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPathFinding {
  pub file: PathBuf,
  pub entry: String,
  pub violation: Violation,
}

impl fmt::Display for RunPathFinding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: '{}' ({})", self.file.display(), self.entry, self.violation)
  }
}

/// Result of inspecting a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectReport {
  pub files_scanned: usize,
  pub elf_files: usize,
  /// ELF files carrying at least one run-path entry.
  pub with_run_paths: usize,
  pub findings: Vec<RunPathFinding>,
}

impl InspectReport {
  pub fn is_clean(&self) -> bool {
    self.findings.is_empty()
  }
}

/// Classify one run-path entry of a file living in `file_dir`.
pub fn check_entry(entry: &str, file_dir: &Path, root: &Path) -> Option<Violation> {
  if entry.starts_with('/') {
    return Some(Violation::Absolute);
  }

  let Some(rest) = entry
    .strip_prefix("${ORIGIN}")
    .or_else(|| entry.strip_prefix("$ORIGIN"))
  else {
    return Some(Violation::NotOriginRelative);
  };
  if !(rest.is_empty() || rest.starts_with('/')) {
    return Some(Violation::NotOriginRelative);
  }

  let resolved = normalize(&file_dir.join(rest.trim_start_matches('/')));
  if resolved.starts_with(normalize(root)) {
    None
  } else {
    Some(Violation::EscapesRoot)
  }
}

/// Run-path entries of an ELF file, or `None` when the file is not ELF.
///
/// Colon-separated lists are split into their entries.
pub fn read_run_paths(path: &Path) -> Result<Option<Vec<String>>, InspectError> {
  let io_err = |e: std::io::Error| InspectError::Io {
    path: path.to_path_buf(),
    message: e.to_string(),
  };

  let mut magic = [0u8; 4];
  let mut file = std::fs::File::open(path).map_err(io_err)?;
  if file.read_exact(&mut magic).is_err() || magic != ELF_MAGIC {
    return Ok(None);
  }
  let data = std::fs::read(path).map_err(io_err)?;

  let parse_err = |e: object::Error| InspectError::Parse {
    path: path.to_path_buf(),
    message: e.to_string(),
  };
  let raw = match FileKind::parse(&*data).map_err(parse_err)? {
    FileKind::Elf32 => elf_run_paths::<FileHeader32<Endianness>>(&data).map_err(parse_err)?,
    FileKind::Elf64 => elf_run_paths::<FileHeader64<Endianness>>(&data).map_err(parse_err)?,
    _ => return Ok(None),
  };

  Ok(Some(
    raw
      .iter()
      .flat_map(|list| list.split(':'))
      .map(str::to_string)
      .collect(),
  ))
}

fn elf_run_paths<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> object::Result<Vec<String>> {
  let header = Elf::parse(data)?;
  let endian = header.endian()?;
  let sections = header.sections(endian, data)?;

  let mut entries = Vec::new();
  for section in sections.iter() {
    let Some((dynamic, link)) = section.dynamic(endian, data)? else {
      continue;
    };
    let strings = sections.strings(endian, data, link)?;
    for entry in dynamic {
      match entry.tag32(endian) {
        Some(DT_NULL) => break,
        Some(DT_RPATH) | Some(DT_RUNPATH) => {
          let value = entry.string(endian, strings)?;
          entries.push(String::from_utf8_lossy(value).into_owned());
        }
        _ => {}
      }
    }
  }
  Ok(entries)
}

/// Walk `root` and check the run-paths of every ELF file in it.
///
/// Malformed ELF files are logged and skipped.
pub fn inspect_tree(root: &Path) -> Result<InspectReport, InspectError> {
  let mut report = InspectReport::default();

  for entry in WalkDir::new(root).follow_links(false) {
    let entry = entry.map_err(|e| InspectError::Io {
      path: root.to_path_buf(),
      message: e.to_string(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    report.files_scanned += 1;

    let path = entry.path();
    let run_paths = match read_run_paths(path) {
      Ok(Some(run_paths)) => run_paths,
      Ok(None) => continue,
      Err(InspectError::Parse { path, message }) => {
        warn!(path = %path.display(), error = %message, "skipping malformed ELF file");
        continue;
      }
      Err(e) => return Err(e),
    };

    report.elf_files += 1;
    if run_paths.is_empty() {
      continue;
    }
    report.with_run_paths += 1;

    let file_dir = path.parent().unwrap_or(root);
    for run_path in run_paths {
      if let Some(violation) = check_entry(&run_path, file_dir, root) {
        debug!(file = %path.display(), entry = %run_path, %violation, "run-path violation");
        report.findings.push(RunPathFinding {
          file: path.to_path_buf(),
          entry: run_path,
          violation,
        });
      }
    }
  }

  Ok(report)
}
