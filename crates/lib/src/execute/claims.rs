//! Install-path claims held by running nodes.
//!
//! The graph refuses overlapping installs between unordered nodes before
//! anything runs; claims enforce the same rule while nodes execute, so a
//! second node can never write into a prefix another running node owns.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::node::NodeName;
use crate::source::SourceId;
use crate::util::path::overlaps;

use super::types::ExecuteError;

#[derive(Debug, Clone)]
struct Claim {
  node: NodeName,
  source: SourceId,
  path: PathBuf,
  shared: bool,
}

/// One install prefix a node is about to write.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
  pub path: PathBuf,
  /// Shared prefixes (sysroots) admit concurrent installs from other sources.
  pub shared: bool,
}

/// Registry of install prefixes held by running nodes.
#[derive(Debug, Default)]
pub struct InstallClaims {
  held: Mutex<Vec<Claim>>,
}

impl InstallClaims {
  /// Claim every requested prefix for `node`, or none of them.
  pub fn claim(
    self: &Arc<Self>,
    node: &NodeName,
    source: &SourceId,
    requests: &[ClaimRequest],
  ) -> Result<ClaimGuard, ExecuteError> {
    let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

    for request in requests {
      for claim in held.iter() {
        let exclusive = !request.shared || !claim.shared || &claim.source == source;
        if claim.node != *node && exclusive && overlaps(&claim.path, &request.path) {
          return Err(ExecuteError::ConcurrencyConflict {
            node: node.clone(),
            holder: claim.node.clone(),
            path: request.path.clone(),
          });
        }
      }
    }

    held.extend(requests.iter().map(|request| Claim {
      node: node.clone(),
      source: source.clone(),
      path: request.path.clone(),
      shared: request.shared,
    }));

    Ok(ClaimGuard {
      claims: Arc::clone(self),
      node: node.clone(),
    })
  }

  /// Number of prefixes currently held.
  pub fn len(&self) -> usize {
    self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Releases a node's claims when dropped.
pub struct ClaimGuard {
  claims: Arc<InstallClaims>,
  node: NodeName,
}

impl Drop for ClaimGuard {
  fn drop(&mut self) {
    let mut held = self.claims.held.lock().unwrap_or_else(PoisonError::into_inner);
    held.retain(|claim| claim.node != self.node);
  }
}
