//! Advisory single-writer marker
//!
//! Mutating operations (backup, trim, fix) create `InUse.txt` under the
//! repository root on entry and remove it on clean exit. If the file is
//! already present the operation refuses to start: either another process is
//! mutating the repository, or a previous run died and the operator must
//! acknowledge with `fixinuse`. The marker deliberately survives failed
//! runs — it is the interrupted-state flag, not just a lock.

use crate::error::{PackratError, Result};
use crate::layout::{self, Layout, PathKind};
use std::fs::OpenOptions;
use std::io;
use tracing::{debug, warn};

/// Held while a mutating operation runs
///
/// Call [`InUseGuard::release`] on success; dropping the guard without
/// releasing leaves the marker in place.
#[derive(Debug)]
pub struct InUseGuard {
    layout: Layout,
}

/// Take the in-use marker, refusing if it already exists
pub fn acquire(layout: &Layout) -> Result<InUseGuard> {
    let marker = layout.in_use_marker();
    match layout::probe(marker)? {
        PathKind::Absent => {}
        _ => return Err(PackratError::RepositoryBusy(marker.to_path_buf())),
    }

    // create_new closes the check-then-create race between two processes.
    match OpenOptions::new().write(true).create_new(true).open(marker) {
        Ok(_) => {
            debug!("acquired in-use marker {:?}", marker);
            Ok(InUseGuard {
                layout: layout.clone(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(PackratError::RepositoryBusy(marker.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

impl InUseGuard {
    /// Remove the marker after a clean run
    pub fn release(self) -> Result<()> {
        let marker = self.layout.in_use_marker();
        std::fs::remove_file(marker)?;
        debug!("released in-use marker {:?}", marker);
        Ok(())
    }
}

/// Remove the marker unconditionally (the `fixinuse` operation)
///
/// Errors if no marker exists — that usually means the operator is fixing
/// the wrong repository.
pub fn force_release(layout: &Layout) -> Result<()> {
    let marker = layout.in_use_marker();
    if layout::probe(marker)? == PathKind::Absent {
        return Err(PackratError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no in-use marker at {:?}", marker),
        )));
    }
    std::fs::remove_file(marker)?;
    warn!("forcibly removed in-use marker {:?}", marker);
    Ok(())
}
