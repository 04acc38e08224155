//! Watched directory listing: pick the oldest pending file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Earliest-created regular file, ties broken by name
    pub oldest: Option<PathBuf>,
    /// Regular files waiting, including `oldest`
    pub pending: usize,
}

/// Dot-files are in-progress writes by convention (write `.name.tmp`, rename when done).
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// List regular files directly inside `dir`, ignoring paths in `skip`.
/// Entries that vanish mid-scan are skipped.
pub fn scan(dir: &Path, skip: &HashSet<PathBuf>) -> Result<ScanResult, std::io::Error> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut pending = 0usize;

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(_) => continue,
        };
        if !entry.file_type().is_file() || is_hidden(entry.path()) || skip.contains(entry.path()) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Ok(created) = meta.created().or_else(|_| meta.modified()) else {
            continue;
        };
        pending += 1;

        let candidate = (created, entry.into_path());
        best = match best {
            Some(current) if current <= candidate => Some(current),
            _ => Some(candidate),
        };
    }

    Ok(ScanResult {
        oldest: best.map(|(_, p)| p),
        pending,
    })
}
