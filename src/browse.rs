//! Directory browsing for next/previous panorama.
//!
//! The listing is rebuilt on every navigation so files added or removed
//! since the last step are picked up.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

/// Extensions a panorama may have (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png"];

pub fn is_panorama_file(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// `index + delta` wrapped into `0..len`.
pub fn cyclic_index(index: usize, delta: isize, len: usize) -> usize {
    debug_assert!(len > 0);
    (index as isize + delta).rem_euclid(len as isize) as usize
}

/// Snapshot of the directory around the current panorama.
#[derive(Debug)]
pub struct BrowseContext {
    entries: Vec<PathBuf>,
    /// Position of the current file, or where it would sort if it is gone.
    position: Position,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    At(usize),
    Before(usize),
}

impl BrowseContext {
    /// List the directory containing `current`.
    ///
    /// Dot-entries and non-image files are skipped; entries are ordered by
    /// file name.
    pub fn scan(current: &Path) -> io::Result<Self> {
        let directory = match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&directory)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let is_file = entry.file_type().map(|ft| !ft.is_dir()).unwrap_or(false);
            let path = entry.path();
            if is_file && is_panorama_file(&path) {
                entries.push(path);
            }
        }
        entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let current_name = current.file_name();
        let position = match entries.binary_search_by(|p| p.file_name().cmp(&current_name)) {
            Ok(index) => Position::At(index),
            Err(index) => Position::Before(index),
        };
        debug!(
            "Browse {}: {} panoramas, current {:?}",
            directory.display(),
            entries.len(),
            position
        );

        Ok(Self {
            entries,
            position,
        })
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.position {
            Position::At(index) => Some(index),
            Position::Before(_) => None,
        }
    }

    /// The entry `delta` steps away, wrapping around the listing.
    pub fn step(&self, delta: isize) -> Option<&Path> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        let index = match self.position {
            Position::At(index) => cyclic_index(index, delta, len),
            // A vanished file sits between its neighbours: one step forward
            // lands on the entry after it.
            Position::Before(slot) if delta > 0 => cyclic_index(slot, delta - 1, len),
            Position::Before(slot) => cyclic_index(slot, delta, len),
        };
        Some(&self.entries[index])
    }
}

/// Path of the panorama `delta` steps from `current`, re-reading the directory.
pub fn neighbour(current: &Path, delta: isize) -> io::Result<Option<PathBuf>> {
    let context = BrowseContext::scan(current)?;
    Ok(context.step(delta).map(Path::to_path_buf))
}
