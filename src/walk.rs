//! Best-effort directory traversal.
//!
//! Cache builds, module search and the sysfs trigger all walk large trees
//! where individual entries may vanish or be unreadable. They share one
//! policy: visit every non-directory entry in lexical order, skip what
//! cannot be read, keep going, and let the visitor stop the walk early.

use std::fs;
use std::ops::ControlFlow;
use std::path::Path;

use log::debug;

/// What a walk did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    /// Files handed to the visitor
    pub visited: usize,
    /// Entries skipped because they could not be read
    pub skipped: usize,
    /// Whether the visitor ended the walk early
    pub stopped: bool,
}

/// Walk `root` depth-first, calling `visit` for every file.
///
/// Directories are descended in lexical name order. Symlinks are passed to
/// the visitor as files and never followed as directories.
pub fn walk_files<F>(root: &Path, mut visit: F) -> WalkSummary
where
    F: FnMut(&Path) -> ControlFlow<()>,
{
    let mut summary = WalkSummary::default();

    match fs::symlink_metadata(root) {
        Ok(meta) if meta.is_dir() => {
            let _ = walk_dir(root, &mut visit, &mut summary);
        }
        Ok(_) => {
            summary.visited += 1;
            summary.stopped = visit(root).is_break();
        }
        Err(e) => {
            debug!("walk: skipping {}: {}", root.display(), e);
            summary.skipped += 1;
        }
    }

    summary
}

fn walk_dir<F>(dir: &Path, visit: &mut F, summary: &mut WalkSummary) -> ControlFlow<()>
where
    F: FnMut(&Path) -> ControlFlow<()>,
{
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("walk: skipping {}: {}", dir.display(), e);
            summary.skipped += 1;
            return ControlFlow::Continue(());
        }
    };

    let mut entries: Vec<fs::DirEntry> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("walk: skipping entry in {}: {}", dir.display(), e);
                summary.skipped += 1;
                None
            }
        })
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let is_dir = match entry.file_type() {
            Ok(kind) => kind.is_dir(),
            Err(e) => {
                debug!("walk: skipping {}: {}", path.display(), e);
                summary.skipped += 1;
                continue;
            }
        };

        if is_dir {
            walk_dir(&path, visit, summary)?;
        } else {
            summary.visited += 1;
            if visit(&path).is_break() {
                summary.stopped = true;
                return ControlFlow::Break(());
            }
        }
    }

    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_visits_in_lexical_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b/2.ko"));
        touch(&root.join("a/z.ko"));
        touch(&root.join("a/y/1.ko"));
        touch(&root.join("c.txt"));

        let mut seen = Vec::new();
        let summary = walk_files(root, |p| {
            seen.push(p.strip_prefix(root).unwrap().to_path_buf());
            ControlFlow::Continue(())
        });

        let expected: Vec<PathBuf> = ["a/y/1.ko", "a/z.ko", "b/2.ko", "c.txt"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(summary.visited, 4);
        assert!(!summary.stopped);
    }

    #[test]
    fn test_break_stops_whole_walk() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a/hit"));
        touch(&root.join("a/later"));
        touch(&root.join("b/sibling"));

        let mut seen = Vec::new();
        let summary = walk_files(root, |p| {
            seen.push(p.file_name().unwrap().to_owned());
            if p.ends_with("hit") {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(seen, vec!["hit"]);
        assert!(summary.stopped);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = tempdir().unwrap();
        let summary = walk_files(&dir.path().join("absent"), |_| ControlFlow::Continue(()));
        assert_eq!(summary.visited, 0);
        assert_eq!(summary.skipped, 1);
    }
}
