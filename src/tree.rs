//! Indented listing of a directory tree.
//!
//! The walk is top-down: a directory's own line comes first, then its
//! files one level deeper, then each subdirectory in turn. Siblings are
//! sorted by name so the listing does not depend on filesystem order.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;

/// Spaces of indentation per nesting level
pub const INDENT_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One line of the listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLine {
    /// Nesting level below the walked root (the root itself is 0)
    pub depth: usize,
    pub name: String,
    pub kind: EntryKind,
}

impl fmt::Display for TreeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = " ".repeat(INDENT_WIDTH * self.depth);
        match self.kind {
            EntryKind::Directory => write!(f, "{indent}{}/", self.name),
            EntryKind::File => write!(f, "{indent}{}", self.name),
        }
    }
}

/// Walk `root` and return its listing, starting with `root` itself.
pub fn walk(root: &Path) -> Result<Vec<TreeLine>> {
    let mut lines = Vec::new();
    visit(root, 0, &mut lines)?;
    Ok(lines)
}

fn visit(dir: &Path, depth: usize, lines: &mut Vec<TreeLine>) -> Result<()> {
    lines.push(TreeLine {
        depth,
        name: display_name(dir),
        kind: EntryKind::Directory,
    });

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut subdirs = Vec::new();
    for entry in entries {
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            subdirs.push(entry.path());
        } else if file_type.is_symlink() && entry.path().is_dir() {
            // Linked directories are neither listed nor followed
            continue;
        } else {
            lines.push(TreeLine {
                depth: depth + 1,
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: EntryKind::File,
            });
        }
    }

    for subdir in subdirs {
        visit(&subdir, depth + 1, lines)?;
    }

    Ok(())
}

fn display_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}
