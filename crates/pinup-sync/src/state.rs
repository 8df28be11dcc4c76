//! On-disk content tree: a JSON document loaded fully into memory and
//! flushed atomically via temp+rename.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::tree::ContentTree;

pub struct TreeStore {
    /// Path to the JSON tree file on disk
    path: PathBuf,
    tree: ContentTree,
    /// Whether there are unsaved changes
    dirty: bool,
}

impl TreeStore {
    /// Load or create a tree store at the given path.
    /// If the file doesn't exist, starts with an empty tree.
    pub fn open(path: &Path) -> Result<Self> {
        let tree = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading content tree: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing content tree: {}", path.display()))?
        } else {
            ContentTree::new()
        };

        Ok(TreeStore {
            path: path.to_path_buf(),
            tree,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&self) -> &ContentTree {
        &self.tree
    }

    /// Mutable access; marks the store dirty.
    pub fn tree_mut(&mut self) -> &mut ContentTree {
        self.dirty = true;
        &mut self.tree
    }

    /// Swap in a tree edited elsewhere (e.g. through a `SharedTree`).
    pub fn replace(&mut self, tree: ContentTree) {
        if tree != self.tree {
            self.tree = tree;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flush dirty changes to disk using an atomic write (write then rename).
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating tree dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.tree).context("serializing content tree")?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing content tree temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming content tree: {}", self.path.display()))?;

        self.dirty = false;
        Ok(())
    }
}

impl Drop for TreeStore {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush content tree on drop: {e}");
            }
        }
    }
}
