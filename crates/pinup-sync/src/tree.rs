//! Path-addressed tree of folders and pinned files.
//!
//! Paths are `/`-separated; empty segments are ignored, so `//a///b/` and
//! `/a/b` name the same node and the empty path names the root. Sibling
//! names are unique within a folder.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::TreeError;

pub const ROOT_NAME: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub size: u64,
    /// Unix seconds
    pub created: u64,
    pub cid: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    pub name: String,
    /// Always 0 for folders; see [`Node::total_size`]
    pub size: u64,
    pub created: u64,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl FolderNode {
    fn position(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name() == name)
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name() == name)
    }

    /// Insert or replace-in-place by name.
    fn put(&mut self, node: Node) {
        match self.position(node.name()) {
            Some(idx) => self.children[idx] = node,
            None => self.children.push(node),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    File(FileNode),
    Folder(FolderNode),
}

impl Node {
    pub fn file(
        name: impl Into<String>,
        size: u64,
        cid: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Node::File(FileNode {
            name: name.into(),
            size,
            created: unix_now(),
            cid: cid.into(),
            request_id: request_id.into(),
        })
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Node::Folder(FolderNode {
            name: name.into(),
            size: 0,
            created: unix_now(),
            children: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Node::File(f) => &f.name,
            Node::Folder(f) => &f.name,
        }
    }

    fn set_name(&mut self, name: &str) {
        match self {
            Node::File(f) => f.name = name.to_string(),
            Node::Folder(f) => f.name = name.to_string(),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder(_))
    }

    pub fn as_folder(&self) -> Option<&FolderNode> {
        match self {
            Node::Folder(f) => Some(f),
            Node::File(_) => None,
        }
    }

    fn as_folder_mut(&mut self) -> Option<&mut FolderNode> {
        match self {
            Node::Folder(f) => Some(f),
            Node::File(_) => None,
        }
    }

    /// Number of files in this subtree.
    pub fn file_count(&self) -> usize {
        match self {
            Node::File(_) => 1,
            Node::Folder(f) => f.children.iter().map(Node::file_count).sum(),
        }
    }

    /// Sum of file sizes in this subtree.
    pub fn total_size(&self) -> u64 {
        match self {
            Node::File(f) => f.size,
            Node::Folder(f) => f.children.iter().map(Node::total_size).sum(),
        }
    }
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical form: leading `/`, single separators, no trailing `/`.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", segments(path).join("/"))
}

/// Whether `path` lies strictly below `ancestor`.
pub fn is_within(ancestor: &str, path: &str) -> bool {
    let ancestor = segments(ancestor);
    let path = segments(path);
    path.len() > ancestor.len() && path.starts_with(&ancestor)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Node", into = "Node")]
pub struct ContentTree {
    /// Always a folder
    root: Node,
}

impl Default for ContentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Node> for ContentTree {
    type Error = String;

    fn try_from(root: Node) -> Result<Self, Self::Error> {
        if root.is_folder() {
            Ok(Self { root })
        } else {
            Err(format!("tree root {:?} is a file", root.name()))
        }
    }
}

impl From<ContentTree> for Node {
    fn from(tree: ContentTree) -> Node {
        tree.root
    }
}

impl ContentTree {
    pub fn new() -> Self {
        Self {
            root: Node::folder(ROOT_NAME),
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    fn root_folder(&self) -> &FolderNode {
        match &self.root {
            Node::Folder(f) => f,
            Node::File(_) => unreachable!("content tree root is always a folder"),
        }
    }

    fn root_folder_mut(&mut self) -> &mut FolderNode {
        match &mut self.root {
            Node::Folder(f) => f,
            Node::File(_) => unreachable!("content tree root is always a folder"),
        }
    }

    /// Resolve a path; the empty path resolves to the root.
    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node.as_folder()?.child(seg)?;
        }
        Some(node)
    }

    /// Place `node` at `path`, creating missing intermediate folders.
    ///
    /// The node takes the final segment as its name. An existing sibling
    /// with that name is replaced in place, whatever its kind.
    pub fn insert(&mut self, path: &str, mut node: Node) -> Result<(), TreeError> {
        let segs = segments(path);
        let Some((leaf, parents)) = segs.split_last() else {
            return Err(TreeError::InvalidPath(path.to_string()));
        };
        let folder = self.folder_creating(parents)?;
        node.set_name(leaf);
        folder.put(node);
        Ok(())
    }

    /// Ensure a folder exists at `path`, creating intermediates.
    pub fn mkdir(&mut self, path: &str) -> Result<(), TreeError> {
        self.folder_creating(&segments(path)).map(|_| ())
    }

    /// Detach and return the node at `path`. Unresolvable paths and the
    /// root are left alone.
    pub fn delete(&mut self, path: &str) -> Option<Node> {
        let segs = segments(path);
        let (leaf, parents) = segs.split_last()?;
        let folder = self.folder_existing_mut(parents)?;
        let idx = folder.position(leaf)?;
        Some(folder.children.remove(idx))
    }

    /// Move the node at `from` to `to`, renaming it to the final segment
    /// of `to` and replacing whatever was there.
    ///
    /// An unresolvable `from` is a no-op. Moving the root, onto the root,
    /// onto itself, or into its own subtree is rejected before anything is
    /// detached, as is a destination below an existing file.
    pub fn move_node(&mut self, from: &str, to: &str) -> Result<(), TreeError> {
        let from_norm = normalize_path(from);
        let to_norm = normalize_path(to);
        let invalid = || TreeError::InvalidMove {
            from: from_norm.clone(),
            to: to_norm.clone(),
        };

        if from_norm == to_norm || is_within(&from_norm, &to_norm) || to_norm == "/" {
            return Err(invalid());
        }
        if self.lookup(&from_norm).is_none() {
            return Ok(());
        }

        let to_segs = segments(&to_norm);
        if let Some((_, parents)) = to_segs.split_last() {
            self.check_creatable(parents)?;
        }

        match self.delete(&from_norm) {
            Some(node) => self.insert(&to_norm, node),
            None => Ok(()),
        }
    }

    /// Every node below the root with its normalized path, depth-first.
    pub fn walk(&self) -> Vec<(String, &Node)> {
        fn visit<'a>(prefix: &str, folder: &'a FolderNode, out: &mut Vec<(String, &'a Node)>) {
            for child in &folder.children {
                let path = format!("{prefix}/{}", child.name());
                out.push((path.clone(), child));
                if let Node::Folder(sub) = child {
                    visit(&path, sub, out);
                }
            }
        }

        let mut out = Vec::new();
        visit("", self.root_folder(), &mut out);
        out
    }

    pub fn file_count(&self) -> usize {
        self.root.file_count()
    }

    pub fn total_size(&self) -> u64 {
        self.root.total_size()
    }

    fn folder_creating(&mut self, segs: &[&str]) -> Result<&mut FolderNode, TreeError> {
        let mut current = self.root_folder_mut();
        for (depth, seg) in segs.iter().enumerate() {
            let idx = match current.position(seg) {
                Some(idx) => idx,
                None => {
                    current.children.push(Node::folder(*seg));
                    current.children.len() - 1
                }
            };
            current = match &mut current.children[idx] {
                Node::Folder(f) => f,
                Node::File(_) => {
                    return Err(TreeError::StructuralMismatch {
                        path: normalize_path(&segs[..=depth].join("/")),
                    })
                }
            };
        }
        Ok(current)
    }

    /// Like `folder_creating` but without mutating: missing segments are
    /// fine, files in the way are not.
    fn check_creatable(&self, segs: &[&str]) -> Result<(), TreeError> {
        let mut current = self.root_folder();
        for (depth, seg) in segs.iter().enumerate() {
            match current.child(seg) {
                None => return Ok(()),
                Some(Node::Folder(f)) => current = f,
                Some(Node::File(_)) => {
                    return Err(TreeError::StructuralMismatch {
                        path: normalize_path(&segs[..=depth].join("/")),
                    })
                }
            }
        }
        Ok(())
    }

    fn folder_existing_mut(&mut self, segs: &[&str]) -> Option<&mut FolderNode> {
        let mut current = self.root_folder_mut();
        for seg in segs {
            let idx = current.position(seg)?;
            current = current.children[idx].as_folder_mut()?;
        }
        Some(current)
    }
}

/// Cloneable handle to a tree shared between pipeline tasks and callers.
#[derive(Debug, Clone, Default)]
pub struct SharedTree(Arc<Mutex<ContentTree>>);

impl SharedTree {
    pub fn new(tree: ContentTree) -> Self {
        Self(Arc::new(Mutex::new(tree)))
    }

    fn lock(&self) -> MutexGuard<'_, ContentTree> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, path: &str, node: Node) -> Result<(), TreeError> {
        self.lock().insert(path, node)
    }

    pub fn lookup(&self, path: &str) -> Option<Node> {
        self.lock().lookup(path).cloned()
    }

    pub fn delete(&self, path: &str) -> Option<Node> {
        self.lock().delete(path)
    }

    pub fn move_node(&self, from: &str, to: &str) -> Result<(), TreeError> {
        self.lock().move_node(from, to)
    }

    pub fn mkdir(&self, path: &str) -> Result<(), TreeError> {
        self.lock().mkdir(path)
    }

    pub fn snapshot(&self) -> ContentTree {
        self.lock().clone()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn file(name: &str, size: u64) -> Node {
        Node::file(name, size, format!("bafy-{name}"), format!("req-{name}"))
    }

    fn child_names(tree: &ContentTree, path: &str) -> Vec<String> {
        tree.lookup(path)
            .and_then(Node::as_folder)
            .map(|f| f.children.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_empty_path_is_root() {
        let tree = ContentTree::new();
        assert_eq!(tree.lookup("").unwrap().name(), ROOT_NAME);
        assert_eq!(tree.lookup("///").unwrap().name(), ROOT_NAME);
    }

    #[test]
    fn test_insert_creates_intermediate_folders() {
        let mut tree = ContentTree::new();
        tree.insert("/a/b/c.txt", file("c.txt", 3)).unwrap();

        assert!(tree.lookup("/a").unwrap().is_folder());
        assert!(tree.lookup("/a/b").unwrap().is_folder());
        match tree.lookup("/a/b/c.txt").unwrap() {
            Node::File(f) => assert_eq!(f.cid, "bafy-c.txt"),
            other => panic!("expected file, got {other:?}"),
        }
    }

    #[test]
    fn test_redundant_separators_are_ignored() {
        let mut tree = ContentTree::new();
        tree.insert("//a///b//c.txt/", file("c.txt", 1)).unwrap();
        assert!(tree.lookup("/a/b/c.txt").is_some());
        assert!(tree.lookup("a/b/c.txt").is_some());
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut tree = ContentTree::new();
        tree.insert("/d/one", file("one", 1)).unwrap();
        tree.insert("/d/two", file("two", 2)).unwrap();
        tree.insert("/d/three", file("three", 3)).unwrap();

        tree.insert("/d/two", Node::folder("two")).unwrap();

        assert_eq!(child_names(&tree, "/d"), vec!["one", "two", "three"]);
        assert!(tree.lookup("/d/two").unwrap().is_folder());
    }

    #[test]
    fn test_insert_takes_final_segment_as_name() {
        let mut tree = ContentTree::new();
        tree.insert("/docs/renamed.txt", file("original.txt", 1))
            .unwrap();
        assert!(tree.lookup("/docs/renamed.txt").is_some());
        assert!(tree.lookup("/docs/original.txt").is_none());
    }

    #[test]
    fn test_insert_below_file_is_structural_mismatch() {
        let mut tree = ContentTree::new();
        tree.insert("/a/b", file("b", 1)).unwrap();

        let err = tree.insert("/a/b/c", file("c", 1)).unwrap_err();
        assert_eq!(
            err,
            TreeError::StructuralMismatch {
                path: "/a/b".into()
            }
        );
        // The file is untouched.
        assert!(!tree.lookup("/a/b").unwrap().is_folder());
    }

    #[test]
    fn test_insert_at_root_path_is_invalid() {
        let mut tree = ContentTree::new();
        assert!(matches!(
            tree.insert("/", file("x", 1)),
            Err(TreeError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_delete_returns_node() {
        let mut tree = ContentTree::new();
        tree.insert("/a/x", file("x", 5)).unwrap();

        let removed = tree.delete("/a/x").unwrap();
        assert_eq!(removed.name(), "x");
        assert!(tree.lookup("/a/x").is_none());
        assert!(tree.lookup("/a").is_some());
    }

    #[test]
    fn test_delete_unresolvable_is_noop() {
        let mut tree = ContentTree::new();
        tree.insert("/a/x", file("x", 5)).unwrap();
        let before = tree.clone();

        assert!(tree.delete("/nope/x").is_none());
        assert!(tree.delete("/a/x/deeper").is_none());
        assert!(tree.delete("").is_none());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_move_file_between_folders() {
        let mut tree = ContentTree::new();
        tree.insert("/a/x", file("x", 5)).unwrap();
        tree.mkdir("/b").unwrap();

        tree.move_node("/a/x", "/b/x").unwrap();
        assert!(tree.lookup("/a/x").is_none());
        assert_eq!(tree.lookup("/b/x").unwrap().total_size(), 5);
    }

    #[test]
    fn test_move_renames() {
        let mut tree = ContentTree::new();
        tree.insert("/a/x", file("x", 5)).unwrap();
        tree.move_node("/a/x", "/a/y").unwrap();
        assert_eq!(child_names(&tree, "/a"), vec!["y"]);
    }

    #[test]
    fn test_move_folder_carries_subtree() {
        let mut tree = ContentTree::new();
        tree.insert("/a/b/c.txt", file("c.txt", 7)).unwrap();
        tree.move_node("/a/b", "/z/b").unwrap();

        assert!(tree.lookup("/a/b").is_none());
        assert_eq!(tree.lookup("/z/b/c.txt").unwrap().total_size(), 7);
    }

    #[test]
    fn test_move_into_own_subtree_is_rejected() {
        let mut tree = ContentTree::new();
        tree.insert("/a/b/c.txt", file("c.txt", 1)).unwrap();
        let before = tree.clone();

        assert!(matches!(
            tree.move_node("/a", "/a/b/a"),
            Err(TreeError::InvalidMove { .. })
        ));
        assert!(matches!(
            tree.move_node("/a", "/a"),
            Err(TreeError::InvalidMove { .. })
        ));
        assert!(matches!(
            tree.move_node("/a", "/"),
            Err(TreeError::InvalidMove { .. })
        ));
        assert!(matches!(
            tree.move_node("/", "/elsewhere"),
            Err(TreeError::InvalidMove { .. })
        ));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_move_to_sibling_with_shared_prefix_is_allowed() {
        let mut tree = ContentTree::new();
        tree.insert("/a/x", file("x", 1)).unwrap();
        tree.move_node("/a", "/ab").unwrap();
        assert!(tree.lookup("/ab/x").is_some());
    }

    #[test]
    fn test_move_below_file_is_rejected_before_detaching() {
        let mut tree = ContentTree::new();
        tree.insert("/a/x", file("x", 1)).unwrap();
        tree.insert("/f", file("f", 1)).unwrap();
        let before = tree.clone();

        let err = tree.move_node("/a/x", "/f/x").unwrap_err();
        assert!(matches!(err, TreeError::StructuralMismatch { .. }));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_move_missing_source_is_noop() {
        let mut tree = ContentTree::new();
        tree.mkdir("/b").unwrap();
        let before = tree.clone();
        tree.move_node("/missing", "/b/missing").unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn test_walk_and_totals() {
        let mut tree = ContentTree::new();
        tree.insert("/a/x", file("x", 2)).unwrap();
        tree.insert("/a/b/y", file("y", 3)).unwrap();
        tree.insert("/z", file("z", 4)).unwrap();

        let paths: Vec<String> = tree.walk().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["/a", "/a/x", "/a/b", "/a/b/y", "/z"]);
        assert_eq!(tree.file_count(), 3);
        assert_eq!(tree.total_size(), 9);
    }

    #[test]
    fn test_json_shape() {
        let mut tree = ContentTree::new();
        tree.insert("/a/x", file("x", 2)).unwrap();

        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value["type"], "folder");
        assert_eq!(value["name"], "root");
        assert_eq!(value["children"][0]["type"], "folder");
        assert_eq!(value["children"][0]["children"][0]["type"], "file");
        assert_eq!(value["children"][0]["children"][0]["cid"], "bafy-x");

        let back: ContentTree = serde_json::from_value(value).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn test_file_root_is_rejected() {
        let json = r#"{"type":"file","name":"root","size":0,"created":0,"cid":"c","request_id":"r"}"#;
        assert!(serde_json::from_str::<ContentTree>(json).is_err());
    }

    #[test]
    fn test_shared_tree_handles_see_same_tree() {
        let shared = SharedTree::default();
        let other = shared.clone();
        shared.insert("/a/x", file("x", 1)).unwrap();
        assert!(other.lookup("/a/x").is_some());
        assert_eq!(other.snapshot().file_count(), 1);
    }

    fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z]{1,4}"
    }

    fn arb_path() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_segment(), 1..5)
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(raw in "[a-z/]{0,20}") {
            let once = normalize_path(&raw);
            prop_assert_eq!(normalize_path(&once), once.clone());
            prop_assert!(once.starts_with('/'));
            prop_assert!(!once.contains("//"));
        }

        #[test]
        fn inserted_file_is_found(segs in arb_path(), size in 0u64..10_000) {
            let mut tree = ContentTree::new();
            let path = format!("/{}", segs.join("/"));
            tree.insert(&path, file("f", size)).unwrap();
            let found = tree.lookup(&path).unwrap();
            prop_assert_eq!(found.total_size(), size);
            prop_assert_eq!(found.name(), segs.last().unwrap().as_str());
        }

        #[test]
        fn sibling_names_stay_unique(paths in prop::collection::vec(arb_path(), 1..20)) {
            let mut tree = ContentTree::new();
            for segs in &paths {
                // Mismatches are expected when a prefix is already a file.
                let _ = tree.insert(&segs.join("/"), file("f", 1));
            }
            for (_, node) in tree.walk() {
                if let Some(folder) = node.as_folder() {
                    let mut names: Vec<&str> = folder.children.iter().map(Node::name).collect();
                    let total = names.len();
                    names.sort_unstable();
                    names.dedup();
                    prop_assert_eq!(names.len(), total);
                }
            }
        }

        #[test]
        fn move_into_descendant_never_mutates(segs in arb_path(), extra in arb_path()) {
            let mut tree = ContentTree::new();
            let from = format!("/{}", segs.join("/"));
            tree.mkdir(&from).unwrap();
            let before = tree.clone();
            let to = format!("{from}/{}", extra.join("/"));
            let moved = tree.move_node(&from, &to);
            prop_assert!(
                matches!(moved, Err(TreeError::InvalidMove { .. })),
                "expected InvalidMove, got {:?}",
                moved
            );
            prop_assert_eq!(tree, before);
        }
    }
}
