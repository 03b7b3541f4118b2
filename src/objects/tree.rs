use crate::errors::{GitError, Result};
use crate::objects::{ObjectId, ObjectKind, ObjectStore, ID_RAW_LEN};

pub const MODE_DIR: &str = "40000";
pub const MODE_FILE: &str = "100644";
pub const MODE_FILE_EXEC: &str = "100755";
pub const MODE_SYMLINK: &str = "120000";
pub const MODE_GITLINK: &str = "160000";

/// A single entry in a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Mode string as stored, e.g. "100644" or "40000".
    pub mode: String,
    /// Entry name, presented as a UTF-8 path component.
    pub name: String,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn is_dir(&self) -> bool {
        self.mode == MODE_DIR
    }

    /// Regular files carry a mode beginning with `100`.
    pub fn is_file(&self) -> bool {
        self.mode.starts_with("100")
    }

    pub fn is_executable(&self) -> bool {
        self.mode == MODE_FILE_EXEC
    }

    pub fn is_symlink(&self) -> bool {
        self.mode == MODE_SYMLINK
    }

    pub fn is_gitlink(&self) -> bool {
        self.mode == MODE_GITLINK
    }
}

/// A directory tree: a list of entries in file order as encountered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Parses a tree payload: a concatenation of
    /// `mode SP name NUL id20` records. Ordering is not validated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let nul = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| GitError::bad_format("tree entry is missing its NUL terminator"))?;
            let meta = std::str::from_utf8(&data[pos..pos + nul])
                .map_err(|_| GitError::bad_format("tree entry metadata is not valid UTF-8"))?;
            let (mode, name) = meta
                .split_once(' ')
                .ok_or_else(|| GitError::bad_format(format!("tree entry has no mode/name split: {meta:?}")))?;
            if mode.is_empty() || !mode.bytes().all(|b| b.is_ascii_digit()) {
                return Err(GitError::bad_format(format!("invalid tree entry mode: {mode:?}")));
            }
            pos += nul + 1;

            if pos + ID_RAW_LEN > data.len() {
                return Err(GitError::bad_format("tree entry is truncated before its object id"));
            }
            let id = ObjectId::from_bytes(&data[pos..pos + ID_RAW_LEN])?;
            pos += ID_RAW_LEN;

            entries.push(TreeEntry {
                mode: mode.to_string(),
                name: name.to_string(),
                id,
            });
        }

        Ok(Tree { entries })
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Loads and parses the tree stored under `id`.
pub fn load_tree(store: &ObjectStore, id: ObjectId) -> Result<Tree> {
    let object = store.get_kind(&id, ObjectKind::Tree)?;
    Tree::parse(&object.data)
}

/// Resolves a path of components starting at `root`, descending only
/// through directory entries. An empty path returns the root itself.
pub fn navigate(store: &ObjectStore, root: ObjectId, path: &[&str]) -> Result<ObjectId> {
    let mut current = root;
    for (depth, component) in path.iter().enumerate() {
        let tree = load_tree(store, current)?;
        let entry = tree.entry(component).ok_or_else(|| {
            GitError::NotFound(format!("path component {:?} not found", path[..=depth].join("/")))
        })?;
        if !entry.is_dir() {
            return Err(GitError::NotADirectory(path[..=depth].join("/")));
        }
        current = entry.id;
    }
    Ok(current)
}

/// One entry reported during a recursive tree walk.
///
/// Paths are relative to the walk root, joined with `/`. Symlinks and
/// gitlinks are reported but are never materialised as file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    File {
        path: String,
        id: ObjectId,
        executable: bool,
    },
    Symlink {
        path: String,
        id: ObjectId,
    },
    Gitlink {
        path: String,
        id: ObjectId,
    },
}

impl WalkEntry {
    pub fn path(&self) -> &str {
        match self {
            WalkEntry::File { path, .. }
            | WalkEntry::Symlink { path, .. }
            | WalkEntry::Gitlink { path, .. } => path,
        }
    }

    pub fn id(&self) -> ObjectId {
        match self {
            WalkEntry::File { id, .. }
            | WalkEntry::Symlink { id, .. }
            | WalkEntry::Gitlink { id, .. } => *id,
        }
    }
}

/// Recursively walks the tree under `tree_id`, reporting every entry in
/// file order. Every tree reachable from the root must resolve in the
/// store; a missing subtree aborts the walk.
pub fn walk(
    store: &ObjectStore,
    tree_id: ObjectId,
    visit: &mut dyn FnMut(WalkEntry),
) -> Result<()> {
    walk_prefixed(store, tree_id, "", visit)
}

fn walk_prefixed(
    store: &ObjectStore,
    tree_id: ObjectId,
    prefix: &str,
    visit: &mut dyn FnMut(WalkEntry),
) -> Result<()> {
    let tree = load_tree(store, tree_id)?;
    for entry in &tree.entries {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        if entry.is_dir() {
            walk_prefixed(store, entry.id, &path, visit)?;
        } else if entry.is_symlink() {
            visit(WalkEntry::Symlink { path, id: entry.id });
        } else if entry.is_gitlink() {
            visit(WalkEntry::Gitlink { path, id: entry.id });
        } else if entry.is_file() {
            visit(WalkEntry::File {
                path,
                id: entry.id,
                executable: entry.is_executable(),
            });
        }
    }
    Ok(())
}
