use crate::errors::{GitError, Result};
use std::collections::HashMap;

pub mod commit;
pub mod id;
pub mod tag;
pub mod tree;

pub use commit::{Commit, Signature};
pub use id::{sha1_digest, ObjectId, ID_HEX_LEN, ID_RAW_LEN};
pub use tag::Tag;
pub use tree::{Tree, TreeEntry, WalkEntry};

pub const OBJ_TYPE_COMMIT: &str = "commit";
pub const OBJ_TYPE_TREE: &str = "tree";
pub const OBJ_TYPE_BLOB: &str = "blob";
pub const OBJ_TYPE_TAG: &str = "tag";

/// The kind of an object as it appears in a packfile.
///
/// `OfsDelta` and `RefDelta` are transient: they occur in the pack stream
/// but are resolved away before objects reach an [`ObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
    OfsDelta,
    RefDelta,
}

impl ObjectKind {
    /// Maps a pack type code (bits 6..4 of the first header byte).
    pub fn from_pack_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(ObjectKind::Commit),
            2 => Ok(ObjectKind::Tree),
            3 => Ok(ObjectKind::Blob),
            4 => Ok(ObjectKind::Tag),
            6 => Ok(ObjectKind::OfsDelta),
            7 => Ok(ObjectKind::RefDelta),
            _ => Err(GitError::bad_format(format!("invalid pack object type code: {code}"))),
        }
    }

    pub fn is_delta(self) -> bool {
        matches!(self, ObjectKind::OfsDelta | ObjectKind::RefDelta)
    }

    /// The lowercase ASCII name used in the object header that is hashed.
    /// Delta kinds never reach hashing; their names only appear in errors.
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Commit => OBJ_TYPE_COMMIT,
            ObjectKind::Tree => OBJ_TYPE_TREE,
            ObjectKind::Blob => OBJ_TYPE_BLOB,
            ObjectKind::Tag => OBJ_TYPE_TAG,
            ObjectKind::OfsDelta => "ofs-delta",
            ObjectKind::RefDelta => "ref-delta",
        }
    }
}

/// Computes the identifier of an object from its kind and payload:
/// `SHA1("<kind> <size>\0<payload>")`.
pub fn object_id_for(kind: ObjectKind, data: &[u8]) -> ObjectId {
    let header = format!("{} {}\0", kind.name(), data.len());
    let mut buf = Vec::with_capacity(header.len() + data.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(data);
    sha1_digest(&buf)
}

/// A fully materialised object: kind, decompressed payload, identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
    pub id: ObjectId,
}

impl PackedObject {
    /// Materialises an object, computing its identifier from the payload.
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        let id = object_id_for(kind, &data);
        PackedObject { kind, data, id }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// An in-memory content-addressed object store.
///
/// Populated once per fetch session and read-only afterwards. Keys are
/// unique identifiers; the store owns its object bytes. Delta kinds are
/// rejected at insertion, so a store is always closed under the delta-base
/// relation.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<ObjectId, PackedObject>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: PackedObject) -> Result<()> {
        if object.kind.is_delta() {
            return Err(GitError::bad_format(format!(
                "refusing to store unresolved {} object",
                object.kind.name()
            )));
        }
        self.objects.insert(object.id, object);
        Ok(())
    }

    pub fn get(&self, id: &ObjectId) -> Option<&PackedObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Moves every object of `other` into `self`.
    pub fn merge(&mut self, other: ObjectStore) {
        self.objects.extend(other.objects);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackedObject> {
        self.objects.values()
    }

    /// Looks up `id` and checks the object has the expected kind.
    pub fn get_kind(&self, id: &ObjectId, kind: ObjectKind) -> Result<&PackedObject> {
        let object = self
            .objects
            .get(id)
            .ok_or_else(|| GitError::NotFound(format!("{} {id}", kind.name())))?;
        if object.kind != kind {
            return Err(GitError::bad_format(format!(
                "object {id} is a {}, expected {}",
                object.kind.name(),
                kind.name()
            )));
        }
        Ok(object)
    }
}
