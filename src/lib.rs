//! packfetch reads files out of a remote Git repository over Smart HTTP,
//! without a local git installation, a filesystem, or native libraries.
//!
//! The pieces compose into a partial-clone pipeline: a blobless fetch
//! brings in commits and trees, the requested subtree is walked locally to
//! enumerate exactly the blobs it needs, and a second thin fetch retrieves
//! the ones a caller-supplied cache cannot provide.
//!
//! ```no_run
//! # async fn example() -> packfetch::Result<()> {
//! let repo = packfetch::RemoteRepository::open("https://example.com/org/repo.git")?;
//! let files = repo.load_subdirectory("main", "docs", None).await?;
//! for (path, contents) in &files {
//!     println!("{path}: {} bytes", contents.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The lower layers are usable on their own: [`storage::pack`] decodes
//! packfiles and resolves deltas, [`storage::index`] derives and parses
//! pack indexes, and [`connection`] speaks the upload-pack protocol.

pub mod connection;
pub mod errors;
pub mod objects;
pub mod repo;
pub mod storage;

#[cfg(test)]
mod testutil;

pub use connection::{FetchFilter, FetchRequest, HttpTransport, RefAdvertisement};
pub use errors::{GitError, Result};
pub use objects::{Commit, ObjectId, ObjectKind, ObjectStore, PackedObject, Signature, Tag, Tree, TreeEntry};
pub use repo::{BlobCache, RemoteRepository};
pub use storage::{
    decode_packfile, decode_thin_packfile, generate_index, parse_index, IndexEntry, PackIndex,
};
