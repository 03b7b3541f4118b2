use crate::connection::{FetchRequest, HttpTransport, RefAdvertisement};
use crate::errors::{GitError, Result};
use crate::objects::tree::{navigate, walk, WalkEntry};
use crate::objects::{Commit, ObjectId, ObjectKind, ObjectStore, PackedObject, Tag};
use crate::storage::pack::{decode_packfile, decode_thin_packfile};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Optional caller-supplied blob cache, consulted before the secondary
/// fetch of a partial clone.
///
/// Both hooks are advisory: the core never owns the cache's storage, and
/// a cache returning nothing simply means the blob is fetched again.
pub trait BlobCache {
    /// Returns the blob's bytes if the cache holds this identifier.
    fn lookup(&self, id: &ObjectId) -> Option<Vec<u8>>;

    /// Called once for every blob the secondary fetch materialised, so
    /// the caller can populate its cache.
    fn on_load(&self, id: &ObjectId, data: &[u8]);
}

/// A remote repository reachable over Smart HTTP.
///
/// Each instance owns its transport handle, packfile buffers, and object
/// stores; concurrent requests should each use their own instance.
pub struct RemoteRepository {
    transport: HttpTransport,
    cancel: CancellationToken,
}

impl RemoteRepository {
    pub fn open(repo_url: &str) -> Result<Self> {
        Ok(RemoteRepository {
            transport: HttpTransport::new(repo_url)?,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_transport(transport: HttpTransport) -> Self {
        RemoteRepository {
            transport,
            cancel: CancellationToken::new(),
        }
    }

    /// Attaches a cancellation token; cancelling it between network
    /// operations aborts the running pipeline with [`GitError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Performs reference discovery against the remote.
    pub async fn discover_refs(&self) -> Result<RefAdvertisement> {
        self.transport.discover_refs(&self.cancel).await
    }

    /// Resolves a branch, tag, symbolic ref, or 40-hex string to an
    /// object identifier.
    pub async fn resolve_ref(&self, name: &str) -> Result<ObjectId> {
        let advert = self.discover_refs().await?;
        advert
            .resolve(name)
            .ok_or_else(|| GitError::NotFound(format!("reference {name:?}")))
    }

    /// Resolves a symbolic reference (e.g. `HEAD`) to its target refname.
    pub async fn resolve_symref(&self, name: &str) -> Result<String> {
        let advert = self.discover_refs().await?;
        advert
            .symref_target(name)
            .map(str::to_string)
            .ok_or_else(|| GitError::NotFound(format!("symbolic reference {name:?}")))
    }

    /// Fetches the full history and contents reachable from `commitish`.
    pub async fn fetch_full(&self, commitish: &str) -> Result<ObjectStore> {
        let advert = self.discover_refs().await?;
        let want = self.resolve_with(&advert, commitish)?;
        self.fetch_into_store(&advert, &FetchRequest::new(vec![want])).await
    }

    /// Fetches with history shallowed to `depth` commits.
    pub async fn fetch_shallow(&self, commitish: &str, depth: u32) -> Result<ObjectStore> {
        let advert = self.discover_refs().await?;
        let want = self.resolve_with(&advert, commitish)?;
        self.fetch_into_store(&advert, &FetchRequest::new(vec![want]).with_depth(depth))
            .await
    }

    /// Fetches commits and trees only (`filter blob:none`), optionally
    /// shallowed.
    pub async fn fetch_blobless(&self, commitish: &str, depth: Option<u32>) -> Result<ObjectStore> {
        let advert = self.discover_refs().await?;
        let want = self.resolve_with(&advert, commitish)?;
        let mut request = FetchRequest::new(vec![want]).blobless();
        if let Some(depth) = depth {
            request = request.with_depth(depth);
        }
        self.fetch_into_store(&advert, &request).await
    }

    /// Fetches a specific list of objects as a thin pack, resolving delta
    /// bases out of `store`, and merges the result into it. Returns the
    /// identifiers of the newly materialised objects.
    pub async fn fetch_objects(
        &self,
        wants: &[ObjectId],
        store: &mut ObjectStore,
    ) -> Result<Vec<ObjectId>> {
        let advert = self.discover_refs().await?;
        self.fetch_objects_with(&advert, wants, store).await
    }

    /// Materialises one subdirectory of one commit as a path → contents
    /// mapping, fetching only the objects that requires.
    ///
    /// A blobless shallow fetch brings in the commit and its trees; the
    /// subtree is walked locally to enumerate the blobs needed; blobs the
    /// optional `cache` cannot supply are retrieved with a second, thin
    /// fetch. Paths are relative to `path`, `/`-joined.
    pub async fn load_subdirectory(
        &self,
        commitish: &str,
        path: &str,
        cache: Option<&dyn BlobCache>,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let advert = self.discover_refs().await?;
        let want = self.resolve_with(&advert, commitish)?;

        log::debug!("loading {path:?} at {want} from {}", self.transport.url());
        let request = FetchRequest::new(vec![want]).blobless().with_depth(1);
        let mut store = self.fetch_into_store(&advert, &request).await?;

        let commit_id = peel_to_commit(&store, want)?;
        let commit = Commit::parse(&store.get_kind(&commit_id, ObjectKind::Commit)?.data)?;
        let components = split_path(path);
        let subtree = navigate(&store, commit.tree, &components)?;

        let mut files: Vec<(String, ObjectId)> = Vec::new();
        walk(&store, subtree, &mut |entry| {
            if let WalkEntry::File { path, id, .. } = entry {
                files.push((path, id));
            }
        })?;

        let missing = consult_cache(&mut store, &files, cache)?;
        if !missing.is_empty() {
            log::debug!("{} blob(s) missing after cache lookup", missing.len());
            let added = self.fetch_objects_with(&advert, &missing, &mut store).await?;
            if let Some(cache) = cache {
                for id in &added {
                    if let Some(object) = store.get(id) {
                        if object.kind == ObjectKind::Blob {
                            cache.on_load(id, &object.data);
                        }
                    }
                }
            }
        }

        let mut contents = BTreeMap::new();
        for (file_path, id) in files {
            let object = store.get(&id).ok_or_else(|| {
                GitError::NotFound(format!("blob {id} for {file_path:?} is still missing after fetch"))
            })?;
            contents.insert(file_path, object.data.clone());
        }
        Ok(contents)
    }

    fn resolve_with(&self, advert: &RefAdvertisement, commitish: &str) -> Result<ObjectId> {
        advert
            .resolve(commitish)
            .ok_or_else(|| GitError::NotFound(format!("reference {commitish:?}")))
    }

    async fn fetch_into_store(
        &self,
        advert: &RefAdvertisement,
        request: &FetchRequest,
    ) -> Result<ObjectStore> {
        let pack = self.transport.fetch_pack(request, advert, &self.cancel).await?;
        let objects = decode_packfile(&pack, None)?;
        let mut store = ObjectStore::new();
        for object in objects {
            store.insert(object)?;
        }
        log::debug!("materialised {} object(s)", store.len());
        Ok(store)
    }

    async fn fetch_objects_with(
        &self,
        advert: &RefAdvertisement,
        wants: &[ObjectId],
        store: &mut ObjectStore,
    ) -> Result<Vec<ObjectId>> {
        let request = FetchRequest::new(wants.to_vec());
        let pack = self.transport.fetch_pack(&request, advert, &self.cancel).await?;
        let objects = decode_thin_packfile(&pack, store)?;

        let mut added = Vec::new();
        for object in objects {
            if !store.contains(&object.id) {
                added.push(object.id);
            }
            store.insert(object)?;
        }
        Ok(added)
    }
}

/// Follows annotated tags until a commit identifier is reached.
fn peel_to_commit(store: &ObjectStore, mut id: ObjectId) -> Result<ObjectId> {
    loop {
        match store.get(&id) {
            Some(object) if object.kind == ObjectKind::Tag => {
                id = Tag::parse(&object.data)?.object;
            }
            _ => return Ok(id),
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Satisfies what it can of `files` from the store and the cache; cached
/// bytes are inserted under their advertised identifier. Returns the
/// deduplicated identifiers that still have to be fetched.
fn consult_cache(
    store: &mut ObjectStore,
    files: &[(String, ObjectId)],
    cache: Option<&dyn BlobCache>,
) -> Result<Vec<ObjectId>> {
    let mut missing = Vec::new();
    for (_, id) in files {
        if store.contains(id) || missing.contains(id) {
            continue;
        }
        if let Some(cache) = cache {
            if let Some(data) = cache.lookup(id) {
                store.insert(PackedObject {
                    kind: ObjectKind::Blob,
                    data,
                    id: *id,
                })?;
                continue;
            }
        }
        missing.push(*id);
    }
    Ok(missing)
}
