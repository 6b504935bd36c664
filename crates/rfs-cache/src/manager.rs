use std::io;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rfs_proto::{
    CloseReq, CreateReq, FetchReq, OpenFlags, OpenReq, RemoveReq, RenameReq, ReplyPayload,
    RequestPayload, TruncateReq,
};
use rfs_types::{CacheFileId, Fd, IdAllocator, RemotePath};
use rfs_utils::KeyedMutex;
use serde::Serialize;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::caller::RemoteCaller;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::index::CacheIndex;
use crate::open_files::{OpenFile, OpenFileTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub open_files: usize,
    pub cached_bytes: u64,
    pub capacity_bytes: u64,
}

/// Disk cache of remote files.
///
/// Every mutation is sent to the agent first; the local cache is only
/// touched once the agent has accepted it. If the local step then fails the
/// caller gets [`CacheError::Diverged`]. Concurrent opens of an uncached
/// file share a single fetch.
pub struct DiskCacheManager {
    caller: Arc<dyn RemoteCaller>,
    root: PathBuf,
    index: CacheIndex,
    open_files: OpenFileTable,
    fetch_locks: KeyedMutex,
    fds: IdAllocator<Fd>,
    file_ids: IdAllocator<CacheFileId>,
    capacity_bytes: AtomicU64,
}

impl DiskCacheManager {
    /// Prepare the cache root and build an empty manager.
    ///
    /// With `clean_on_start` leftover cache files are deleted; otherwise new
    /// file ids start above the highest one found.
    pub async fn new(caller: Arc<dyn RemoteCaller>, config: &CacheConfig) -> CacheResult<Self> {
        let root = config.cache_root.clone();
        fs::create_dir_all(&root).await?;
        let highest = scan_cache_root(&root, config.clean_on_start).await?;
        tracing::info!(
            root = %root.display(),
            capacity_bytes = config.capacity_bytes,
            clean_on_start = config.clean_on_start,
            "disk cache ready"
        );
        Ok(Self {
            caller,
            root,
            index: CacheIndex::new(),
            open_files: OpenFileTable::new(),
            fetch_locks: KeyedMutex::new(config.lock_buckets),
            fds: IdAllocator::new(),
            file_ids: IdAllocator::starting_at(highest + 1),
            capacity_bytes: AtomicU64::new(config.capacity_bytes),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    pub fn open_files(&self) -> &OpenFileTable {
        &self.open_files
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes.load(Ordering::Relaxed)
    }

    /// Change the soft capacity; the next write or fetch is checked against it.
    pub fn set_capacity(&self, capacity_bytes: u64) {
        let old = self.capacity_bytes.swap(capacity_bytes, Ordering::Relaxed);
        if old != capacity_bytes {
            tracing::info!(old, new = capacity_bytes, "cache capacity changed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.index.len(),
            open_files: self.open_files.len(),
            cached_bytes: self.index.total_bytes(),
            capacity_bytes: self.capacity_bytes(),
        }
    }

    /// Local file backing `key`, if cached.
    pub fn cached_file(&self, key: &str) -> Option<PathBuf> {
        self.index.get(key).map(|id| self.cache_path(id))
    }

    fn cache_path(&self, id: CacheFileId) -> PathBuf {
        self.root.join(id.to_string())
    }

    async fn remote(&self, path: &RemotePath, payload: RequestPayload) -> CacheResult<ReplyPayload> {
        let addr = path.address();
        Ok(self.caller.call(&addr, payload).await?)
    }

    fn check_capacity(&self) {
        let cached = self.index.total_bytes();
        let capacity = self.capacity_bytes();
        if cached > capacity {
            tracing::warn!(
                cached_bytes = cached,
                capacity_bytes = capacity,
                "cache over capacity"
            );
        }
    }

    async fn discard_file(&self, id: CacheFileId) {
        if let Err(e) = fs::remove_file(self.cache_path(id)).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(file_id = id.0, error = %e, "failed to delete stale cache file");
            }
        }
    }

    /// Open `path`, fetching it into the cache first if needed.
    ///
    /// The agent is asked to open the file before anything happens locally.
    /// The descriptor is allocated up front and simply skipped on failure.
    pub async fn open(&self, path: &RemotePath, flags: OpenFlags) -> CacheResult<Fd> {
        let fd = self.fds.allocate();
        self.remote(
            path,
            RequestPayload::Open(OpenReq {
                path: path.path().to_string(),
                flags,
                fd: fd.0,
            }),
        )
        .await?;

        match self.open_local(path, flags).await {
            Ok(open) => {
                self.open_files.insert(fd, open);
                tracing::debug!(key = %path, fd = fd.0, "opened");
                Ok(fd)
            }
            Err(e) => {
                let close = RequestPayload::Close(CloseReq {
                    path: path.path().to_string(),
                    fd: fd.0,
                });
                if let Err(close_err) = self.remote(path, close).await {
                    tracing::warn!(key = %path, fd = fd.0, error = %close_err, "remote close after failed open");
                }
                Err(e)
            }
        }
    }

    async fn open_local(&self, path: &RemotePath, flags: OpenFlags) -> CacheResult<OpenFile> {
        let key = path.key();
        let file_id = match self.index.get(&key) {
            Some(id) => id,
            None => {
                self.fetch(path).await?;
                self.index.get(&key).ok_or_else(|| {
                    CacheError::LocalCache(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{key} left the cache while opening"),
                    ))
                })?
            }
        };

        let mut options = flags.open_options();
        options.create(false);
        let file = fs::OpenOptions::from(options)
            .open(self.cache_path(file_id))
            .await?;
        if flags.contains(OpenFlags::TRUNCATE) && flags.writable() {
            self.index.resize(file_id, 0);
        }
        Ok(OpenFile {
            key,
            file_id,
            file: tokio::sync::Mutex::new(file),
        })
    }

    /// Make sure `path` is cached. At most one fetch per key is in flight;
    /// callers that lose the race find the entry already present.
    pub async fn fetch(&self, path: &RemotePath) -> CacheResult<()> {
        let key = path.key();
        let _guard = self.fetch_locks.lock(&key).await;
        if self.index.contains(&key) {
            tracing::debug!(%key, "fetch satisfied by cache");
            return Ok(());
        }

        let data = match self
            .remote(path, RequestPayload::Fetch(FetchReq {
                path: path.path().to_string(),
            }))
            .await?
        {
            ReplyPayload::FileData(rsp) => rsp.data,
            other => return Err(CacheError::UnexpectedReply(other.payload_type())),
        };

        let file_id = self.file_ids.allocate();
        if let Err(e) = fs::write(self.cache_path(file_id), &data).await {
            self.discard_file(file_id).await;
            return Err(e.into());
        }
        if let Some(old) = self.index.insert(key.clone(), file_id, data.len() as u64) {
            self.discard_file(old).await;
        }
        tracing::debug!(%key, file_id = file_id.0, bytes = data.len(), "fetched");
        self.check_capacity();
        Ok(())
    }

    /// Create `name` in the remote directory `dir` and open it read-write.
    pub async fn create(&self, dir: &RemotePath, name: &str) -> CacheResult<Fd> {
        self.remote(
            dir,
            RequestPayload::Create(CreateReq {
                dir: dir.path().to_string(),
                name: name.to_string(),
            }),
        )
        .await?;

        let child = dir.join(name);
        let key = child.key();
        let file_id = self.file_ids.allocate();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.cache_path(file_id))
            .await
            .map_err(|source| CacheError::Diverged {
                op: "create",
                key: key.clone(),
                source,
            })?;

        if let Some(old) = self.index.insert(key.clone(), file_id, 0) {
            self.discard_file(old).await;
        }
        let fd = self.fds.allocate();
        self.open_files.insert(
            fd,
            OpenFile {
                key: key.clone(),
                file_id,
                file: tokio::sync::Mutex::new(file),
            },
        );
        tracing::debug!(%key, fd = fd.0, file_id = file_id.0, "created");
        Ok(fd)
    }

    pub async fn remove(&self, path: &RemotePath) -> CacheResult<()> {
        self.remote(
            path,
            RequestPayload::Remove(RemoveReq {
                path: path.path().to_string(),
            }),
        )
        .await?;

        let key = path.key();
        if let Some(file_id) = self.index.remove(&key) {
            match fs::remove_file(self.cache_path(file_id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CacheError::Diverged {
                        op: "remove",
                        key,
                        source,
                    })
                }
            }
        }
        tracing::debug!(%key, "removed");
        Ok(())
    }

    /// Rename `path` to `new_path` on the same agent. Open descriptors stay
    /// valid; the cached file just moves to the new key.
    pub async fn rename(&self, path: &RemotePath, new_path: &str) -> CacheResult<()> {
        self.remote(
            path,
            RequestPayload::Rename(RenameReq {
                path: path.path().to_string(),
                new_path: new_path.to_string(),
            }),
        )
        .await?;

        let to = path.with_path(new_path);
        if let Some(replaced) = self.index.rename(&path.key(), to.key()) {
            self.discard_file(replaced).await;
        }
        tracing::debug!(from = %path, to = %to, "renamed");
        Ok(())
    }

    pub async fn truncate(&self, path: &RemotePath, size: u64) -> CacheResult<()> {
        self.remote(
            path,
            RequestPayload::Truncate(TruncateReq {
                path: path.path().to_string(),
                size,
            }),
        )
        .await?;

        let key = path.key();
        if let Some(file_id) = self.index.get(&key) {
            let truncated = async {
                let file = fs::OpenOptions::new()
                    .write(true)
                    .open(self.cache_path(file_id))
                    .await?;
                file.set_len(size).await
            }
            .await;
            if let Err(source) = truncated {
                return Err(CacheError::Diverged {
                    op: "truncate",
                    key,
                    source,
                });
            }
            self.index.resize(file_id, size);
            self.check_capacity();
        }
        tracing::debug!(%key, size, "truncated");
        Ok(())
    }

    /// Release `fd` locally, then tell the agent.
    ///
    /// The descriptor is gone even if the agent call fails.
    pub async fn close(&self, path: &RemotePath, fd: Fd) -> CacheResult<()> {
        let open = self
            .open_files
            .remove(fd)
            .ok_or(CacheError::InvalidDescriptor(fd))?;
        if let Err(e) = open.file.lock().await.flush().await {
            tracing::warn!(key = %open.key, fd = fd.0, error = %e, "flush on close failed");
        }
        drop(open);

        self.remote(
            path,
            RequestPayload::Close(CloseReq {
                path: path.path().to_string(),
                fd: fd.0,
            }),
        )
        .await?;
        tracing::debug!(key = %path, fd = fd.0, "closed");
        Ok(())
    }

    /// Read up to `size` bytes at `offset` from the local cache file.
    pub async fn read(&self, fd: Fd, offset: u64, size: usize) -> CacheResult<Bytes> {
        let open = self.open_files.get(fd).ok_or(CacheError::InvalidDescriptor(fd))?;
        let mut file = open.file.lock().await;
        let available = file.metadata().await?.len().saturating_sub(offset);
        let size = size.min(usize::try_from(available).unwrap_or(usize::MAX));
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = BytesMut::zeroed(size);
        let mut filled = 0;
        while filled < size {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }

    /// Write `data` at `offset` in the local cache file. Not propagated to
    /// the agent.
    pub async fn write(&self, fd: Fd, offset: u64, data: &[u8]) -> CacheResult<usize> {
        let open = self.open_files.get(fd).ok_or(CacheError::InvalidDescriptor(fd))?;
        let mut file = open.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        self.index.grow(open.file_id, offset + data.len() as u64);
        self.check_capacity();
        Ok(data.len())
    }
}

/// Delete (or just inspect) the numbered cache files under `root` and
/// return the highest id seen.
async fn scan_cache_root(root: &Path, clean: bool) -> io::Result<u64> {
    let mut highest = 0;
    let mut removed = 0usize;
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        else {
            continue;
        };
        if clean {
            fs::remove_file(entry.path()).await?;
            removed += 1;
        } else {
            highest = highest.max(id);
        }
    }
    if removed > 0 {
        tracing::info!(root = %root.display(), removed, "removed stale cache files");
    }
    Ok(highest)
}
