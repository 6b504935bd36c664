//! Local execution of the file operations a client can request.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use rfs_net::message::MESSAGE_MAX_SIZE;
use rfs_proto::{
    CloseReq, CreateReq, FetchReq, OpenReq, RemoveReq, RenameReq, ReplyPayload, RequestPayload,
    TruncateReq, FILE_DATA_REPLY_OVERHEAD,
};
use rfs_types::{make_error_msg, FileCode, Status};
use rfs_utils::resolve_under;
use tokio::fs;

type HandleKey = (String, u64);

/// Largest file whose fetch reply still fits in one frame.
pub const DEFAULT_MAX_FETCH_BYTES: u64 = (MESSAGE_MAX_SIZE - FILE_DATA_REPLY_OVERHEAD) as u64;

/// Executes requests against the tree below `root`.
///
/// Open pins a file handle under `(peer, fd)` until the client closes it, so
/// the file stays reachable for as long as the client's descriptor is live.
pub struct LocalFileOps {
    root: PathBuf,
    handles: HashMap<HandleKey, fs::File>,
    max_fetch_bytes: u64,
}

impl LocalFileOps {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handles: HashMap::new(),
            max_fetch_bytes: DEFAULT_MAX_FETCH_BYTES,
        }
    }

    /// Fetches of files above `limit` bytes fail with `File::TooLarge`.
    pub fn with_max_fetch_bytes(mut self, limit: u64) -> Self {
        self.max_fetch_bytes = limit.min(DEFAULT_MAX_FETCH_BYTES);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Drop every handle pinned by `peer`.
    pub fn release_peer(&mut self, peer: &str) -> usize {
        let before = self.handles.len();
        self.handles.retain(|(owner, _), _| owner != peer);
        before - self.handles.len()
    }

    pub async fn execute(
        &mut self,
        peer: &str,
        payload: RequestPayload,
    ) -> Result<ReplyPayload, Status> {
        match payload {
            RequestPayload::Fetch(req) => self.fetch(req).await,
            RequestPayload::Open(req) => self.open(peer, req).await,
            RequestPayload::Create(req) => self.create(req).await,
            RequestPayload::Remove(req) => self.remove(req).await,
            RequestPayload::Rename(req) => self.rename(req).await,
            RequestPayload::Close(req) => self.close(peer, req),
            RequestPayload::Truncate(req) => self.truncate(req).await,
        }
    }

    fn resolve(&self, remote: &str) -> Result<PathBuf, Status> {
        resolve_under(&self.root, remote)
            .map_err(|e| Status::with_message(FileCode::INVALID_PATH, e.to_string()))
    }

    async fn fetch(&self, req: FetchReq) -> Result<ReplyPayload, Status> {
        let path = self.resolve(&req.path)?;
        let len = fs::metadata(&path).await?.len();
        if len > self.max_fetch_bytes {
            return self.too_large(&req.path, len);
        }
        let data = fs::read(&path).await?;
        // The file may have grown since the metadata call.
        if data.len() as u64 > self.max_fetch_bytes {
            return self.too_large(&req.path, data.len() as u64);
        }
        Ok(ReplyPayload::file_data(Bytes::from(data)))
    }

    fn too_large(&self, path: &str, len: u64) -> Result<ReplyPayload, Status> {
        make_error_msg(
            FileCode::TOO_LARGE,
            format!("{path} is {len} bytes, fetch limit is {}", self.max_fetch_bytes),
        )
    }

    async fn open(&mut self, peer: &str, req: OpenReq) -> Result<ReplyPayload, Status> {
        let path = self.resolve(&req.path)?;
        let file = fs::OpenOptions::from(req.flags.open_options())
            .open(&path)
            .await?;
        if file.metadata().await?.is_dir() {
            return make_error_msg(FileCode::IS_DIRECTORY, format!("{} is a directory", req.path));
        }
        self.handles.insert((peer.to_string(), req.fd), file);
        Ok(ReplyPayload::Ok)
    }

    async fn create(&self, req: CreateReq) -> Result<ReplyPayload, Status> {
        let mut components = Path::new(&req.name).components();
        let name = match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => name.to_owned(),
            _ => {
                return make_error_msg(
                    FileCode::INVALID_PATH,
                    format!("invalid file name {:?}", req.name),
                )
            }
        };
        let path = self.resolve(&req.dir)?.join(name);
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok(ReplyPayload::Ok)
    }

    async fn remove(&self, req: RemoveReq) -> Result<ReplyPayload, Status> {
        let path = self.resolve(&req.path)?;
        if fs::symlink_metadata(&path).await?.is_dir() {
            fs::remove_dir(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(ReplyPayload::Ok)
    }

    async fn rename(&self, req: RenameReq) -> Result<ReplyPayload, Status> {
        let from = self.resolve(&req.path)?;
        let to = self.resolve(&req.new_path)?;
        fs::rename(&from, &to).await?;
        Ok(ReplyPayload::Ok)
    }

    /// Closing a handle this agent never pinned is not an error; the client
    /// releases its descriptor either way.
    fn close(&mut self, peer: &str, req: CloseReq) -> Result<ReplyPayload, Status> {
        if self.handles.remove(&(peer.to_string(), req.fd)).is_none() {
            tracing::debug!(%peer, fd = req.fd, path = %req.path, "close for unknown handle");
        }
        Ok(ReplyPayload::Ok)
    }

    async fn truncate(&self, req: TruncateReq) -> Result<ReplyPayload, Status> {
        let path = self.resolve(&req.path)?;
        let file = fs::OpenOptions::new().write(true).open(&path).await?;
        file.set_len(req.size).await?;
        Ok(ReplyPayload::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfs_proto::OpenFlags;
    use rfs_types::StatusCode;

    const PEER: &str = "127.0.0.1:5000";

    fn setup() -> (tempfile::TempDir, LocalFileOps) {
        let dir = tempfile::tempdir().unwrap();
        let ops = LocalFileOps::new(dir.path());
        (dir, ops)
    }

    fn open_req(path: &str, flags: u32, fd: u64) -> RequestPayload {
        RequestPayload::Open(OpenReq {
            path: path.into(),
            flags: OpenFlags(flags),
            fd,
        })
    }

    #[tokio::test]
    async fn test_fetch_reads_whole_file() {
        let (dir, mut ops) = setup();
        std::fs::write(dir.path().join("a.txt"), vec![9u8; 1000]).unwrap();

        let reply = ops
            .execute(PEER, RequestPayload::Fetch(FetchReq { path: "/a.txt".into() }))
            .await
            .unwrap();
        match reply {
            ReplyPayload::FileData(rsp) => assert_eq!(rsp.data.as_ref(), &[9u8; 1000][..]),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        let (_dir, mut ops) = setup();
        let err = ops
            .execute(PEER, RequestPayload::Fetch(FetchReq { path: "/nope".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), FileCode::NOT_FOUND);
        assert!(err.message().is_some());
    }

    #[tokio::test]
    async fn test_fetch_over_limit() {
        let (dir, ops) = setup();
        let mut ops = ops.with_max_fetch_bytes(4);
        std::fs::write(dir.path().join("small"), b"1234").unwrap();
        std::fs::write(dir.path().join("big"), b"0123456789").unwrap();

        let reply = ops
            .execute(PEER, RequestPayload::Fetch(FetchReq { path: "/small".into() }))
            .await
            .unwrap();
        assert!(matches!(reply, ReplyPayload::FileData(rsp) if rsp.data.len() == 4));

        let err = ops
            .execute(PEER, RequestPayload::Fetch(FetchReq { path: "/big".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), FileCode::TOO_LARGE);
        assert!(err.message().unwrap().contains("10 bytes"));
    }

    #[test]
    fn test_default_fetch_limit_fits_one_frame() {
        assert_eq!(
            DEFAULT_MAX_FETCH_BYTES as usize + FILE_DATA_REPLY_OVERHEAD,
            MESSAGE_MAX_SIZE
        );
    }

    #[tokio::test]
    async fn test_open_pins_handle_until_close() {
        let (dir, mut ops) = setup();
        std::fs::write(dir.path().join("f"), b"x").unwrap();

        ops.execute(PEER, open_req("/f", OpenFlags::RDONLY, 7)).await.unwrap();
        assert_eq!(ops.open_handles(), 1);

        let close = RequestPayload::Close(CloseReq { path: "/f".into(), fd: 7 });
        ops.execute(PEER, close.clone()).await.unwrap();
        assert_eq!(ops.open_handles(), 0);
        // A second close is harmless.
        ops.execute(PEER, close).await.unwrap();
    }

    #[tokio::test]
    async fn test_handles_are_per_peer() {
        let (dir, mut ops) = setup();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        ops.execute("a", open_req("/f", OpenFlags::RDONLY, 1)).await.unwrap();
        ops.execute("b", open_req("/f", OpenFlags::RDONLY, 1)).await.unwrap();
        assert_eq!(ops.open_handles(), 2);
        assert_eq!(ops.release_peer("a"), 1);
        assert_eq!(ops.open_handles(), 1);
    }

    #[tokio::test]
    async fn test_open_honours_flags() {
        let (dir, mut ops) = setup();
        let err = ops
            .execute(PEER, open_req("/new", OpenFlags::RDWR, 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), FileCode::NOT_FOUND);

        ops.execute(PEER, open_req("/new", OpenFlags::RDWR | OpenFlags::CREATE, 2))
            .await
            .unwrap();
        assert!(dir.path().join("new").exists());

        std::fs::write(dir.path().join("new"), b"abc").unwrap();
        ops.execute(PEER, open_req("/new", OpenFlags::WRONLY | OpenFlags::TRUNCATE, 3))
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(dir.path().join("new")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_open_directory_rejected() {
        let (dir, mut ops) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let err = ops
            .execute(PEER, open_req("/sub", OpenFlags::RDONLY, 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), FileCode::IS_DIRECTORY);
        assert_eq!(ops.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_create_truncates_existing() {
        let (dir, mut ops) = setup();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("d/f"), b"old").unwrap();

        let create = RequestPayload::Create(CreateReq {
            dir: "/d".into(),
            name: "f".into(),
        });
        ops.execute(PEER, create).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("d/f")).unwrap(), b"");
    }

    #[tokio::test]
    async fn test_create_rejects_nested_name() {
        let (_dir, mut ops) = setup();
        for name in ["a/b", "..", ""] {
            let create = RequestPayload::Create(CreateReq {
                dir: "/".into(),
                name: name.into(),
            });
            let err = ops.execute(PEER, create).await.unwrap_err();
            assert_eq!(err.code(), FileCode::INVALID_PATH, "name {name:?}");
        }
    }

    #[tokio::test]
    async fn test_remove_file_and_empty_dir() {
        let (dir, mut ops) = setup();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();

        for path in ["/f", "/d"] {
            ops.execute(PEER, RequestPayload::Remove(RemoveReq { path: path.into() }))
                .await
                .unwrap();
        }
        assert!(!dir.path().join("f").exists());
        assert!(!dir.path().join("d").exists());

        let err = ops
            .execute(PEER, RequestPayload::Remove(RemoveReq { path: "/f".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), FileCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rename_and_truncate() {
        let (dir, mut ops) = setup();
        std::fs::write(dir.path().join("a"), b"0123456789").unwrap();

        ops.execute(
            PEER,
            RequestPayload::Rename(RenameReq {
                path: "/a".into(),
                new_path: "/b".into(),
            }),
        )
        .await
        .unwrap();
        assert!(!dir.path().join("a").exists());

        ops.execute(
            PEER,
            RequestPayload::Truncate(TruncateReq {
                path: "/b".into(),
                size: 4,
            }),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(dir.path().join("b")).unwrap(), b"0123");
    }

    #[tokio::test]
    async fn test_escape_rejected() {
        let (_dir, mut ops) = setup();
        let err = ops
            .execute(PEER, RequestPayload::Fetch(FetchReq { path: "/../etc/passwd".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), FileCode::INVALID_PATH);
        assert_ne!(err.code(), StatusCode::OK);
    }
}
