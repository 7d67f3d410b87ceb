//! Fetch orchestration.
//!
//! One fetch is: build the request, send it, walk the response to the pack,
//! decode every entry, resolve deltas, and hand back the object map.

use crate::pack::{PackReader, PackedObject};
use crate::protocol::{open_packfile, FetchRequest};
use crate::resolver::DeltaResolver;
use crate::transport::Transport;
use crate::tree::ObjectSource;
use crate::{GitError, ObjectMap, Result};
use async_trait::async_trait;
use bytes::Buf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wisp_storage::{ObjectId, ObjectStorage};

/// Per-request fetch options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip the storage lookup and always ask the server.
    pub no_cache: bool,
    /// Send `no-progress`.
    pub no_progress: bool,
    /// Send `filter blob:none`.
    pub blob_filter: bool,
    /// Send `shallow` lines for the wants.
    pub shallow: bool,
    /// Send `deepen <n>` when non-zero.
    pub deepen: u32,
    /// Send `done`.
    pub done: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            no_cache: false,
            no_progress: true,
            blob_filter: false,
            shallow: false,
            deepen: 0,
            done: true,
        }
    }
}

impl FetchOptions {
    /// Options for fetching trees and commits without any blobs.
    pub fn blobless() -> Self {
        Self {
            blob_filter: true,
            ..Self::default()
        }
    }

    /// Options for fetching a single commit and its trees, one level deep.
    pub fn shallow_commit() -> Self {
        Self {
            blob_filter: true,
            shallow: true,
            deepen: 1,
            ..Self::default()
        }
    }

    /// Options for fetching a commit with up to `depth` ancestors, without blobs.
    pub fn history(depth: u32) -> Self {
        Self {
            blob_filter: true,
            deepen: depth.max(1),
            ..Self::default()
        }
    }
}

/// Runs fetch requests over a [`Transport`].
pub struct Fetcher<T> {
    transport: T,
}

impl<T: Transport> Fetcher<T> {
    /// Creates a fetcher.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches `wants` and everything the server sends with them.
    ///
    /// Wants already present in `storage` are served from it unless
    /// `options.no_cache` is set; when all of them are, no request is made.
    pub async fn fetch(
        &self,
        wants: &[ObjectId],
        options: FetchOptions,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<ObjectMap> {
        if cancel.is_cancelled() {
            return Err(GitError::Cancelled);
        }
        let first = wants
            .first()
            .copied()
            .ok_or_else(|| GitError::Protocol("fetch without wants".to_string()))?;

        let mut objects = ObjectMap::new();
        let mut missing = Vec::with_capacity(wants.len());
        for want in wants {
            let cached = if options.no_cache {
                None
            } else {
                storage.get(want)?
            };
            match cached {
                Some(object) => {
                    objects.insert(*want, object);
                }
                None => missing.push(*want),
            }
        }

        if missing.is_empty() {
            debug!(wants = wants.len(), "all wants served from storage");
            return Ok(objects);
        }

        let request = FetchRequest {
            wants: missing.clone(),
            no_progress: options.no_progress,
            blob_filter: options.blob_filter,
            shallow: options.shallow,
            deepen: options.deepen,
            done: options.done,
        };
        let body = request.encode()?;

        debug!(wants = missing.len(), cached = objects.len(), "sending fetch request");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GitError::Cancelled),
            response = self.transport.upload_pack(body) => response?,
        };

        let fallback = missing.first().copied();
        let received = self
            .decode(response.reader(), &mut objects, storage, cancel)
            .map_err(|e| match e {
                GitError::Server(msg) => GitError::from_server(msg, fallback),
                other => other,
            })?;

        if objects.is_empty() {
            return Err(GitError::ObjectNotFound(first));
        }

        info!(
            wants = wants.len(),
            received,
            objects = objects.len(),
            "fetch completed"
        );
        Ok(objects)
    }

    /// Decodes a fetch response into `objects`, returning the number of pack entries.
    fn decode<R: std::io::Read>(
        &self,
        response: R,
        objects: &mut ObjectMap,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let Some(pack) = open_packfile(response)? else {
            return Ok(0);
        };
        let reader = PackReader::new(pack)?;
        debug!(
            version = reader.version(),
            entries = reader.object_count(),
            "decoding pack"
        );

        let mut regular = Vec::new();
        let mut deltas = Vec::new();
        for entry in reader {
            if cancel.is_cancelled() {
                return Err(GitError::Cancelled);
            }
            match entry? {
                PackedObject::Object(object) => regular.push(object),
                PackedObject::Delta(delta) => deltas.push(delta),
            }
        }
        let received = regular.len() + deltas.len();

        storage.add(&regular)?;
        for object in regular {
            objects.insert(object.id, object);
        }

        if !deltas.is_empty() {
            let stats = DeltaResolver::new(storage, cancel).resolve(deltas, objects)?;
            debug!(passes = stats.passes, resolved = stats.resolved, "deltas resolved");
        }
        Ok(received)
    }
}

#[async_trait]
impl<T: Transport> ObjectSource for Fetcher<T> {
    async fn fetch_objects(
        &self,
        ids: &[ObjectId],
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<ObjectMap> {
        self.fetch(ids, FetchOptions::blobless(), storage, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Delta;
    use crate::pack::PackBuilder;
    use crate::pktline::{PktLine, PktLineWriter};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use wisp_storage::{GitObject, MemoryStorage, ObjectType};

    /// Replays canned responses and records request bodies.
    struct Canned {
        responses: Mutex<Vec<Result<Bytes>>>,
        requests: Mutex<Vec<Bytes>>,
    }

    impl Canned {
        fn new(responses: Vec<Result<Bytes>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn upload_pack(&self, body: Bytes) -> Result<Bytes> {
            self.requests.lock().push(body);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(GitError::Transport("no canned response".into()));
            }
            responses.remove(0)
        }
    }

    fn packfile_response(pack: &[u8]) -> Bytes {
        let mut buf = Vec::new();
        let mut writer = PktLineWriter::new(&mut buf);
        writer.write_line("packfile").unwrap();
        for chunk in pack.chunks(1000) {
            let mut data = vec![1u8];
            data.extend_from_slice(chunk);
            writer.write_data(&data).unwrap();
        }
        writer.flush_pkt().unwrap();
        Bytes::from(buf)
    }

    fn pack_of(objects: &[GitObject]) -> Vec<u8> {
        let mut builder = PackBuilder::new();
        for object in objects {
            builder.add(object.clone());
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_decodes_and_stores() {
        let blob = GitObject::blob(b"hello".to_vec());
        let transport = Canned::new(vec![Ok(packfile_response(&pack_of(&[blob.clone()])))]);
        let fetcher = Fetcher::new(transport);
        let storage = MemoryStorage::new();

        let objects = fetcher
            .fetch(&[blob.id], FetchOptions::default(), &storage, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(objects[&blob.id].data.as_ref(), b"hello");
        assert!(storage.has(&blob.id).unwrap());
        assert_eq!(fetcher.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_resolves_deltas() {
        let base = GitObject::blob(b"the quick brown fox".to_vec());
        let target = b"the quick brown fox jumps";
        let mut builder = PackBuilder::new();
        builder.add_ref_delta(base.id, &Delta::compute(&base.data, target));
        builder.add(base.clone());
        let transport = Canned::new(vec![Ok(packfile_response(&builder.build().unwrap()))]);
        let fetcher = Fetcher::new(transport);
        let storage = MemoryStorage::new();

        let objects = fetcher
            .fetch(&[base.id], FetchOptions::default(), &storage, &CancellationToken::new())
            .await
            .unwrap();

        let id = ObjectId::hash_object(ObjectType::Blob, target);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[&id].data.as_ref(), target);
    }

    #[tokio::test]
    async fn test_cached_wants_skip_transport() {
        let blob = GitObject::blob(b"cached".to_vec());
        let storage = MemoryStorage::new();
        storage.add(std::slice::from_ref(&blob)).unwrap();
        let fetcher = Fetcher::new(Canned::new(Vec::new()));

        let objects = fetcher
            .fetch(&[blob.id], FetchOptions::default(), &storage, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(fetcher.transport().request_count(), 0);
    }

    #[tokio::test]
    async fn test_no_cache_always_requests() {
        let blob = GitObject::blob(b"cached".to_vec());
        let storage = MemoryStorage::new();
        storage.add(std::slice::from_ref(&blob)).unwrap();
        let transport = Canned::new(vec![Ok(packfile_response(&pack_of(&[blob.clone()])))]);
        let fetcher = Fetcher::new(transport);

        let options = FetchOptions {
            no_cache: true,
            ..FetchOptions::default()
        };
        fetcher
            .fetch(&[blob.id], options, &storage, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetcher.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let fetcher = Fetcher::new(Canned::new(Vec::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher
            .fetch(
                &[ObjectId::from_bytes([1; 20])],
                FetchOptions::default(),
                &MemoryStorage::new(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Cancelled));
        assert_eq!(fetcher.transport().request_count(), 0);
    }

    #[tokio::test]
    async fn test_not_our_ref_is_object_not_found() {
        let want = ObjectId::from_bytes([7; 20]);
        let mut buf = Vec::new();
        PktLineWriter::new(&mut buf)
            .write(&PktLine::from_string("ERR upload-pack: not our ref\n"))
            .unwrap();
        let fetcher = Fetcher::new(Canned::new(vec![Ok(Bytes::from(buf))]));

        let err = fetcher
            .fetch(
                &[want],
                FetchOptions::default(),
                &MemoryStorage::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::ObjectNotFound(id) if id == want));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_empty_response_is_object_not_found() {
        let want = ObjectId::from_bytes([3; 20]);
        let fetcher = Fetcher::new(Canned::new(vec![Ok(packfile_response(&pack_of(&[])))]));

        let err = fetcher
            .fetch(
                &[want],
                FetchOptions::default(),
                &MemoryStorage::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::ObjectNotFound(id) if id == want));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let fetcher = Fetcher::new(Canned::new(vec![Err(GitError::ServerUnavailable {
            status: 503,
            message: "busy".into(),
        })]));

        let err = fetcher
            .fetch(
                &[ObjectId::from_bytes([1; 20])],
                FetchOptions::default(),
                &MemoryStorage::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_base_fails_whole_fetch() {
        let ghost = GitObject::blob(b"never sent".to_vec());
        let mut builder = PackBuilder::new();
        builder.add(GitObject::blob(b"other".to_vec()));
        builder.add_ref_delta(ghost.id, &Delta::compute(&ghost.data, b"never sent!"));
        let response = packfile_response(&builder.build().unwrap());
        let fetcher = Fetcher::new(Canned::new(vec![Ok(response)]));

        let err = fetcher
            .fetch(
                &[ghost.id],
                FetchOptions::default(),
                &MemoryStorage::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::MissingBaseObjects(ids) if ids == vec![ghost.id]));
    }

    #[tokio::test]
    async fn test_request_carries_options() {
        let commit = ObjectId::from_bytes([0xcd; 20]);
        let fetcher = Fetcher::new(Canned::new(vec![Ok(packfile_response(&pack_of(&[])))]));
        let _ = fetcher
            .fetch(
                &[commit],
                FetchOptions::shallow_commit(),
                &MemoryStorage::new(),
                &CancellationToken::new(),
            )
            .await;

        let requests = fetcher.transport().requests.lock();
        let text = String::from_utf8_lossy(&requests[0]);
        assert!(text.contains(&format!("want {}\n", commit)));
        assert!(text.contains(&format!("shallow {}\n", commit)));
        assert!(text.contains("deepen 1\n"));
        assert!(text.contains("filter blob:none\n"));
        assert!(text.contains("done\n"));
    }
}
