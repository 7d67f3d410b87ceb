//! Transport seam between the fetch logic and the network.

use crate::lsrefs::LsRefsRequest;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Sends `git-upload-pack` requests and returns full response bodies.
///
/// Implementations do not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts a pkt-line request body and returns the raw response.
    async fn upload_pack(&self, body: Bytes) -> Result<Bytes>;

    /// Asks the server for its upload-pack advertisement.
    ///
    /// Succeeds when the repository exists and the credentials are accepted.
    /// The default sends an `ls-refs` request limited to `HEAD`.
    async fn advertise(&self) -> Result<Bytes> {
        let body = LsRefsRequest::with_prefixes(["HEAD"]).encode()?;
        self.upload_pack(body).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn upload_pack(&self, body: Bytes) -> Result<Bytes> {
        (**self).upload_pack(body).await
    }

    async fn advertise(&self) -> Result<Bytes> {
        (**self).advertise().await
    }
}
