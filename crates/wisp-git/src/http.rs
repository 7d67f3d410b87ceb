//! Smart HTTP transport over reqwest.

use crate::transport::Transport;
use crate::{GitError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::debug;

const DEFAULT_USER_AGENT: &str = concat!("wisp/", env!("CARGO_PKG_VERSION"));

/// Credentials attached to every request.
#[derive(Clone)]
pub enum Auth {
    /// HTTP basic authentication.
    Basic {
        /// User name.
        username: String,
        /// Password or personal access token.
        password: String,
    },
    /// Bearer token.
    Token(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Token(_) => f.write_str("Token(..)"),
        }
    }
}

/// Posts protocol v2 requests to `<repo>/git-upload-pack`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    info_refs: String,
    auth: Option<Auth>,
}

impl HttpTransport {
    /// Creates a transport for the repository at `repo_url`.
    pub fn new(repo_url: &str) -> Result<Self> {
        Self::with_timeout(repo_url, Duration::from_secs(30))
    }

    /// Creates a transport with a custom request timeout.
    pub fn with_timeout(repo_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| GitError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: upload_pack_url(repo_url),
            info_refs: info_refs_url(repo_url),
            auth: None,
        })
    }

    /// Attaches credentials to every request.
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// The `git-upload-pack` URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(Auth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(Auth::Token(token)) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Bytes> {
        let response = self
            .authorize(request)
            .header("Git-Protocol", "version=2")
            .send()
            .await
            .map_err(|e| GitError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "smart http response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, url, body));
        }

        response
            .bytes()
            .await
            .map_err(|e| GitError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload_pack(&self, body: Bytes) -> Result<Bytes> {
        let request = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/x-git-upload-pack-request")
            .header(header::ACCEPT, "application/x-git-upload-pack-result")
            .body(body);
        self.send(request, &self.endpoint).await
    }

    async fn advertise(&self) -> Result<Bytes> {
        let request = self.client.get(&self.info_refs);
        self.send(request, &self.info_refs).await
    }
}

/// Maps a non-success HTTP status to an error.
fn status_error(status: StatusCode, endpoint: &str, body: String) -> GitError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    };

    match status {
        StatusCode::UNAUTHORIZED => GitError::Unauthorized(endpoint.to_string()),
        StatusCode::FORBIDDEN => GitError::PermissionDenied(endpoint.to_string()),
        StatusCode::NOT_FOUND => GitError::RepositoryNotFound(endpoint.to_string()),
        StatusCode::TOO_MANY_REQUESTS => GitError::ServerUnavailable {
            status: status.as_u16(),
            message,
        },
        s if s.is_server_error() => GitError::ServerUnavailable {
            status: s.as_u16(),
            message,
        },
        s => GitError::Transport(format!("{} returned {}: {}", endpoint, s, message)),
    }
}

fn upload_pack_url(repo_url: &str) -> String {
    format!("{}/git-upload-pack", repo_url.trim_end_matches('/'))
}

fn info_refs_url(repo_url: &str) -> String {
    format!(
        "{}/info/refs?service=git-upload-pack",
        repo_url.trim_end_matches('/')
    )
}
