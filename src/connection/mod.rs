use crate::errors::{GitError, Result};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use url::Url;

pub mod pkt_line;
pub mod protocol;

pub use protocol::{FetchFilter, FetchRequest, RefAdvertisement};

use protocol::{build_upload_pack_request, demux_pack_response};

const UPLOAD_PACK_REQUEST_TYPE: &str = "application/x-git-upload-pack-request";
const UPLOAD_PACK_RESULT_TYPE: &str = "application/x-git-upload-pack-result";

/// Smart-HTTP transport for one remote repository.
///
/// Owns its HTTP client handle; two concurrent fetch pipelines should each
/// own their transport.
pub struct HttpTransport {
    client: Client,
    repo_url: Url,
    base: String,
}

impl HttpTransport {
    pub fn new(repo_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), repo_url)
    }

    /// Builds a transport over a caller-configured client (proxies,
    /// timeouts, extra headers).
    pub fn with_client(client: Client, repo_url: &str) -> Result<Self> {
        let parsed = Url::parse(repo_url)
            .map_err(|e| GitError::protocol(format!("invalid repository URL {repo_url:?}: {e}")))?;
        if !parsed.has_host() {
            return Err(GitError::protocol(format!("repository URL {repo_url:?} has no host")));
        }
        let base = repo_url.trim_end_matches('/').to_string();
        Ok(HttpTransport {
            client,
            repo_url: parsed,
            base,
        })
    }

    pub fn url(&self) -> &Url {
        &self.repo_url
    }

    /// `GET {repo}/info/refs?service=git-upload-pack`: reference discovery.
    pub async fn discover_refs(&self, cancel: &CancellationToken) -> Result<RefAdvertisement> {
        check_cancelled(cancel)?;
        log::debug!("discovering refs at {}", self.base);

        let url = format!("{}/info/refs?service=git-upload-pack", self.base);
        let response = cancellable(cancel, self.client.get(&url).send()).await?;
        check_status(response.status())?;
        let body = cancellable(cancel, response.bytes()).await?;

        RefAdvertisement::parse(&body)
    }

    /// `POST {repo}/git-upload-pack`: performs one fetch and returns the
    /// raw packfile bytes after side-band demultiplexing.
    pub async fn fetch_pack(
        &self,
        request: &FetchRequest,
        advert: &RefAdvertisement,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        check_cancelled(cancel)?;
        let (body, sideband) = build_upload_pack_request(request, advert)?;
        log::debug!(
            "fetching {} want(s) from {} (sideband: {sideband})",
            request.wants.len(),
            self.base
        );

        let url = format!("{}/git-upload-pack", self.base);
        let request = self
            .client
            .post(&url)
            .header("Content-Type", UPLOAD_PACK_REQUEST_TYPE)
            .header("Accept", UPLOAD_PACK_RESULT_TYPE)
            .body(body);
        let response = cancellable(cancel, request.send()).await?;
        check_status(response.status())?;
        let reply = cancellable(cancel, response.bytes()).await?;

        demux_pack_response(&reply, sideband)
    }
}

/// Races a network operation against cancellation of the pipeline.
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl std::future::Future<Output = reqwest::Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GitError::Cancelled),
        result = operation => Ok(result?),
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<()> {
    let code = status.as_u16();
    if code == 401 || code == 403 {
        return Err(GitError::Unauthorized(code));
    }
    if !status.is_success() {
        return Err(GitError::protocol(format!("server returned HTTP {code}")));
    }
    Ok(())
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(GitError::Cancelled);
    }
    Ok(())
}
