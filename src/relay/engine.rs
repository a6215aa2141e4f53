// Transfer engine - per-item fetch and relay with bounded retry
//
// Owns the item-level failure policy: a still-failing fetch or relay
// after all attempts is terminal for that item only and never aborts
// the run. Cancellation is polled before every attempt.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::{FetchError, RelayError};
use super::models::{LocalPayload, MediaKind, RelayConfig, WorkItem};
use super::retry::{with_retry, CancelToken, RetryOutcome};
use super::traits::{ChatRef, ChatTransport, MediaFetcher};

/// Marker header some source URLs require to authorize the GET.
pub const ROUTE_TAG_HEADER: &str = "X-Snap-Route-Tag";
pub const ROUTE_TAG_VALUE: &str = "mem-dmd";

/// Production fetcher: reqwest with per-call timeouts, a bounded
/// connection pool and optional proxy.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &RelayConfig) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_connections)
            .connect_timeout(Duration::from_secs(10));
        if let Some(proxy_url) = config.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn get(
        &self,
        url: &str,
        route_tag: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url).timeout(timeout);
        if route_tag {
            request = request.header(ROUTE_TAG_HEADER, ROUTE_TAG_VALUE);
        }
        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;
        Ok(bytes.to_vec())
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Network(err.to_string())
    }
}

/// Fetches one item's bytes to the scratch directory, then relays them
/// to the destination chat.
pub struct TransferEngine {
    fetcher: Arc<dyn MediaFetcher>,
    config: RelayConfig,
}

impl TransferEngine {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, config: RelayConfig) -> Self {
        Self { fetcher, config }
    }

    /// Retrieve the item's bytes and persist them under `work_dir`.
    pub async fn fetch(
        &self,
        item: &WorkItem,
        work_dir: &Path,
        cancel: &CancelToken,
    ) -> RetryOutcome<LocalPayload, FetchError> {
        let target = work_dir.join(item.scratch_file_name());
        with_retry(
            self.config.retry_attempts,
            self.config.retry_delay,
            cancel,
            |attempt| {
                let target = target.clone();
                async move {
                    log::debug!(
                        "[{}] fetch #{} attempt {}",
                        self.fetcher.name(),
                        item.ordinal,
                        attempt
                    );
                    let bytes = self
                        .fetcher
                        .get(
                            &item.source_url,
                            item.requires_route_header,
                            self.config.request_timeout,
                        )
                        .await?;
                    tokio::fs::write(&target, &bytes).await?;
                    Ok(LocalPayload {
                        path: target,
                        size: bytes.len() as u64,
                    })
                }
            },
        )
        .await
    }

    /// Deliver a fetched payload to the chat. The transfer method
    /// follows the media kind: streamable for video, static otherwise.
    ///
    /// The scratch file is NOT deleted here; the caller owns cleanup on
    /// every exit path.
    pub async fn relay(
        &self,
        transport: &dyn ChatTransport,
        chat: ChatRef,
        item: &WorkItem,
        payload: &LocalPayload,
        cancel: &CancelToken,
    ) -> RetryOutcome<(), RelayError> {
        let caption = item.caption();
        with_retry(
            self.config.retry_attempts,
            self.config.retry_delay,
            cancel,
            |attempt| {
                let caption = caption.as_str();
                async move {
                    log::debug!(
                        "[{}] relay #{} attempt {}",
                        transport.name(),
                        item.ordinal,
                        attempt
                    );
                    let sent = match item.media_kind {
                        MediaKind::Video => {
                            transport.send_video(chat, &payload.path, caption).await
                        }
                        MediaKind::Image | MediaKind::Other => {
                            transport.send_photo(chat, &payload.path, caption).await
                        }
                    };
                    sent.map_err(RelayError::from)
                }
            },
        )
        .await
    }
}
