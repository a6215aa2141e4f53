// Collaborator trait definitions
//
// The pipeline consumes two outside capabilities: the chat transport
// that delivers messages and media to the destination, and the HTTP
// fetcher that retrieves memory bytes from the source host. Both sit
// behind traits so runs can be driven against scripted fakes in tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::{FetchError, TransportError};

/// Destination chat identity.
pub type ChatRef = i64;

/// Handle to a message previously sent, for in-place edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef(pub i64);

/// Message-sending/editing/file-receiving capability of the
/// destination chat.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Name of the transport (for logging).
    fn name(&self) -> &'static str;

    async fn send_text(&self, chat: ChatRef, text: &str) -> Result<MessageRef, TransportError>;

    /// Edit a previously sent message in place. A message that can no
    /// longer be edited is a non-fatal no-op.
    async fn edit_text(
        &self,
        chat: ChatRef,
        message: MessageRef,
        text: &str,
    ) -> Result<(), TransportError>;

    async fn send_photo(
        &self,
        chat: ChatRef,
        file: &Path,
        caption: &str,
    ) -> Result<(), TransportError>;

    /// Streamable video transfer.
    async fn send_video(
        &self,
        chat: ChatRef,
        file: &Path,
        caption: &str,
    ) -> Result<(), TransportError>;

    /// Retrieve the bytes of a document the user sent to the chat.
    async fn download_document(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}

/// Source-side retrieval capability.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Name of the fetcher (for logging).
    fn name(&self) -> &'static str;

    /// Issue one GET for `url` under `timeout`. `route_tag` marks
    /// sources that require the authorization marker header.
    async fn get(
        &self,
        url: &str,
        route_tag: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>, FetchError>;
}
