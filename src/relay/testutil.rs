// Scripted collaborator fakes for pipeline tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::{FetchError, TransportError};
use super::traits::{ChatRef, ChatTransport, MediaFetcher, MessageRef};

/// What a [`FakeFetcher`] answers every GET with.
#[derive(Debug, Clone)]
enum FetchScript {
    Bytes(Vec<u8>),
    Status(u16),
}

/// Source fake: serves a fixed script, counts calls, and can run a
/// hook inside each call (e.g. to request a stop mid-run).
pub struct FakeFetcher {
    script: FetchScript,
    calls: AtomicUsize,
    pub route_tags: Mutex<Vec<bool>>,
    delay: Option<Duration>,
    on_get: Option<Box<dyn Fn(usize) + Send + Sync>>,
}

impl FakeFetcher {
    pub fn serving(bytes: &[u8]) -> Self {
        Self::with_script(FetchScript::Bytes(bytes.to_vec()))
    }

    pub fn failing_with_status(code: u16) -> Self {
        Self::with_script(FetchScript::Status(code))
    }

    fn with_script(script: FetchScript) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            route_tags: Mutex::new(Vec::new()),
            delay: None,
            on_get: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_on_get(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_get = Some(Box::new(hook));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn get(
        &self,
        _url: &str,
        route_tag: bool,
        _timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.route_tags.lock().unwrap().push(route_tag);
        if let Some(hook) = &self.on_get {
            hook(call);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            FetchScript::Bytes(bytes) => Ok(bytes.clone()),
            FetchScript::Status(code) => Err(FetchError::Status(*code)),
        }
    }
}

/// Everything a [`FakeTransport`] delivered, in order.
#[derive(Debug, Clone)]
pub enum Sent {
    Text(String),
    Edit(i64, String),
    Photo(PathBuf, String),
    Video(PathBuf, String),
}

/// Destination fake that records deliveries.
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<Sent>>,
    next_message_id: AtomicI64,
    media_failure: Option<String>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose photo/video sends always fail.
    pub fn rejecting_media(reason: &str) -> Self {
        Self {
            media_failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts().last().cloned()
    }

    /// (photos, videos) delivered so far.
    pub fn media_counts(&self) -> (usize, usize) {
        let sent = self.sent.lock().unwrap();
        let photos = sent.iter().filter(|s| matches!(s, Sent::Photo(..))).count();
        let videos = sent.iter().filter(|s| matches!(s, Sent::Video(..))).count();
        (photos, videos)
    }

    fn media_result(&self) -> Result<(), TransportError> {
        match &self.media_failure {
            Some(reason) => Err(TransportError::Api(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn send_text(&self, _chat: ChatRef, text: &str) -> Result<MessageRef, TransportError> {
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(MessageRef(self.next_message_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn edit_text(
        &self,
        _chat: ChatRef,
        message: MessageRef,
        text: &str,
    ) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Edit(message.0, text.to_string()));
        Ok(())
    }

    async fn send_photo(
        &self,
        _chat: ChatRef,
        file: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Photo(file.to_path_buf(), caption.to_string()));
        self.media_result()
    }

    async fn send_video(
        &self,
        _chat: ChatRef,
        file: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Video(file.to_path_buf(), caption.to_string()));
        self.media_result()
    }

    async fn download_document(&self, _file_id: &str) -> Result<Vec<u8>, TransportError> {
        Ok(Vec::new())
    }
}

/// Build an export document with one row per (media kind, route flag)
/// pair, dated sequentially.
pub fn memories_document(rows: &[(&str, bool)]) -> String {
    let mut body = String::from(
        "<html><body><table>\
         <tr><th>Date</th><th>Media Type</th><th>Location</th><th>Download</th></tr>",
    );
    for (index, (kind, route)) in rows.iter().enumerate() {
        let args = if *route { ", true" } else { "" };
        body.push_str(&format!(
            "<tr><td>2021-03-{:02} 10:00:00 UTC</td><td>{}</td><td></td>\
             <td><a href=\"#\" onclick=\"downloadMemories('https://source.test/m/{}'{})\">\
             Download</a></td></tr>",
            (index % 27) + 1,
            kind,
            index,
            args
        ));
    }
    body.push_str("</table></body></html>");
    body
}
