// Telegram Bot API transport and update dispatch
//
// Implements the ChatTransport capability over the Bot API (JSON
// endpoints for text, multipart uploads for media, getFile for
// document intake) and runs the long-polling loop that feeds the run
// controller. Webhook serving is intentionally not supported.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::relay::{ChatRef, ChatTransport, MessageRef, RunController, TransportError};

/// Long-poll window passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;
/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    #[serde(default)]
    file_path: Option<String>,
}

/// Bot API client. Cheap to clone; the underlying connection pool is
/// shared.
#[derive(Clone)]
pub struct TelegramApi {
    client: reqwest::Client,
    base: String,
    file_base: String,
}

impl TelegramApi {
    pub fn new(token: &str) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base: format!("https://api.telegram.org/bot{}", token),
            file_base: format!("https://api.telegram.org/file/bot{}", token),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !envelope.ok {
            return Err(classify_api_error(envelope.description.as_deref()));
        }
        envelope
            .result
            .ok_or_else(|| TransportError::Api(format!("{}: empty result", method)))
    }

    async fn upload(
        &self,
        method: &str,
        field: &'static str,
        chat: ChatRef,
        file: &Path,
        caption: &str,
        streaming: bool,
    ) -> Result<(), TransportError> {
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "memory".to_string());

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat.to_string())
            .text("caption", caption.to_string())
            .part(
                field,
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        if streaming {
            form = form.text("supports_streaming", "true");
        }

        let response = self
            .client
            .post(format!("{}/{}", self.base, method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let envelope: ApiEnvelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !envelope.ok {
            return Err(classify_api_error(envelope.description.as_deref()));
        }
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

/// Map an API rejection onto the transport taxonomy. Edit failures on
/// old or unchanged messages are distinguished so callers can treat
/// them as no-ops.
fn classify_api_error(description: Option<&str>) -> TransportError {
    let description = description.unwrap_or("unknown API error");
    let lower = description.to_ascii_lowercase();
    if lower.contains("message is not modified")
        || lower.contains("message can't be edited")
        || lower.contains("message to edit not found")
    {
        return TransportError::StaleMessage;
    }
    TransportError::Api(description.to_string())
}

#[async_trait]
impl ChatTransport for TelegramApi {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send_text(&self, chat: ChatRef, text: &str) -> Result<MessageRef, TransportError> {
        let message: Message = self
            .call("sendMessage", json!({ "chat_id": chat, "text": text }))
            .await?;
        Ok(MessageRef(message.message_id))
    }

    async fn edit_text(
        &self,
        chat: ChatRef,
        message: MessageRef,
        text: &str,
    ) -> Result<(), TransportError> {
        let edited: Result<serde_json::Value, TransportError> = self
            .call(
                "editMessageText",
                json!({ "chat_id": chat, "message_id": message.0, "text": text }),
            )
            .await;
        match edited {
            Ok(_) => Ok(()),
            // Too old or unchanged: tolerated as a no-op.
            Err(TransportError::StaleMessage) => {
                log::debug!("edit of message {} skipped: stale", message.0);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn send_photo(
        &self,
        chat: ChatRef,
        file: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.upload("sendPhoto", "photo", chat, file, caption, false)
            .await
    }

    async fn send_video(
        &self,
        chat: ChatRef,
        file: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.upload("sendVideo", "video", chat, file, caption, true)
            .await
    }

    async fn download_document(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let remote: RemoteFile = self.call("getFile", json!({ "file_id": file_id })).await?;
        let file_path = remote
            .file_path
            .ok_or_else(|| TransportError::Api("getFile returned no path".to_string()))?;
        let response = self
            .client
            .get(format!("{}/{}", self.file_base, file_path))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Api(format!(
                "file download returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

const WELCOME_TEXT: &str = "\
🤖 Snapchat Memories Bot

I back up your Snapchat memories into this chat.

How to use:
1. Snapchat app → Settings → My Data
2. Request your data and download the memories HTML file
3. Send that HTML file to me
4. I fetch every memory and post it here with its date and location

⚠️ Download links expire after a few days, so use a fresh export.

Commands: /help for the full walkthrough, /status for progress,\n/stop to cancel a running transfer.";

const HELP_TEXT: &str = "\
📖 Help

Getting your Snapchat data:
1. Open Snapchat → Settings (gear icon)
2. Scroll to Privacy Controls → My Data
3. Submit a request including Memories
4. Wait for the email, then download the HTML file
5. Send that HTML file to this bot

What I do:
- Parse the export and list what it contains
- Download each memory from Snapchat
- Post it here with its date and location
- Large exports ask for confirmation before starting

Privacy: files pass through temporarily and are never stored.";

/// Long-polling dispatcher: receives updates and hands them to the
/// run controller. Each update is handled in its own task so a running
/// transfer never blocks the poll loop.
pub struct Bot {
    api: TelegramApi,
    controller: Arc<RunController>,
}

impl Bot {
    pub fn new(api: TelegramApi, controller: Arc<RunController>) -> Self {
        Self { api, controller }
    }

    pub async fn run(&self) {
        let mut offset = 0;
        loop {
            match self.api.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(message) = update.message {
                            let handler = UpdateHandler {
                                api: self.api.clone(),
                                controller: self.controller.clone(),
                            };
                            tokio::spawn(async move { handler.dispatch(message).await });
                        }
                    }
                }
                Err(err) => {
                    log::error!("getUpdates failed: {}", err);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }
}

struct UpdateHandler {
    api: TelegramApi,
    controller: Arc<RunController>,
}

impl UpdateHandler {
    async fn dispatch(&self, message: Message) {
        let chat = message.chat.id;
        if let Some(document) = message.document {
            self.handle_document(chat, document).await;
        } else if let Some(text) = message.text {
            self.handle_text(chat, &text).await;
        }
    }

    async fn handle_document(&self, chat: ChatRef, document: Document) {
        let file_name = document.file_name.unwrap_or_default();
        // Intake gate: only the export HTML reaches the extractor.
        if !is_export_filename(&file_name) {
            self.reply(
                chat,
                "❌ Please send the HTML file from your Snapchat data export.",
            )
            .await;
            return;
        }

        let bytes = match self.api.download_document(&document.file_id).await {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("chat {}: document download failed: {}", chat, err);
                self.reply(chat, "❌ I could not download that file, please try again.")
                    .await;
                return;
            }
        };
        let html = String::from_utf8_lossy(&bytes).into_owned();
        self.controller.submit_document(chat, &html).await;
    }

    async fn handle_text(&self, chat: ChatRef, text: &str) {
        match parse_command(text) {
            Some("start") => self.reply(chat, WELCOME_TEXT).await,
            Some("help") => self.reply(chat, HELP_TEXT).await,
            Some("stop") | Some("cancel") => self.controller.request_stop(chat).await,
            Some("status") => self.controller.report_status(chat).await,
            Some(other) => {
                log::debug!("chat {}: unknown command /{}", chat, other);
                self.reply(chat, "Unknown command. Try /help.").await;
            }
            None => {
                if !self.controller.handle_reply(chat, text).await {
                    self.reply(
                        chat,
                        "Send me the HTML file from your Snapchat data export. \
                         Use /help for instructions.",
                    )
                    .await;
                }
            }
        }
    }

    async fn reply(&self, chat: ChatRef, text: &str) {
        if let Err(err) = self.api.send_text(chat, text).await {
            log::warn!("chat {}: reply failed: {}", chat, err);
        }
    }
}

/// Only the memories export page is accepted for extraction.
fn is_export_filename(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".html")
}

/// Command name without the leading slash and any @bot suffix; None
/// for plain text.
fn parse_command(text: &str) -> Option<&str> {
    let first = text.trim().split_whitespace().next()?;
    let command = first.strip_prefix('/')?;
    Some(command.split('@').next().unwrap_or(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_filename_gate() {
        assert!(is_export_filename("memories_history.html"));
        assert!(is_export_filename("EXPORT.HTML"));
        assert!(!is_export_filename("memories.json"));
        assert!(!is_export_filename("archive.zip"));
        assert!(!is_export_filename(""));
    }

    #[test]
    fn test_parse_command_variants() {
        assert_eq!(parse_command("/start"), Some("start"));
        assert_eq!(parse_command("  /stop  "), Some("stop"));
        assert_eq!(parse_command("/status@snaprelay_bot"), Some("status"));
        assert_eq!(parse_command("/help extra words"), Some("help"));
        assert_eq!(parse_command("yes"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_stale_edit_errors_are_distinguished() {
        assert!(matches!(
            classify_api_error(Some("Bad Request: message is not modified")),
            TransportError::StaleMessage
        ));
        assert!(matches!(
            classify_api_error(Some("Bad Request: message can't be edited")),
            TransportError::StaleMessage
        ));
        assert!(matches!(
            classify_api_error(Some("Too Many Requests: retry after 5")),
            TransportError::Api(_)
        ));
        assert!(matches!(classify_api_error(None), TransportError::Api(_)));
    }

    #[test]
    fn test_update_deserialization() {
        let raw = r#"{
            "update_id": 7,
            "message": {
                "message_id": 42,
                "chat": {"id": 99},
                "document": {"file_id": "abc", "file_name": "memories_history.html"}
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        assert_eq!(update.update_id, 7);
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 99);
        assert_eq!(
            message.document.unwrap().file_name.as_deref(),
            Some("memories_history.html")
        );
        assert!(message.text.is_none());
    }
}
