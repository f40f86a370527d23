//! Notification payload for a match set, and the dispatch seam.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SUBJECT: &str = "Your Matching Wedding Photos 🎉";
const HEADING: &str = "<h2>Hi! We found your matching photos 🎯</h2>";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("cannot attach {file}: {source}")]
    Attachment {
        file: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("mail transport is not configured")]
    NotConfigured,
    #[error("invalid address {address:?}: {reason}")]
    Address { address: String, reason: String },
    #[error("cannot build message: {0}")]
    Build(String),
    #[error("transport failed: {0}")]
    Transport(String),
}

/// An image attached to the message and referenced from the HTML body.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    /// Referenced as `cid:<content_id>` from the body.
    pub content_id: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A fully composed message, ready for a dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<InlineImage>,
}

/// Delivers composed payloads. No retries.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError>;
}

/// Content identifier for the match at `index`.
pub fn content_id(index: usize) -> String {
    format!("img{index}")
}

/// Builds notification payloads from the configured sender identity.
#[derive(Debug, Clone)]
pub struct NotificationComposer {
    sender: String,
}

impl NotificationComposer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Compose a message with every match inlined, or `None` for no matches.
    ///
    /// Every attachment is read in full from `gallery`; a single unreadable
    /// file aborts the whole composition.
    pub fn compose(
        &self,
        matches: &[String],
        destination: &str,
        gallery: &Path,
    ) -> Result<Option<NotificationPayload>, ComposeError> {
        if matches.is_empty() {
            tracing::info!(to = destination, "no matches; nothing to send");
            return Ok(None);
        }

        let mut html_body = String::from(HEADING);
        let mut attachments = Vec::with_capacity(matches.len());

        for (index, name) in matches.iter().enumerate() {
            let cid = content_id(index);
            html_body.push_str(&format!(
                r#"<img src="cid:{cid}" style="width:300px;margin:10px;" />"#
            ));

            let file = gallery.join(name);
            let data = std::fs::read(&file).map_err(|source| ComposeError::Attachment {
                file: file.clone(),
                source,
            })?;
            attachments.push(InlineImage {
                content_id: cid,
                file_name: name.clone(),
                content_type: sniff_content_type(&data).to_string(),
                data,
            });
        }

        tracing::debug!(
            to = destination,
            attachments = attachments.len(),
            "notification composed"
        );

        Ok(Some(NotificationPayload {
            from: self.sender.clone(),
            to: destination.to_string(),
            subject: SUBJECT.to_string(),
            html_body,
            attachments,
        }))
    }
}

fn sniff_content_type(data: &[u8]) -> &'static str {
    image::guess_format(data)
        .map(|format| format.to_mime_type())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}
