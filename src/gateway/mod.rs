pub mod evolution;

use async_trait::async_trait;

pub use evolution::EvolutionGateway;

/// Descriptor of a message the gateway accepted for delivery.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub external_id: String,
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
        }
    }
}

/// Outbound messaging seam -- implement for any WhatsApp gateway.
/// Node processors treat every failure here as log-and-continue; errors
/// never escape the processor boundary.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send plain text to a contact through the named instance.
    async fn send_text(&self, instance: &str, to: &str, text: &str)
        -> anyhow::Result<SentMessage>;

    /// Send an image or document by URL, with an optional caption.
    async fn send_media(
        &self,
        instance: &str,
        to: &str,
        kind: MediaKind,
        url: &str,
        caption: &str,
    ) -> anyhow::Result<SentMessage>;

    /// Send an option list. Implementations without native interactive
    /// messages fall back to numbered plain text.
    async fn send_interactive(
        &self,
        instance: &str,
        to: &str,
        text: &str,
        options: &[String],
    ) -> anyhow::Result<SentMessage>;
}
