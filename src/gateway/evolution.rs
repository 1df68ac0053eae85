use super::{MediaKind, MessagingGateway, SentMessage};
use async_trait::async_trait;
use uuid::Uuid;

/// Evolution API client -- posts to the gateway's per-instance send
/// endpoints with the global `apikey` header.
pub struct EvolutionGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl EvolutionGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn api_url(&self, endpoint: &str, instance: &str) -> String {
        format!("{}/message/{endpoint}/{instance}", self.base_url)
    }

    async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Evolution API {status}: {err}");
        }
        Ok(resp.json().await?)
    }

    /// The gateway echoes the WhatsApp message key; fall back to a local
    /// id when the response shape changes between versions.
    fn external_id(data: &serde_json::Value) -> String {
        data["key"]["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl MessagingGateway for EvolutionGateway {
    async fn send_text(
        &self,
        instance: &str,
        to: &str,
        text: &str,
    ) -> anyhow::Result<SentMessage> {
        let url = self.api_url("sendText", instance);
        let body = serde_json::json!({ "number": to, "text": text });
        let data = self.post(&url, body).await?;
        tracing::debug!(instance, to, "text sent via Evolution API");
        Ok(SentMessage {
            external_id: Self::external_id(&data),
            kind: "text".into(),
        })
    }

    async fn send_media(
        &self,
        instance: &str,
        to: &str,
        kind: MediaKind,
        url: &str,
        caption: &str,
    ) -> anyhow::Result<SentMessage> {
        let endpoint = self.api_url("sendMedia", instance);
        let body = serde_json::json!({
            "number": to,
            "mediatype": kind.as_str(),
            "media": url,
            "caption": caption,
        });
        let data = self.post(&endpoint, body).await?;
        tracing::debug!(instance, to, kind = kind.as_str(), "media sent via Evolution API");
        Ok(SentMessage {
            external_id: Self::external_id(&data),
            kind: kind.as_str().into(),
        })
    }

    async fn send_interactive(
        &self,
        instance: &str,
        to: &str,
        text: &str,
        options: &[String],
    ) -> anyhow::Result<SentMessage> {
        // Interactive list support varies across gateway versions; the
        // numbered-text form is universally deliverable.
        let body = render_numbered_options(text, options);
        self.send_text(instance, to, &body).await
    }
}

/// Plain-text fallback for interactive messages: the prompt followed by
/// numbered options.
pub fn render_numbered_options(text: &str, options: &[String]) -> String {
    let mut out = text.to_string();
    for (i, option) in options.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, option));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_shape() {
        let gw = EvolutionGateway::new("https://evo.example.com/".into(), "key".into());
        assert_eq!(
            gw.api_url("sendText", "shop1"),
            "https://evo.example.com/message/sendText/shop1"
        );
    }

    #[test]
    fn external_id_from_key_or_fallback() {
        let data = serde_json::json!({"key": {"id": "WAMID1"}});
        assert_eq!(EvolutionGateway::external_id(&data), "WAMID1");

        let data = serde_json::json!({"status": "ok"});
        let id = EvolutionGateway::external_id(&data);
        assert!(!id.is_empty());
    }

    #[test]
    fn numbered_options_rendering() {
        let out = render_numbered_options(
            "Escolha:",
            &["Suporte".to_string(), "Vendas".to_string()],
        );
        assert_eq!(out, "Escolha:\n1. Suporte\n2. Vendas");
    }

    #[test]
    fn numbered_options_empty_list() {
        assert_eq!(render_numbered_options("Oi", &[]), "Oi");
    }
}
