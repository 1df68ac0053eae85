use super::condition;
use super::context::RunContext;
use super::engine::{pick_binary_edge, pick_indexed_edge, FlowEngine};
use super::triggers;
use super::types::{FlowGraph, FlowNode, MediaConfig, NodeConfig};
use super::vars::substitute;
use crate::gateway::MediaKind;
use crate::store::NewMessage;
use chrono::{Local, Utc};
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Control information a node processor hands back to the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Advance along the node's first outgoing edge.
    Continue,
    /// Branching node committed to a specific target.
    Branch(String),
    /// Stop the walk (terminal node, suspend-for-input, failed gate).
    Halt,
}

// ── Validator patterns ──────────────────────────────────────────

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"))
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?\d{10,15}$").expect("phone regex"))
}

fn cpf_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{11}$").expect("cpf regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").expect("number regex"))
}

/// Validate an input value for the validator node. Unknown types have no
/// pattern and always pass; cpf/number are normalized to digits first.
pub fn validate_input(validation_type: &str, value: &str) -> bool {
    match validation_type {
        "email" => email_re().is_match(value.trim()),
        "phone" => phone_re().is_match(value.trim()),
        "cpf" => {
            let digits: String = value.chars().filter(char::is_ascii_digit).collect();
            cpf_re().is_match(&digits)
        }
        "number" => {
            let digits: String = value.chars().filter(char::is_ascii_digit).collect();
            number_re().is_match(&digits)
        }
        _ => true,
    }
}

// ── Node processors ─────────────────────────────────────────────

impl FlowEngine {
    /// Dispatch one node. Every effect failure is logged and swallowed
    /// here -- the walk proceeds as if the effect succeeded, and the only
    /// externally visible symptom is a missing message.
    pub(crate) async fn process_node(
        &self,
        node: &FlowNode,
        graph: &FlowGraph,
        ctx: &mut RunContext,
    ) -> StepOutcome {
        match &node.config {
            // Entry marker; the walker starts past it, but a stray
            // mid-graph trigger just passes through.
            NodeConfig::Trigger(_) => StepOutcome::Continue,

            NodeConfig::Message(cfg) => {
                if matches!(cfg.message_type.as_str(), "image" | "document") {
                    let media = MediaConfig {
                        media_type: cfg.message_type.clone(),
                        url: cfg.media_url.clone(),
                        caption: if cfg.caption.is_empty() {
                            cfg.text.clone()
                        } else {
                            cfg.caption.clone()
                        },
                    };
                    self.send_media_effect(&media, ctx).await;
                } else {
                    let text = substitute(&cfg.text, &ctx.variables);
                    self.send_text_effect(&text, ctx).await;
                }
                StepOutcome::Continue
            }

            NodeConfig::Delay(cfg) => {
                // Suspends only this run; concurrent runs are unaffected.
                tokio::time::sleep(Duration::from_secs(cfg.seconds)).await;
                StepOutcome::Continue
            }

            NodeConfig::Condition(cfg) => {
                let truthy = condition::evaluate(&cfg.rule, &ctx.variables);
                match pick_binary_edge(graph, &node.id, truthy) {
                    Some(target) => StepOutcome::Branch(target),
                    None => {
                        tracing::debug!(node = %node.id, truthy, "condition branch has no edge");
                        StepOutcome::Halt
                    }
                }
            }

            NodeConfig::Input(cfg) => {
                let question = substitute(&cfg.question, &ctx.variables);
                self.send_text_effect(&question, ctx).await;
                if let Err(e) =
                    self.store
                        .set_pending_input(ctx.user_id, ctx.contact_id, &cfg.variable)
                {
                    tracing::warn!(node = %node.id, error = %e, "failed to persist pending input");
                }
                StepOutcome::Halt
            }

            NodeConfig::SetVariable(cfg) => {
                let value = substitute(&cfg.value, &ctx.variables);
                ctx.set_var(cfg.name.clone(), value);
                StepOutcome::Continue
            }

            NodeConfig::Action(cfg) => {
                if cfg.action == "add_tag" {
                    // Tag persistence is an external concern.
                    tracing::info!(contact = ctx.contact_id, tag = %cfg.tag, "add_tag action");
                } else {
                    tracing::debug!(action = %cfg.action, "unsupported action, skipping");
                }
                StepOutcome::Continue
            }

            NodeConfig::Handoff(cfg) => {
                let text = substitute(&cfg.message, &ctx.variables);
                self.send_text_effect(&text, ctx).await;
                tracing::info!(contact = ctx.contact_id, "conversation handed off to a human");
                StepOutcome::Halt
            }

            NodeConfig::AiAgent(cfg) => {
                self.ai_agent_effect(cfg, ctx).await;
                StepOutcome::Continue
            }

            NodeConfig::Api(cfg) => {
                self.api_effect(cfg, ctx).await;
                StepOutcome::Continue
            }

            NodeConfig::Validator(cfg) => {
                let input = ctx.var("last_input").unwrap_or("");
                if validate_input(&cfg.validation_type, input) {
                    StepOutcome::Continue
                } else {
                    let text = substitute(&cfg.error_message, &ctx.variables);
                    self.send_text_effect(&text, ctx).await;
                    StepOutcome::Halt
                }
            }

            NodeConfig::AbSplit(cfg) => {
                let draw: f64 = rand::rng().random_range(0.0..100.0);
                let idx = if draw < cfg.percentage { 0 } else { 1 };
                match pick_indexed_edge(graph, &node.id, idx) {
                    Some(target) => StepOutcome::Branch(target),
                    None => {
                        tracing::debug!(node = %node.id, idx, "ab_split variant has no edge");
                        StepOutcome::Halt
                    }
                }
            }

            NodeConfig::Switch(cfg) => {
                let var_name = if cfg.variable.is_empty() {
                    "last_input"
                } else {
                    cfg.variable.as_str()
                };
                let value = ctx.var(var_name).unwrap_or("").to_lowercase();
                let hit = cfg
                    .cases
                    .iter()
                    .position(|case| value.contains(&case.trim().to_lowercase()));
                // A trailing edge beyond the case count is the default.
                let idx = hit.unwrap_or(cfg.cases.len());
                match pick_indexed_edge(graph, &node.id, idx) {
                    Some(target) => StepOutcome::Branch(target),
                    None => {
                        tracing::debug!(node = %node.id, "switch has no matching or default edge");
                        StepOutcome::Halt
                    }
                }
            }

            NodeConfig::Schedule(cfg) => {
                let now = Local::now().naive_local();
                let today = triggers::weekday_abbrev(now);
                let minute = triggers::minute_of_day(now);
                if triggers::schedule_gate_allows(&cfg.days, &cfg.time, today, minute) {
                    StepOutcome::Continue
                } else {
                    tracing::debug!(node = %node.id, "schedule gate closed, halting");
                    StepOutcome::Halt
                }
            }

            NodeConfig::Media(cfg) => {
                self.send_media_effect(cfg, ctx).await;
                StepOutcome::Continue
            }

            NodeConfig::Interactive(cfg) => {
                let text = substitute(&cfg.text, &ctx.variables);
                match self
                    .gateway
                    .send_interactive(&ctx.instance, &ctx.remote_jid, &text, &cfg.options)
                    .await
                {
                    Ok(sent) => self.record_sent(ctx, &sent.external_id, &sent.kind, &text, None),
                    Err(e) => {
                        tracing::warn!(node = %node.id, error = %e, "interactive send failed")
                    }
                }
                StepOutcome::Continue
            }

            NodeConfig::End => StepOutcome::Halt,

            NodeConfig::Note => StepOutcome::Continue,

            NodeConfig::Unknown(kind) => {
                tracing::warn!(node = %node.id, kind = %kind, "unknown node kind, skipping");
                StepOutcome::Continue
            }
        }
    }

    // ── Effects ──────────────────────────────────────────────────

    async fn send_text_effect(&self, text: &str, ctx: &RunContext) {
        match self
            .gateway
            .send_text(&ctx.instance, &ctx.remote_jid, text)
            .await
        {
            Ok(sent) => self.record_sent(ctx, &sent.external_id, "text", text, None),
            Err(e) => tracing::warn!(contact = ctx.contact_id, error = %e, "text send failed"),
        }
    }

    async fn send_media_effect(&self, cfg: &MediaConfig, ctx: &RunContext) {
        let kind = match cfg.media_type.as_str() {
            "image" => MediaKind::Image,
            "document" => MediaKind::Document,
            other => {
                tracing::debug!(media_type = %other, "unsupported media type, skipping");
                return;
            }
        };
        let url = substitute(&cfg.url, &ctx.variables);
        let caption = substitute(&cfg.caption, &ctx.variables);
        match self
            .gateway
            .send_media(&ctx.instance, &ctx.remote_jid, kind, &url, &caption)
            .await
        {
            Ok(sent) => {
                self.record_sent(ctx, &sent.external_id, kind.as_str(), &caption, Some(&url))
            }
            Err(e) => tracing::warn!(contact = ctx.contact_id, error = %e, "media send failed"),
        }
    }

    async fn ai_agent_effect(&self, cfg: &super::types::AiAgentConfig, ctx: &mut RunContext) {
        let key = match self.store.get_setting(ctx.user_id, "ai_api_key") {
            Ok(Some(key)) => key,
            Ok(None) => {
                tracing::info!(user = ctx.user_id, "no AI key configured, ai_agent is a no-op");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "AI key lookup failed");
                return;
            }
        };
        let model = if !cfg.model.is_empty() {
            cfg.model.clone()
        } else {
            self.store
                .get_setting(ctx.user_id, "ai_model")
                .ok()
                .flatten()
                .unwrap_or_else(|| "gpt-4o-mini".to_string())
        };
        let prompt = format!(
            "{}\n\n{}",
            substitute(&cfg.prompt, &ctx.variables),
            ctx.var("last_input").unwrap_or("")
        );
        match self.ai.generate(&key, &prompt, &model).await {
            Ok(reply) => {
                self.send_text_effect(&reply, ctx).await;
                ctx.set_var("ai_response", reply);
            }
            Err(e) => tracing::warn!(error = %e, "AI generation failed"),
        }
    }

    async fn api_effect(&self, cfg: &super::types::ApiConfig, ctx: &mut RunContext) {
        let url = substitute(&cfg.url, &ctx.variables);
        let method = cfg.method.to_uppercase();
        let mut request = match method.as_str() {
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "PATCH" => self.http.patch(&url),
            "DELETE" => self.http.delete(&url),
            _ => self.http.get(&url),
        };
        if matches!(method.as_str(), "POST" | "PUT" | "PATCH") && !cfg.body.is_empty() {
            let body = substitute(&cfg.body, &ctx.variables);
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => request = request.json(&json),
                Err(e) => tracing::debug!(error = %e, "api node body is not JSON, sending none"),
            }
        }
        match request.send().await {
            Ok(resp) => {
                let text = resp.text().await.unwrap_or_default();
                ctx.set_var("api_response", text);
            }
            Err(e) => tracing::warn!(url = %url, error = %e, "api node call failed"),
        }
    }

    /// Record an outbound message with provenance "flow".
    fn record_sent(
        &self,
        ctx: &RunContext,
        external_id: &str,
        kind: &str,
        content: &str,
        media_url: Option<&str>,
    ) {
        let msg = NewMessage {
            user_id: ctx.user_id,
            contact_id: ctx.contact_id,
            external_id: external_id.to_string(),
            direction: "out".into(),
            kind: kind.into(),
            content: content.to_string(),
            media_url: media_url.map(str::to_string),
            timestamp: Utc::now().to_rfc3339(),
            status: "sent".into(),
            origin: "flow".into(),
        };
        if let Err(e) = self.store.insert_message(&msg) {
            tracing::warn!(contact = ctx.contact_id, error = %e, "failed to record sent message");
        }
    }
}
