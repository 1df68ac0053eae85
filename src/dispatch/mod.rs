pub mod chatbot;
pub mod webhook;

use crate::flows::context::RunContext;
use crate::flows::engine::FlowEngine;
use crate::flows::{cooldown, triggers};
use crate::gateway::MessagingGateway;
use crate::store::{NewMessage, Store};
use chrono::{Local, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// A normalized inbound message event from the gateway webhook.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub instance: String,
    pub remote_jid: String,
    pub external_id: String,
    pub from_me: bool,
    pub text: String,
    pub push_name: String,
    pub kind: String,
    pub timestamp: String,
}

/// Orchestrates one inbound message: tenant resolution, persistence,
/// keyword chatbots, then trigger matching and the graph walk.
pub struct Dispatcher {
    store: Arc<Store>,
    gateway: Arc<dyn MessagingGateway>,
    engine: Arc<FlowEngine>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn MessagingGateway>,
        engine: Arc<FlowEngine>,
    ) -> Self {
        Self {
            store,
            gateway,
            engine,
        }
    }

    /// Normalize a raw gateway webhook payload. Returns `None` for
    /// anything that is not a `messages.upsert` with a usable body.
    pub fn normalize(payload: &Value) -> Option<InboundEvent> {
        let event = payload["event"].as_str()?;
        if !event.eq_ignore_ascii_case("messages.upsert") {
            return None;
        }
        let instance = payload["instance"].as_str()?.to_string();
        let data = &payload["data"];
        let key = &data["key"];
        let remote_jid = key["remoteJid"].as_str()?.to_string();
        let from_me = key["fromMe"].as_bool().unwrap_or(false);
        let external_id = key["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let message = &data["message"];
        let (text, kind) = if let Some(text) = message["conversation"].as_str() {
            (text.to_string(), "text")
        } else if let Some(text) = message["extendedTextMessage"]["text"].as_str() {
            (text.to_string(), "text")
        } else if message.get("imageMessage").is_some() {
            (
                message["imageMessage"]["caption"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                "image",
            )
        } else {
            return None;
        };

        let timestamp = match &data["messageTimestamp"] {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => Utc::now().timestamp().to_string(),
        };

        Some(InboundEvent {
            instance,
            remote_jid,
            external_id,
            from_me,
            text,
            push_name: data["pushName"].as_str().unwrap_or_default().to_string(),
            kind: kind.to_string(),
            timestamp,
        })
    }

    /// Process one inbound event end to end. Failures are logged and
    /// swallowed by the webhook layer; this never surfaces an error to
    /// the gateway.
    pub async fn handle_event(&self, evt: InboundEvent) -> anyhow::Result<()> {
        if evt.from_me {
            return Ok(());
        }
        if evt.remote_jid.ends_with("@broadcast") || evt.remote_jid.ends_with("@g.us") {
            return Ok(());
        }

        let Some(user_id) = self.store.resolve_instance_owner(&evt.instance)? else {
            tracing::debug!(instance = %evt.instance, "no tenant for instance, dropping");
            return Ok(());
        };

        let contact = self
            .store
            .upsert_contact(user_id, &evt.remote_jid, &evt.push_name)?;
        if contact.blocked {
            tracing::debug!(contact = contact.id, "blocked contact, dropping");
            return Ok(());
        }

        // Persist before evaluation so flow replies always order after
        // the inbound message they respond to.
        self.store.insert_message(&NewMessage {
            user_id,
            contact_id: contact.id,
            external_id: evt.external_id.clone(),
            direction: "in".into(),
            kind: evt.kind.clone(),
            content: evt.text.clone(),
            media_url: None,
            timestamp: evt.timestamp.clone(),
            status: "received".into(),
            origin: "user".into(),
        })?;

        // A pending input marker is consumed exactly once: the awaited
        // variable is filled from this message and seeded into whatever
        // run this same message triggers.
        let pending = match self.store.take_pending_input(user_id, contact.id) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(contact = contact.id, error = %e, "pending input lookup failed");
                None
            }
        };

        let fired = chatbot::run_chatbots(
            &self.store,
            self.gateway.as_ref(),
            user_id,
            &evt.instance,
            &contact,
            &evt.text,
        )
        .await;
        if fired {
            tracing::debug!(contact = contact.id, "chatbot replied, skipping flows");
            return Ok(());
        }

        let flows = self.store.list_active_flows(user_id)?;
        let Some(matched) =
            triggers::match_flows(&flows, &evt.text, &evt.instance, Local::now().naive_local())
        else {
            return Ok(());
        };

        let now = Utc::now();
        if !cooldown::allow(
            &self.store,
            matched.flow.id,
            contact.id,
            matched.cooldown_hours,
            now,
        ) {
            tracing::debug!(flow = matched.flow.id, contact = contact.id, "flow in cooldown");
            return Ok(());
        }
        cooldown::record_trigger(&self.store, matched.flow.id, contact.id, now);

        let phone = evt.remote_jid.split('@').next().unwrap_or_default();
        let mut ctx = RunContext::new(user_id, &evt.instance, &evt.remote_jid, contact.id)
            .seed(phone, &contact.name, &evt.text);
        if let Some(variable) = pending {
            ctx.set_var(variable, evt.text.clone());
        }

        let summary = self.engine.run(matched.flow.id, &matched.graph, &mut ctx).await;
        tracing::info!(
            flow = matched.flow.id,
            contact = contact.id,
            steps = summary.steps,
            reason = ?summary.reason,
            "flow run finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_conversation_message() {
        let payload = json!({
            "event": "messages.upsert",
            "instance": "shop1",
            "data": {
                "key": {"remoteJid": "5511999@s.whatsapp.net", "fromMe": false, "id": "MSG1"},
                "message": {"conversation": "quero suporte"},
                "pushName": "Maria",
                "messageTimestamp": 1756400000
            }
        });
        let evt = Dispatcher::normalize(&payload).unwrap();
        assert_eq!(evt.instance, "shop1");
        assert_eq!(evt.remote_jid, "5511999@s.whatsapp.net");
        assert_eq!(evt.text, "quero suporte");
        assert_eq!(evt.kind, "text");
        assert_eq!(evt.push_name, "Maria");
        assert!(!evt.from_me);
    }

    #[test]
    fn normalize_extended_text_and_image() {
        let payload = json!({
            "event": "messages.upsert",
            "instance": "shop1",
            "data": {
                "key": {"remoteJid": "jid", "fromMe": false, "id": "M2"},
                "message": {"extendedTextMessage": {"text": "olá"}}
            }
        });
        assert_eq!(Dispatcher::normalize(&payload).unwrap().text, "olá");

        let payload = json!({
            "event": "messages.upsert",
            "instance": "shop1",
            "data": {
                "key": {"remoteJid": "jid", "fromMe": false, "id": "M3"},
                "message": {"imageMessage": {"caption": "foto"}}
            }
        });
        let evt = Dispatcher::normalize(&payload).unwrap();
        assert_eq!(evt.kind, "image");
        assert_eq!(evt.text, "foto");
    }

    #[test]
    fn normalize_rejects_other_events() {
        let payload = json!({"event": "connection.update", "instance": "shop1", "data": {}});
        assert!(Dispatcher::normalize(&payload).is_none());

        let payload = json!({"event": "messages.upsert", "instance": "shop1", "data": {
            "key": {"remoteJid": "jid", "id": "M4"},
            "message": {"stickerMessage": {}}
        }});
        assert!(Dispatcher::normalize(&payload).is_none());
    }

    #[test]
    fn normalize_missing_external_id_gets_one() {
        let payload = json!({
            "event": "messages.upsert",
            "instance": "shop1",
            "data": {
                "key": {"remoteJid": "jid"},
                "message": {"conversation": "oi"}
            }
        });
        let evt = Dispatcher::normalize(&payload).unwrap();
        assert!(!evt.external_id.is_empty());
    }
}
