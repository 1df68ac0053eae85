use crate::gateway::MessagingGateway;
use crate::store::{ChatbotRuleRow, ContactRow, NewMessage, Store};
use chrono::Utc;
use std::time::Duration;

/// Does a rule match the (lowercased) inbound text?
pub fn rule_matches(text_lower: &str, rule: &ChatbotRuleRow) -> bool {
    if rule.match_type == "any" {
        return true;
    }
    let keyword = rule.keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    match rule.match_type.as_str() {
        "starts" => text_lower.starts_with(&keyword),
        "ends" => text_lower.ends_with(&keyword),
        _ => text_lower.contains(&keyword),
    }
}

/// Evaluate the tenant's keyword chatbots against one inbound message.
///
/// Bots are scanned in creation order, rules in position order; the first
/// matching rule of the first matching bot replies, and at most one reply
/// is sent per inbound message. Returns whether a rule fired (which
/// short-circuits flow execution for this message).
pub async fn run_chatbots(
    store: &Store,
    gateway: &dyn MessagingGateway,
    user_id: i64,
    instance: &str,
    contact: &ContactRow,
    text: &str,
) -> bool {
    let bots = match store.list_active_chatbots(user_id, instance) {
        Ok(bots) => bots,
        Err(e) => {
            tracing::warn!(user = user_id, error = %e, "chatbot lookup failed");
            return false;
        }
    };
    let text_lower = text.to_lowercase();

    for bot in bots {
        let rules = match store.list_chatbot_rules(bot.id) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(bot = bot.id, error = %e, "chatbot rule lookup failed");
                continue;
            }
        };
        for rule in rules {
            if !rule_matches(&text_lower, &rule) {
                continue;
            }
            if rule.delay_secs > 0 {
                tokio::time::sleep(Duration::from_secs(rule.delay_secs as u64)).await;
            }
            match gateway
                .send_text(instance, &contact.remote_jid, &rule.response)
                .await
            {
                Ok(sent) => {
                    let msg = NewMessage {
                        user_id,
                        contact_id: contact.id,
                        external_id: sent.external_id,
                        direction: "out".into(),
                        kind: "text".into(),
                        content: rule.response.clone(),
                        media_url: None,
                        timestamp: Utc::now().to_rfc3339(),
                        status: "sent".into(),
                        origin: "chatbot".into(),
                    };
                    if let Err(e) = store.insert_message(&msg) {
                        tracing::warn!(error = %e, "failed to record chatbot reply");
                    }
                }
                Err(e) => {
                    tracing::warn!(bot = bot.id, rule = rule.id, error = %e, "chatbot send failed")
                }
            }
            return true;
        }
    }
    false
}
