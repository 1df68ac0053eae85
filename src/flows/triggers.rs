use super::types::FlowGraph;
use crate::store::FlowRow;
use chrono::{Datelike, NaiveDateTime, Timelike};

/// Weekday abbreviations, Sunday-first, as the editor stores them.
pub const WEEKDAYS: [&str; 7] = ["dom", "seg", "ter", "qua", "qui", "sex", "sab"];

pub fn weekday_abbrev(now: NaiveDateTime) -> &'static str {
    WEEKDAYS[now.weekday().num_days_from_sunday() as usize]
}

pub fn minute_of_day(now: NaiveDateTime) -> u32 {
    now.hour() * 60 + now.minute()
}

/// Parse "HH:MM" into minute-of-day. Malformed input yields `None` and
/// the caller treats the window as unset.
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let (h, m) = value.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Flow-level schedule window: allowed-days list plus an inclusive
/// start/end time-of-day range.
pub fn window_allows(
    days_csv: &str,
    start: Option<&str>,
    end: Option<&str>,
    today: &str,
    minute: u32,
) -> bool {
    let days: Vec<&str> = days_csv
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    if !days.is_empty() && !days.iter().any(|d| d.eq_ignore_ascii_case(today)) {
        return false;
    }
    if let (Some(start), Some(end)) = (
        start.and_then(parse_hhmm),
        end.and_then(parse_hhmm),
    ) {
        if minute < start || minute > end {
            return false;
        }
    }
    true
}

/// Schedule *node* gate: a day list plus a single target time with an
/// inclusive ±30-minute tolerance (09:00 configured: 09:30 passes,
/// 09:31 fails).
pub fn schedule_gate_allows(days: &[String], time: &str, today: &str, minute: u32) -> bool {
    if !days.is_empty() && !days.iter().any(|d| d.trim().eq_ignore_ascii_case(today)) {
        return false;
    }
    if let Some(target) = parse_hhmm(time) {
        let diff = minute.abs_diff(target);
        if diff > 30 {
            return false;
        }
    }
    true
}

// ── Keyword matching ────────────────────────────────────────────

fn keyword_hits(message: &str, keyword: &str, style: &str) -> bool {
    match style {
        "starts" => message.starts_with(keyword),
        "ends" => message.ends_with(keyword),
        "exact" => message == keyword,
        // `contains` is the editor default.
        _ => message.contains(keyword),
    }
}

// ── Flow matching ───────────────────────────────────────────────

/// A matched flow ready to run.
pub struct TriggerMatch {
    pub flow: FlowRow,
    pub graph: FlowGraph,
    pub trigger_node_id: String,
    /// Effective cooldown: forced to zero for keyword hits so repeated
    /// intentional interactions are never throttled.
    pub cooldown_hours: i64,
}

/// Scan a tenant's active flows in input order and return the first whose
/// trigger conditions hold for this message, or `None`. A flow with
/// malformed content is skipped, never a fault.
pub fn match_flows(
    flows: &[FlowRow],
    message: &str,
    instance: &str,
    now: NaiveDateTime,
) -> Option<TriggerMatch> {
    let today = weekday_abbrev(now);
    let minute = minute_of_day(now);
    let message_lower = message.to_lowercase();

    for flow in flows {
        if let Some(ref scope) = flow.instance {
            if !scope.is_empty() && scope != instance {
                continue;
            }
        }

        if flow.schedule_enabled
            && !window_allows(
                &flow.schedule_days,
                flow.schedule_start.as_deref(),
                flow.schedule_end.as_deref(),
                today,
                minute,
            )
        {
            continue;
        }

        let graph = match super::parse_content(&flow.content) {
            Ok(graph) => graph,
            Err(errors) => {
                tracing::debug!(
                    flow = flow.id,
                    errors = errors.len(),
                    "skipping flow with malformed content"
                );
                continue;
            }
        };

        let trigger_node_id = graph.trigger_node_id.clone();
        let trigger = match &graph.node(&trigger_node_id).map(|n| &n.config) {
            Some(super::types::NodeConfig::Trigger(cfg)) => cfg.clone(),
            _ => continue,
        };

        match trigger.trigger_type.as_str() {
            "all" => {
                return Some(TriggerMatch {
                    cooldown_hours: flow.cooldown_hours,
                    flow: flow.clone(),
                    graph,
                    trigger_node_id,
                });
            }
            "keyword" => {
                let style = if trigger.match_type.is_empty() {
                    "contains"
                } else {
                    trigger.match_type.as_str()
                };
                let hit = trigger
                    .keyword
                    .split(',')
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .any(|k| keyword_hits(&message_lower, &k, style));
                if hit {
                    return Some(TriggerMatch {
                        cooldown_hours: 0,
                        flow: flow.clone(),
                        graph,
                        trigger_node_id,
                    });
                }
            }
            _ => {}
        }
    }
    None
}
