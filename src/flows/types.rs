use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

// ── Editor-shaped raw types ─────────────────────────────────────
//
// Flow content is stored the way the visual editor emits it: a JSON object
// (sometimes string-wrapped) with `nodes` and `edges` arrays. Node `data`
// stays an untyped blob here and is normalized into `NodeConfig` at the
// load boundary.

#[derive(Debug, Clone, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub edges: Vec<RawEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEdge {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, rename = "sourceHandle")]
    pub source_handle: Option<String>,
}

// ── Validated runtime types ─────────────────────────────────────

/// A directed arc between two nodes. `source_handle` carries the branch
/// role ("true"/"false", a switch-case index) when the editor set one;
/// otherwise edge position decides.
#[derive(Debug, Clone)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub source_handle: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FlowNode {
    pub id: String,
    pub config: NodeConfig,
}

/// A validated flow graph: unique node ids, edges referencing existing
/// nodes, exactly one trigger node. Edge order is the stored order.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub nodes: HashMap<String, FlowNode>,
    pub edges: Vec<Edge>,
    pub trigger_node_id: String,
}

impl FlowGraph {
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    /// Outgoing edges of a node, in stored order.
    pub fn edges_from(&self, source: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == source).collect()
    }
}

// ── Per-kind node configuration ─────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TriggerConfig {
    pub trigger_type: String,
    pub keyword: String,
    pub match_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageConfig {
    pub text: String,
    pub message_type: String,
    pub media_url: String,
    pub caption: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelayConfig {
    pub seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionConfig {
    pub rule: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputConfig {
    pub question: String,
    pub variable: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetVariableConfig {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionConfig {
    pub action: String,
    pub tag: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HandoffConfig {
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AiAgentConfig {
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    pub url: String,
    pub method: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidatorConfig {
    pub validation_type: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AbSplitConfig {
    pub percentage: f64,
}

impl Default for AbSplitConfig {
    fn default() -> Self {
        Self { percentage: 50.0 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SwitchConfig {
    pub variable: String,
    pub cases: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub days: Vec<String>,
    pub time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaConfig {
    pub media_type: String,
    pub url: String,
    pub caption: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InteractiveConfig {
    pub text: String,
    pub options: Vec<String>,
}

/// Closed set of node kinds. The processor match over this enum is
/// exhaustive, so adding a kind without a processor fails to compile.
#[derive(Debug, Clone)]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Message(MessageConfig),
    Delay(DelayConfig),
    Condition(ConditionConfig),
    Input(InputConfig),
    SetVariable(SetVariableConfig),
    Action(ActionConfig),
    Handoff(HandoffConfig),
    AiAgent(AiAgentConfig),
    Api(ApiConfig),
    Validator(ValidatorConfig),
    AbSplit(AbSplitConfig),
    Switch(SwitchConfig),
    Schedule(ScheduleConfig),
    Media(MediaConfig),
    Interactive(InteractiveConfig),
    End,
    Note,
    Unknown(String),
}

impl NodeConfig {
    /// Normalize an editor node into its typed configuration. Unknown or
    /// partially-filled `data` degrades to defaults, never to an error.
    pub fn from_raw(kind: &str, data: &Value) -> Self {
        fn cfg<T: serde::de::DeserializeOwned + Default>(data: &Value) -> T {
            serde_json::from_value(data.clone()).unwrap_or_default()
        }
        match kind {
            "trigger" => Self::Trigger(cfg(data)),
            "message" => Self::Message(cfg(data)),
            "delay" => Self::Delay(cfg(data)),
            "condition" => Self::Condition(cfg(data)),
            "input" => Self::Input(cfg(data)),
            "set_variable" => Self::SetVariable(cfg(data)),
            "action" => Self::Action(cfg(data)),
            "handoff" => Self::Handoff(cfg(data)),
            "ai_agent" => Self::AiAgent(cfg(data)),
            "api" => Self::Api(cfg(data)),
            "validator" => Self::Validator(cfg(data)),
            "ab_split" => Self::AbSplit(cfg(data)),
            "switch" => Self::Switch(cfg(data)),
            "schedule" => Self::Schedule(cfg(data)),
            "media" => Self::Media(cfg(data)),
            "interactive" => Self::Interactive(cfg(data)),
            "end" => Self::End,
            "note" => Self::Note,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            Self::Trigger(_) => "trigger",
            Self::Message(_) => "message",
            Self::Delay(_) => "delay",
            Self::Condition(_) => "condition",
            Self::Input(_) => "input",
            Self::SetVariable(_) => "set_variable",
            Self::Action(_) => "action",
            Self::Handoff(_) => "handoff",
            Self::AiAgent(_) => "ai_agent",
            Self::Api(_) => "api",
            Self::Validator(_) => "validator",
            Self::AbSplit(_) => "ab_split",
            Self::Switch(_) => "switch",
            Self::Schedule(_) => "schedule",
            Self::Media(_) => "media",
            Self::Interactive(_) => "interactive",
            Self::End => "end",
            Self::Note => "note",
            Self::Unknown(_) => "unknown",
        }
    }
}
