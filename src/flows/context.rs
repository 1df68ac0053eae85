use std::collections::{HashMap, HashSet};

/// Mutable state bag for one flow run. Seeded at dispatch time, mutated by
/// node processors, discarded when the walk halts. Never persisted -- the
/// only durable trace of a suspended run is the pending-input marker.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub user_id: i64,
    pub instance: String,
    pub remote_jid: String,
    pub contact_id: i64,
    pub variables: HashMap<String, String>,
    /// Per-run cycle guard.
    pub visited: HashSet<String>,
}

impl RunContext {
    pub fn new(
        user_id: i64,
        instance: impl Into<String>,
        remote_jid: impl Into<String>,
        contact_id: i64,
    ) -> Self {
        Self {
            user_id,
            instance: instance.into(),
            remote_jid: remote_jid.into(),
            contact_id,
            variables: HashMap::new(),
            visited: HashSet::new(),
        }
    }

    /// Seed the standard variables every run starts with: the contact's
    /// phone, the triggering message text and `last_input`.
    pub fn seed(mut self, phone: &str, contact_name: &str, message: &str) -> Self {
        self.variables
            .insert("contact.phone".into(), phone.to_string());
        self.variables
            .insert("contact.name".into(), contact_name.to_string());
        self.variables.insert("message".into(), message.to_string());
        self.variables
            .insert("last_input".into(), message.to_string());
        self
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }
}
