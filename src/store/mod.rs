use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ── Row types ───────────────────────────────────────────────────

/// A messaging instance (one connected WhatsApp session) and its owner.
#[derive(Debug, Clone)]
pub struct InstanceRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ContactRow {
    pub id: i64,
    pub user_id: i64,
    pub remote_jid: String,
    pub name: String,
    pub blocked: bool,
    pub unread: i64,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub user_id: i64,
    pub contact_id: i64,
    pub external_id: String,
    pub direction: String,
    pub kind: String,
    pub content: String,
    pub media_url: Option<String>,
    pub timestamp: String,
    pub status: String,
    /// Provenance: `user`, `flow` or `chatbot`.
    pub origin: String,
}

/// Parameters for recording a message (insert-or-update on external_id).
pub struct NewMessage {
    pub user_id: i64,
    pub contact_id: i64,
    pub external_id: String,
    pub direction: String,
    pub kind: String,
    pub content: String,
    pub media_url: Option<String>,
    pub timestamp: String,
    pub status: String,
    pub origin: String,
}

#[derive(Debug, Clone)]
pub struct FlowRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub status: String,
    /// Restrict the flow to one instance when set.
    pub instance: Option<String>,
    pub schedule_enabled: bool,
    /// Comma-separated weekday abbreviations (dom..sab), empty = all days.
    pub schedule_days: String,
    pub schedule_start: Option<String>,
    pub schedule_end: Option<String>,
    pub cooldown_hours: i64,
    pub content: String,
}

pub struct NewFlow {
    pub user_id: i64,
    pub name: String,
    pub status: String,
    pub instance: Option<String>,
    pub schedule_enabled: bool,
    pub schedule_days: String,
    pub schedule_start: Option<String>,
    pub schedule_end: Option<String>,
    pub cooldown_hours: i64,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatbotRow {
    pub id: i64,
    pub user_id: i64,
    pub instance: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ChatbotRuleRow {
    pub id: i64,
    pub bot_id: i64,
    pub keyword: String,
    /// `starts`, `ends`, `contains` or `any`.
    pub match_type: String,
    pub response: String,
    pub delay_secs: i64,
    pub position: i64,
}

// ── Store ───────────────────────────────────────────────────────

/// SQLite-backed store for everything the core persists: instances,
/// contacts, messages, flows, chatbot rules, cooldowns, pending-input
/// markers and per-tenant settings.
///
/// Thread safety: wraps `Connection` in `Mutex`; the daemon shares one
/// `Store` across async tasks via `Arc<Store>`.
pub struct Store {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;

             CREATE TABLE IF NOT EXISTS instances (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id     INTEGER NOT NULL,
                 name        TEXT NOT NULL UNIQUE,
                 created_at  TEXT NOT NULL DEFAULT (datetime('now'))
             );

             CREATE TABLE IF NOT EXISTS contacts (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id     INTEGER NOT NULL,
                 remote_jid  TEXT NOT NULL,
                 name        TEXT NOT NULL DEFAULT '',
                 blocked     INTEGER NOT NULL DEFAULT 0,
                 unread      INTEGER NOT NULL DEFAULT 0,
                 created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                 UNIQUE(user_id, remote_jid)
             );

             CREATE TABLE IF NOT EXISTS messages (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id     INTEGER NOT NULL,
                 contact_id  INTEGER NOT NULL,
                 external_id TEXT NOT NULL UNIQUE,
                 direction   TEXT NOT NULL,
                 kind        TEXT NOT NULL DEFAULT 'text',
                 content     TEXT NOT NULL DEFAULT '',
                 media_url   TEXT,
                 timestamp   TEXT NOT NULL,
                 status      TEXT NOT NULL DEFAULT 'received',
                 origin      TEXT NOT NULL DEFAULT 'user'
             );
             CREATE INDEX IF NOT EXISTS idx_messages_contact
                 ON messages(contact_id);

             CREATE TABLE IF NOT EXISTS flows (
                 id               INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id          INTEGER NOT NULL,
                 name             TEXT NOT NULL,
                 status           TEXT NOT NULL DEFAULT 'paused',
                 instance         TEXT,
                 schedule_enabled INTEGER NOT NULL DEFAULT 0,
                 schedule_days    TEXT NOT NULL DEFAULT '',
                 schedule_start   TEXT,
                 schedule_end     TEXT,
                 cooldown_hours   INTEGER NOT NULL DEFAULT 0,
                 content          TEXT NOT NULL DEFAULT '{}',
                 created_at       TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE INDEX IF NOT EXISTS idx_flows_user_status
                 ON flows(user_id, status);

             CREATE TABLE IF NOT EXISTS chatbots (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id     INTEGER NOT NULL,
                 instance    TEXT NOT NULL DEFAULT '',
                 active      INTEGER NOT NULL DEFAULT 1
             );

             CREATE TABLE IF NOT EXISTS chatbot_rules (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 bot_id      INTEGER NOT NULL,
                 keyword     TEXT NOT NULL DEFAULT '',
                 match_type  TEXT NOT NULL DEFAULT 'contains',
                 response    TEXT NOT NULL DEFAULT '',
                 delay_secs  INTEGER NOT NULL DEFAULT 0,
                 position    INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_chatbot_rules_bot
                 ON chatbot_rules(bot_id, position);

             CREATE TABLE IF NOT EXISTS flow_cooldowns (
                 flow_id         INTEGER NOT NULL,
                 contact_id      INTEGER NOT NULL,
                 last_trigger_at TEXT NOT NULL,
                 PRIMARY KEY (flow_id, contact_id)
             );

             CREATE TABLE IF NOT EXISTS flow_pending_inputs (
                 user_id     INTEGER NOT NULL,
                 contact_id  INTEGER NOT NULL,
                 variable    TEXT NOT NULL,
                 created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                 PRIMARY KEY (user_id, contact_id)
             );

             CREATE TABLE IF NOT EXISTS settings (
                 user_id     INTEGER NOT NULL,
                 key         TEXT NOT NULL,
                 value       TEXT NOT NULL,
                 updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
                 PRIMARY KEY (user_id, key)
             );",
        )?;
        Ok(())
    }

    // ── Instances ────────────────────────────────────────────────

    pub fn create_instance(&self, user_id: i64, name: &str) -> Result<i64> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT INTO instances (user_id, name) VALUES (?1, ?2)",
            params![user_id, name],
        )?;
        Ok(guard.last_insert_rowid())
    }

    /// Resolve the tenant owning an instance name: exact match first, then
    /// case-insensitive, then a hyphen-stripped prefix heuristic (gateways
    /// sometimes suffix the registered name).
    pub fn resolve_instance_owner(&self, instance: &str) -> Result<Option<i64>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let exact: Option<i64> = guard
            .query_row(
                "SELECT user_id FROM instances WHERE name = ?1",
                params![instance],
                |row| row.get(0),
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }

        let ci: Option<i64> = guard
            .query_row(
                "SELECT user_id FROM instances WHERE LOWER(name) = LOWER(?1)",
                params![instance],
                |row| row.get(0),
            )
            .optional()?;
        if ci.is_some() {
            return Ok(ci);
        }

        let needle = instance.replace('-', "").to_lowercase();
        let mut stmt = guard.prepare("SELECT user_id, name FROM instances")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (user_id, name) = row?;
            let stored = name.replace('-', "").to_lowercase();
            if needle.starts_with(&stored) || stored.starts_with(&needle) {
                return Ok(Some(user_id));
            }
        }
        Ok(None)
    }

    // ── Contacts ─────────────────────────────────────────────────

    /// Insert or refresh a contact. Merge rules: an empty incoming name
    /// never overwrites a stored one; inbound traffic bumps the unread
    /// counter.
    pub fn upsert_contact(&self, user_id: i64, remote_jid: &str, name: &str) -> Result<ContactRow> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT INTO contacts (user_id, remote_jid, name, unread)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(user_id, remote_jid) DO UPDATE SET
                 name = CASE WHEN excluded.name != '' THEN excluded.name ELSE contacts.name END,
                 unread = contacts.unread + 1",
            params![user_id, remote_jid, name],
        )?;
        let row = guard.query_row(
            "SELECT id, user_id, remote_jid, name, blocked, unread
             FROM contacts WHERE user_id = ?1 AND remote_jid = ?2",
            params![user_id, remote_jid],
            |row| {
                Ok(ContactRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    remote_jid: row.get(2)?,
                    name: row.get(3)?,
                    blocked: row.get::<_, i64>(4)? != 0,
                    unread: row.get(5)?,
                })
            },
        )?;
        Ok(row)
    }

    pub fn set_contact_blocked(&self, user_id: i64, remote_jid: &str, blocked: bool) -> Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "UPDATE contacts SET blocked = ?3 WHERE user_id = ?1 AND remote_jid = ?2",
            params![user_id, remote_jid, blocked as i64],
        )?;
        Ok(())
    }

    // ── Messages ─────────────────────────────────────────────────

    /// Record a message, keyed by its external message id (idempotent for
    /// webhook redeliveries).
    pub fn insert_message(&self, msg: &NewMessage) -> Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT OR REPLACE INTO messages
                (user_id, contact_id, external_id, direction, kind, content,
                 media_url, timestamp, status, origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                msg.user_id,
                msg.contact_id,
                msg.external_id,
                msg.direction,
                msg.kind,
                msg.content,
                msg.media_url,
                msg.timestamp,
                msg.status,
                msg.origin,
            ],
        )?;
        Ok(())
    }

    pub fn messages_for_contact(&self, contact_id: i64) -> Result<Vec<MessageRow>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = guard.prepare(
            "SELECT id, user_id, contact_id, external_id, direction, kind,
                    content, media_url, timestamp, status, origin
             FROM messages WHERE contact_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![contact_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                contact_id: row.get(2)?,
                external_id: row.get(3)?,
                direction: row.get(4)?,
                kind: row.get(5)?,
                content: row.get(6)?,
                media_url: row.get(7)?,
                timestamp: row.get(8)?,
                status: row.get(9)?,
                origin: row.get(10)?,
            })
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    // ── Flows ────────────────────────────────────────────────────

    pub fn create_flow(&self, flow: &NewFlow) -> Result<i64> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT INTO flows
                (user_id, name, status, instance, schedule_enabled, schedule_days,
                 schedule_start, schedule_end, cooldown_hours, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                flow.user_id,
                flow.name,
                flow.status,
                flow.instance,
                flow.schedule_enabled as i64,
                flow.schedule_days,
                flow.schedule_start,
                flow.schedule_end,
                flow.cooldown_hours,
                flow.content,
            ],
        )?;
        Ok(guard.last_insert_rowid())
    }

    /// Flows the dispatcher considers for an inbound message, in creation
    /// order (first match wins downstream).
    pub fn list_active_flows(&self, user_id: i64) -> Result<Vec<FlowRow>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = guard.prepare(
            "SELECT id, user_id, name, status, instance, schedule_enabled,
                    schedule_days, schedule_start, schedule_end, cooldown_hours, content
             FROM flows WHERE user_id = ?1 AND status = 'active' ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(FlowRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                status: row.get(3)?,
                instance: row.get(4)?,
                schedule_enabled: row.get::<_, i64>(5)? != 0,
                schedule_days: row.get(6)?,
                schedule_start: row.get(7)?,
                schedule_end: row.get(8)?,
                cooldown_hours: row.get(9)?,
                content: row.get(10)?,
            })
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    // ── Chatbots ─────────────────────────────────────────────────

    pub fn create_chatbot(&self, user_id: i64, instance: &str, active: bool) -> Result<i64> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT INTO chatbots (user_id, instance, active) VALUES (?1, ?2, ?3)",
            params![user_id, instance, active as i64],
        )?;
        Ok(guard.last_insert_rowid())
    }

    pub fn create_chatbot_rule(
        &self,
        bot_id: i64,
        keyword: &str,
        match_type: &str,
        response: &str,
        delay_secs: i64,
        position: i64,
    ) -> Result<i64> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT INTO chatbot_rules (bot_id, keyword, match_type, response, delay_secs, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![bot_id, keyword, match_type, response, delay_secs, position],
        )?;
        Ok(guard.last_insert_rowid())
    }

    /// Active bots for a tenant+instance. A bot with an empty instance
    /// applies to every instance of that tenant.
    pub fn list_active_chatbots(&self, user_id: i64, instance: &str) -> Result<Vec<ChatbotRow>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = guard.prepare(
            "SELECT id, user_id, instance, active FROM chatbots
             WHERE user_id = ?1 AND active = 1 AND (instance = '' OR instance = ?2)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id, instance], |row| {
            Ok(ChatbotRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                instance: row.get(2)?,
                active: row.get::<_, i64>(3)? != 0,
            })
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    pub fn list_chatbot_rules(&self, bot_id: i64) -> Result<Vec<ChatbotRuleRow>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = guard.prepare(
            "SELECT id, bot_id, keyword, match_type, response, delay_secs, position
             FROM chatbot_rules WHERE bot_id = ?1 ORDER BY position, id",
        )?;
        let rows = stmt.query_map(params![bot_id], |row| {
            Ok(ChatbotRuleRow {
                id: row.get(0)?,
                bot_id: row.get(1)?,
                keyword: row.get(2)?,
                match_type: row.get(3)?,
                response: row.get(4)?,
                delay_secs: row.get(5)?,
                position: row.get(6)?,
            })
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    // ── Cooldowns ────────────────────────────────────────────────

    pub fn get_cooldown(&self, flow_id: i64, contact_id: i64) -> Result<Option<String>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let ts = guard
            .query_row(
                "SELECT last_trigger_at FROM flow_cooldowns
                 WHERE flow_id = ?1 AND contact_id = ?2",
                params![flow_id, contact_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    /// Upsert the last-trigger timestamp (last-writer-wins by design).
    pub fn record_cooldown(&self, flow_id: i64, contact_id: i64, at: &str) -> Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT OR REPLACE INTO flow_cooldowns (flow_id, contact_id, last_trigger_at)
             VALUES (?1, ?2, ?3)",
            params![flow_id, contact_id, at],
        )?;
        Ok(())
    }

    // ── Pending inputs ───────────────────────────────────────────

    /// Overwrite the awaited-variable marker for (tenant, contact). Newest
    /// pending input wins.
    pub fn set_pending_input(&self, user_id: i64, contact_id: i64, variable: &str) -> Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT OR REPLACE INTO flow_pending_inputs (user_id, contact_id, variable, created_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![user_id, contact_id, variable],
        )?;
        Ok(())
    }

    pub fn get_pending_input(&self, user_id: i64, contact_id: i64) -> Result<Option<String>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let variable = guard
            .query_row(
                "SELECT variable FROM flow_pending_inputs
                 WHERE user_id = ?1 AND contact_id = ?2",
                params![user_id, contact_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(variable)
    }

    /// Read and delete the marker in one step; the next inbound message
    /// consumes it exactly once.
    pub fn take_pending_input(&self, user_id: i64, contact_id: i64) -> Result<Option<String>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let variable: Option<String> = guard
            .query_row(
                "SELECT variable FROM flow_pending_inputs
                 WHERE user_id = ?1 AND contact_id = ?2",
                params![user_id, contact_id],
                |row| row.get(0),
            )
            .optional()?;
        if variable.is_some() {
            guard.execute(
                "DELETE FROM flow_pending_inputs WHERE user_id = ?1 AND contact_id = ?2",
                params![user_id, contact_id],
            )?;
        }
        Ok(variable)
    }

    // ── Settings ─────────────────────────────────────────────────

    pub fn get_setting(&self, user_id: i64, key: &str) -> Result<Option<String>> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let value = guard
            .query_row(
                "SELECT value FROM settings WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, user_id: i64, key: &str, value: &str) -> Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT OR REPLACE INTO settings (user_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![user_id, key, value],
        )?;
        Ok(())
    }
}
