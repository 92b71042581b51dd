//! The Session Manager (§4.6): per-session conversation history, uploaded
//! documents, personal-info store, and a lazily-rebuilt rolling summary.
//!
//! Sessions are evicted after an idle TTL or when the table exceeds a size
//! cap (LRU). Writers for a given session are serialized through a
//! per-session lock so a new turn never begins persisting before the
//! previous one finished (§5 "Concurrency & Resource Model").

use aeroquery_core::{ConversationSummary, PersonalInfo, Role, SessionSnapshot, Turn, UploadedDocument};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub use aeroquery_core::SessionKey;

/// At most this many documents are kept per session (LRU by upload time).
const MAX_DOCUMENTS_PER_SESSION: usize = 3;
/// Summary refresh cadence: every Nth turn.
const SUMMARY_REFRESH_EVERY: usize = 10;

struct SessionState {
    turns: Vec<Turn>,
    documents: VecDeque<UploadedDocument>,
    personal_info: PersonalInfo,
    summary: ConversationSummary,
    last_access: DateTime<Utc>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            turns: Vec::new(),
            documents: VecDeque::new(),
            personal_info: PersonalInfo::default(),
            summary: ConversationSummary::default(),
            last_access: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    fn snapshot(&self, id: &str) -> SessionSnapshot {
        SessionSnapshot {
            id: id.to_string(),
            turns: self.turns.clone(),
            documents: self.documents.iter().cloned().collect(),
            personal_info: self.personal_info.clone(),
            summary: self.summary.clone(),
            last_access: Some(self.last_access),
        }
    }
}

/// One session's owned state plus the lock that serializes turn persistence.
struct SessionEntry {
    state: RwLock<SessionState>,
    /// Held for the duration of a turn's append so concurrent requests for
    /// the same session never interleave writes.
    turn_lock: Mutex<()>,
}

impl SessionEntry {
    fn new() -> Self {
        Self { state: RwLock::new(SessionState::new()), turn_lock: Mutex::new(()) }
    }
}

pub struct SessionManagerConfig {
    pub idle_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self { idle_ttl: Duration::from_secs(3600), max_sessions: 50 }
    }
}

/// Owns every session for the process. Constructed once at startup and
/// injected into the agent pipeline, per the "owned services" design note.
pub struct SessionManager {
    sessions: DashMap<SessionKey, Arc<SessionEntry>>,
    config: SessionManagerConfig,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionManagerConfig::default())
    }
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        Self { sessions: DashMap::new(), config }
    }

    fn entry(&self, id: &SessionKey) -> Arc<SessionEntry> {
        self.sessions.entry(id.clone()).or_insert_with(|| Arc::new(SessionEntry::new())).clone()
    }

    /// Read-only snapshot (§3 "observers receive read-only snapshots").
    pub async fn get_or_create(&self, id: &SessionKey) -> SessionSnapshot {
        let entry = self.entry(id);
        let mut state = entry.state.write().await;
        state.touch();
        state.snapshot(id.as_str())
    }

    pub async fn snapshot(&self, id: &SessionKey) -> Option<SessionSnapshot> {
        let entry = self.sessions.get(id)?.clone();
        let state = entry.state.read().await;
        Some(state.snapshot(id.as_str()))
    }

    /// Appends a user/assistant pair for one turn. Serialized per-session:
    /// a concurrent call for the same id blocks until this one completes.
    #[allow(clippy::too_many_arguments)]
    pub async fn append_turn(
        &self,
        id: &SessionKey,
        user_content: impl Into<String>,
        user_tokens: usize,
        assistant_content: impl Into<String>,
        assistant_tools_used: Vec<String>,
        assistant_tokens: usize,
        assistant_truncated: bool,
    ) {
        let entry = self.entry(id);
        let _turn_guard = entry.turn_lock.lock().await;
        let mut state = entry.state.write().await;

        state.turns.push(Turn::new(Role::User, user_content, user_tokens));
        let mut assistant_turn = Turn::new(Role::Assistant, assistant_content, assistant_tokens);
        assistant_turn.tools_used = assistant_tools_used;
        assistant_turn.truncated = assistant_truncated;
        state.turns.push(assistant_turn);

        if state.turns.len() / 2 % SUMMARY_REFRESH_EVERY == 0 {
            Self::refresh_summary(&mut state);
        }
        state.touch();
    }

    /// Lazy heuristic refresh (§4.6): first user utterance + last few user
    /// utterances, joined. An LLM-backed refresh is left to the caller,
    /// which may overwrite this with `update_summary`.
    fn refresh_summary(state: &mut SessionState) {
        let user_messages: Vec<&str> = state
            .turns
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .collect();
        if user_messages.is_empty() {
            return;
        }
        let first = user_messages[0];
        let tail_start = user_messages.len().saturating_sub(3);
        let tail = &user_messages[tail_start..];
        let mut text = format!("Conversation started with: \"{}\".", truncate_chars(first, 160));
        if tail.len() > 1 || tail[0] != first {
            text.push_str(" Recently discussed: ");
            text.push_str(&tail.iter().map(|m| truncate_chars(m, 100)).collect::<Vec<_>>().join("; "));
        }
        state.summary = ConversationSummary { text, built_at_turn: state.turns.len() };
    }

    /// Caller-supplied summary (e.g. LLM-produced), per §4.6's "it may be
    /// produced by a cheap heuristic ... or by the LLM itself (optional)".
    pub async fn update_summary(&self, id: &SessionKey, text: impl Into<String>) {
        let entry = self.entry(id);
        let mut state = entry.state.write().await;
        let turn_count = state.turns.len();
        state.summary = ConversationSummary { text: text.into(), built_at_turn: turn_count };
    }

    pub async fn add_document(&self, id: &SessionKey, doc: UploadedDocument) {
        let entry = self.entry(id);
        let mut state = entry.state.write().await;
        state.documents.push_back(doc);
        while state.documents.len() > MAX_DOCUMENTS_PER_SESSION {
            state.documents.pop_front();
        }
        state.touch();
    }

    pub async fn documents(&self, id: &SessionKey) -> Vec<UploadedDocument> {
        let Some(entry) = self.sessions.get(id).map(|e| e.clone()) else { return Vec::new() };
        entry.state.read().await.documents.iter().cloned().collect()
    }

    pub async fn personal_info(&self, id: &SessionKey) -> PersonalInfo {
        let entry = self.entry(id);
        entry.state.read().await.personal_info.clone()
    }

    pub async fn set_personal_info(&self, id: &SessionKey, update: &PersonalInfo) {
        let entry = self.entry(id);
        let mut state = entry.state.write().await;
        state.personal_info.merge(update);
        state.touch();
    }

    pub fn purge(&self, id: &SessionKey) {
        self.sessions.remove(id);
    }

    pub fn list(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// TTL + size-cap sweep (§4.6). Idle sessions older than `idle_ttl` are
    /// dropped outright; if the table is still over `max_sessions`, the
    /// least-recently-accessed survivors are evicted until it fits.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let idle_ttl = chrono::Duration::from_std(self.config.idle_ttl).unwrap_or(chrono::Duration::zero());

        let mut expired = Vec::new();
        let mut ages: Vec<(SessionKey, DateTime<Utc>)> = Vec::new();
        for entry in self.sessions.iter() {
            let last_access = entry.value().state.read().await.last_access;
            if now - last_access > idle_ttl {
                expired.push(entry.key().clone());
            } else {
                ages.push((entry.key().clone(), last_access));
            }
        }
        for key in expired {
            tracing::debug!(session = %key, "evicting idle session");
            self.sessions.remove(&key);
        }

        if ages.len() > self.config.max_sessions {
            ages.sort_by_key(|(_, last_access)| *last_access);
            let overflow = ages.len() - self.config.max_sessions;
            for (key, _) in ages.into_iter().take(overflow) {
                tracing::debug!(session = %key, "evicting session over LRU cap");
                self.sessions.remove(&key);
            }
        }
    }
}

fn truncate_chars(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        s.chars().take(n).collect::<String>() + "…"
    }
}
