//! Bounded per-session conversation memory.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ticketline_common::{Turn, TurnRole};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::SessionInfo;

struct Session {
    turns: VecDeque<Turn>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    message_count: u64,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            turns: VecDeque::new(),
            created_at: now,
            last_activity: now,
            message_count: 0,
        }
    }

    fn push(&mut self, turn: Turn, max_turns: usize) {
        self.last_activity = turn.timestamp;
        self.message_count += 1;
        self.turns.push_back(turn);
        while self.turns.len() > max_turns {
            self.turns.pop_front();
        }
    }

    fn info(&self, session_id: &str) -> SessionInfo {
        SessionInfo {
            session_id: session_id.to_string(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.message_count,
            turn_count: self.turns.len(),
        }
    }
}

/// In-process store of conversation sessions.
///
/// Sessions are created on first append and never removed implicitly except
/// by [`ConversationStore::evict_idle`].
pub struct ConversationStore {
    max_turns: usize,
    sessions: RwLock<HashMap<String, Session>>,
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Append a turn, trimming the oldest turns beyond the bound.
    ///
    /// Returns the number of turns retained afterwards.
    pub async fn append(&self, session_id: &str, turn: Turn) -> usize {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        session.push(turn, self.max_turns);
        debug!(session_id, turns = session.turns.len(), "Appended turn");
        session.turns.len()
    }

    /// Append a user/assistant pair under a single write lock.
    pub async fn append_exchange(&self, session_id: &str, user: Turn, assistant: Turn) -> usize {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        session.push(user, self.max_turns);
        session.push(assistant, self.max_turns);
        debug!(session_id, turns = session.turns.len(), "Appended exchange");
        session.turns.len()
    }

    /// All retained turns, oldest first. Unknown sessions have no history.
    pub async fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The last `n` retained turns, oldest first.
    pub async fn recent(&self, session_id: &str, n: usize) -> Vec<Turn> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| {
                let skip = s.turns.len().saturating_sub(n);
                s.turns.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Drop a session's turns but keep the session. Returns false if unknown.
    pub async fn clear(&self, session_id: &str) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(session) => {
                session.turns.clear();
                session.last_activity = Utc::now();
                info!(session_id, "Cleared session history");
                true
            }
            None => false,
        }
    }

    /// Remove a session entirely. Returns false if unknown.
    pub async fn delete(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session_id, "Deleted session");
        }
        removed
    }

    /// Every session, most recently active first.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions.iter().map(|(id, s)| s.info(id)).collect();
        infos.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        infos
    }

    pub async fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.info(session_id))
    }

    /// Plain-text transcript with each message cut at 100 characters.
    pub async fn summary(&self, session_id: &str) -> String {
        let turns = self.history(session_id).await;
        if turns.is_empty() {
            return "No messages in conversation".to_string();
        }

        turns
            .iter()
            .map(|turn| {
                let speaker = match turn.role {
                    TurnRole::User => "User",
                    TurnRole::Assistant => "AI",
                };
                format!("{speaker}: {}", truncate(&turn.content, 100))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Remove sessions with no activity for longer than `max_idle`.
    ///
    /// Returns the number of sessions removed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let cutoff = Utc::now() - max_idle;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity >= cutoff);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let store = ConversationStore::new(20);
        assert!(store.history("nope").await.is_empty());
        assert!(store.session_info("nope").await.is_none());
    }

    #[tokio::test]
    async fn history_never_exceeds_bound() {
        let store = ConversationStore::new(5);
        for i in 0..17 {
            let len = store.append("s1", Turn::user(format!("m{i}"))).await;
            assert!(len <= 5);
        }

        let history = store.history("s1").await;
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].content, "m12");
        assert_eq!(history[4].content, "m16");
        assert_eq!(store.session_info("s1").await.unwrap().message_count, 17);
    }

    #[tokio::test]
    async fn twenty_first_message_evicts_the_oldest() {
        let store = ConversationStore::new(20);
        for i in 0..20 {
            store.append("s1", Turn::user(format!("m{i}"))).await;
        }
        store.append("s1", Turn::user("m20")).await;

        let history = store.history("s1").await;
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "m1");
        assert_eq!(history[19].content, "m20");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = ConversationStore::new(20);
        store.append("a", Turn::user("hello from a")).await;
        store
            .append_exchange("b", Turn::user("hi"), Turn::assistant("hello"))
            .await;

        assert_eq!(store.history("a").await.len(), 1);
        assert_eq!(store.history("b").await.len(), 2);
        assert_eq!(store.session_count().await, 2);
    }

    #[tokio::test]
    async fn recent_returns_tail_in_order() {
        let store = ConversationStore::new(20);
        for i in 0..8 {
            store.append("s", Turn::user(format!("m{i}"))).await;
        }
        let recent = store.recent("s", 3).await;
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m5", "m6", "m7"]);
        assert_eq!(store.recent("s", 50).await.len(), 8);
    }

    #[tokio::test]
    async fn clear_keeps_session_delete_removes_it() {
        let store = ConversationStore::new(20);
        store.append("s", Turn::user("x")).await;

        assert!(store.clear("s").await);
        assert!(store.history("s").await.is_empty());
        assert!(store.session_info("s").await.is_some());

        assert!(store.delete("s").await);
        assert!(store.session_info("s").await.is_none());
        assert!(!store.delete("s").await);
        assert!(!store.clear("s").await);
    }

    #[tokio::test]
    async fn summary_truncates_long_messages() {
        let store = ConversationStore::new(20);
        assert_eq!(store.summary("s").await, "No messages in conversation");

        store
            .append_exchange("s", Turn::user("a".repeat(150)), Turn::assistant("short"))
            .await;
        let summary = store.summary("s").await;
        let lines: Vec<_> = summary.lines().collect();
        assert_eq!(lines[0], format!("User: {}...", "a".repeat(100)));
        assert_eq!(lines[1], "AI: short");
    }

    #[tokio::test]
    async fn evict_idle_removes_only_stale_sessions() {
        let store = ConversationStore::new(20);
        store.append("stale", Turn::user("old")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.append("fresh", Turn::user("new")).await;

        let evicted = store.evict_idle(Duration::from_millis(15)).await;
        assert_eq!(evicted, 1);
        assert!(store.session_info("fresh").await.is_some());
        assert!(store.session_info("stale").await.is_none());
    }

    #[tokio::test]
    async fn list_sessions_most_recent_first() {
        let store = ConversationStore::new(20);
        store.append("first", Turn::user("1")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.append("second", Turn::user("2")).await;

        let ids: Vec<_> = store
            .list_sessions()
            .await
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["second", "first"]);
    }
}
