use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::conversation::ConversationStore;
use crate::error::{ConciergeError, Result};
use crate::models::WatchContext;

/// Per-session state: the predicted watch and its conversation
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    context: WatchContext,
    conversation: ConversationStore,
}

impl Session {
    pub fn new(context: WatchContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            context,
            conversation: ConversationStore::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn context(&self) -> &WatchContext {
        &self.context
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    /// Context plus the writable log, for running a turn
    pub(crate) fn turn_state(&mut self) -> (&WatchContext, &mut ConversationStore) {
        (&self.context, &mut self.conversation)
    }
}

struct Entry {
    session: Arc<Mutex<Session>>,
    last_used: Instant,
}

impl Entry {
    /// Idle past the TTL and not held by a running turn
    fn expired(&self, now: Instant, idle_ttl: Duration) -> bool {
        now.duration_since(self.last_used) > idle_ttl && Arc::strong_count(&self.session) == 1
    }
}

/// Live sessions. Each one sits behind its own lock, so turns within a
/// session are serialized while separate sessions run independently.
///
/// Idle sessions expire after `idle_ttl`; once `max_sessions` is reached the
/// least recently used one is evicted to make room.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Entry>>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self::new(cfg.idle_ttl(), cfg.max_sessions)
    }

    pub async fn create(&self, context: WatchContext) -> Uuid {
        let session = Session::new(context);
        let id = session.id;
        let now = Instant::now();

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.expired(now, self.idle_ttl));
        if sessions.len() < before {
            tracing::info!(expired = before - sessions.len(), "Pruned idle sessions");
        }

        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::info!(session_id = %oldest, "Evicted least recently used session");
        }

        sessions.insert(
            id,
            Entry {
                session: Arc::new(Mutex::new(session)),
                last_used: now,
            },
        );
        tracing::info!(session_id = %id, live = sessions.len(), "Session created");
        id
    }

    /// Fetch a live session and mark it used
    pub async fn get(&self, id: Uuid) -> Result<Arc<Mutex<Session>>> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&id) else {
            return Err(ConciergeError::SessionNotFound(id));
        };
        if entry.expired(now, self.idle_ttl) {
            sessions.remove(&id);
            tracing::info!(session_id = %id, "Session expired");
            return Err(ConciergeError::SessionNotFound(id));
        }
        entry.last_used = now;
        Ok(Arc::clone(&entry.session))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationTurn;

    fn rolex() -> WatchContext {
        WatchContext::new("Rolex", "$100.00", vec![])
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::default();
        let a = registry.create(rolex()).await;
        let b = registry
            .create(WatchContext::new("Seiko", "$50.00", vec![]))
            .await;
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);

        registry
            .get(a)
            .await
            .unwrap()
            .lock()
            .await
            .turn_state()
            .1
            .append(ConversationTurn::direct("q", "a"));

        let sa = registry.get(a).await.unwrap();
        let sb = registry.get(b).await.unwrap();
        assert_eq!(sa.lock().await.conversation().len(), 1);
        assert!(sb.lock().await.conversation().is_empty());
        assert_eq!(sb.lock().await.context().brand, "Seiko");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let registry = SessionRegistry::default();
        let id = Uuid::new_v4();
        let err = registry.get(id).await.unwrap_err();
        assert!(matches!(err, ConciergeError::SessionNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_idle_session_expires() {
        let registry = SessionRegistry::new(Duration::from_millis(20), 10);
        let id = registry.create(rolex()).await;
        assert!(registry.get(id).await.is_ok());

        tokio::time::sleep(Duration::from_millis(60)).await;

        let err = registry.get(id).await.unwrap_err();
        assert!(matches!(err, ConciergeError::SessionNotFound(missing) if missing == id));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_create_prunes_expired_sessions() {
        let registry = SessionRegistry::new(Duration::from_millis(20), 100);
        for _ in 0..50 {
            registry
                .create(WatchContext::new("Rolex", "$1.00", vec![0u8; 1024]))
                .await;
        }
        assert_eq!(registry.len().await, 50);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let fresh = registry.create(rolex()).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let registry = SessionRegistry::new(Duration::from_secs(3600), 2);
        let a = registry.create(rolex()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = registry.create(rolex()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // touching `a` makes `b` the oldest
        registry.get(a).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let c = registry.create(rolex()).await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.get(a).await.is_ok());
        assert!(registry.get(c).await.is_ok());
        assert!(matches!(
            registry.get(b).await.unwrap_err(),
            ConciergeError::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_session_in_use_is_not_expired() {
        let registry = SessionRegistry::new(Duration::from_millis(20), 10);
        let id = registry.create(rolex()).await;
        let held = registry.get(id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(registry.get(id).await.is_ok());
        drop(held);
    }
}
