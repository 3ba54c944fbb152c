use super::SessionEvent;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

/// Public view of an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub opened_at: String,
}

struct Entry {
    conn: u64,
    tx: mpsc::Sender<SessionEvent>,
    opened_at: String,
}

/// Open sessions by id, for out-of-band callers such as the HTTP completion
/// endpoint. Each registration gets a connection number so a stale connection
/// closing late cannot evict a newer one that reused its id.
#[derive(Clone, Default)]
pub(crate) struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    next_conn: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub async fn register(&self, id: &str, tx: mpsc::Sender<SessionEvent>) -> u64 {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            conn,
            tx,
            opened_at: now_rfc3339(),
        };
        if self.inner.write().await.insert(id.to_string(), entry).is_some() {
            warn!(session = %id, "session id reused, replacing the previous connection");
        }
        conn
    }

    /// Remove `id` only if it still belongs to connection `conn`.
    pub async fn unregister(&self, id: &str, conn: u64) -> bool {
        let mut map = self.inner.write().await;
        if map.get(id).is_some_and(|e| e.conn == conn) {
            map.remove(id);
            true
        } else {
            false
        }
    }

    pub async fn sender(&self, id: &str) -> Option<mpsc::Sender<SessionEvent>> {
        self.inner.read().await.get(id).map(|e| e.tx.clone())
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let map = self.inner.read().await;
        let mut out: Vec<SessionInfo> = map
            .iter()
            .map(|(id, e)| SessionInfo {
                id: id.clone(),
                opened_at: e.opened_at.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

pub(crate) fn gen_session_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}
