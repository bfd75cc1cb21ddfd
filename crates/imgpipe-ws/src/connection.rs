//! A single client connection as seen by the registry

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle to one socket's outbound queue.
///
/// Cloning shares the queue and the open flag. The socket task owns the
/// receiving half and writes whatever arrives to the wire.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
}

impl Connection {
    /// Create an open connection with an outbound queue of `capacity` frames
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: ConnectionId::next(),
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Mark the connection closed. Later sends are skipped.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue a text frame without waiting.
    ///
    /// Returns `false` when the frame was dropped because the connection is
    /// closed or its queue is full.
    pub fn try_send(&self, text: impl Into<String>) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.tx.try_send(text.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.id, "Outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                false
            }
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = Connection::new(1);
        let (b, _rb) = Connection::new(1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_closed_connection_drops_sends() {
        let (conn, mut rx) = Connection::new(4);
        assert!(conn.try_send("one"));
        conn.close();
        assert!(!conn.is_open());
        assert!(!conn.try_send("two"));

        assert_eq!(rx.try_recv().unwrap(), "one");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (conn, _rx) = Connection::new(1);
        assert!(conn.try_send("first"));
        assert!(!conn.try_send("second"));
        assert!(conn.is_open());
    }

    #[test]
    fn test_dropped_receiver_closes_connection() {
        let (conn, rx) = Connection::new(1);
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.try_send("late"));
    }
}
