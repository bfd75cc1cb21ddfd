//! One client socket from welcome to close

use crate::auth::{authenticate_join, TokenValidator};
use crate::connection::Connection;
use crate::error::{Result, WsError};
use crate::message::{ClientMessage, ServerMessage};
use crate::registry::ConnectionRegistry;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use imgpipe_core::UserId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tungstenite::Message;

/// Per-connection state shared by the read and write sides of a session
pub struct Session {
    conn: Connection,
    registry: ConnectionRegistry,
    validator: Arc<dyn TokenValidator>,
    user_id: Option<UserId>,
}

impl Session {
    pub fn new(
        conn: Connection,
        registry: ConnectionRegistry,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        Self {
            conn,
            registry,
            validator,
            user_id: None,
        }
    }

    /// User this connection is registered under, once a `join` succeeded
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Handle one inbound text frame and return the reply, if any
    pub async fn handle_text(&mut self, text: &str) -> Option<ServerMessage> {
        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(connection_id = %self.conn.id(), error = %e, "Ignoring malformed client message");
                return None;
            }
        };

        match msg {
            ClientMessage::Join {
                access_token,
                refresh_token,
            } => Some(self.join(access_token.as_deref(), refresh_token.as_deref()).await),
            ClientMessage::Unknown => None,
        }
    }

    async fn join(&mut self, access: Option<&str>, refresh: Option<&str>) -> ServerMessage {
        match authenticate_join(self.validator.as_ref(), access, refresh).await {
            Ok(user_id) => {
                // re-joining as someone else moves the connection
                if let Some(previous) = self.user_id.take() {
                    self.registry.remove(&previous, self.conn.id());
                }
                self.registry.add(&user_id, self.conn.clone());
                tracing::info!(user_id = %user_id, connection_id = %self.conn.id(), "Client authenticated");
                self.user_id = Some(user_id);
                ServerMessage::auth_ok()
            }
            Err(e) => {
                tracing::info!(connection_id = %self.conn.id(), error = %e, "Client authentication failed");
                ServerMessage::auth_failed()
            }
        }
    }

    /// Drop the connection from the registry and mark it closed
    pub fn close(&mut self) {
        self.conn.close();
        if let Some(user_id) = self.user_id.take() {
            self.registry.remove(&user_id, self.conn.id());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive an accepted socket until the peer leaves or `shutdown` fires.
///
/// Frames queued on the connection by the registry are written as they
/// arrive; client frames are handled in order. A transport error answers
/// with a generic error message before the connection is dropped.
pub async fn run_session<S>(
    socket: S,
    registry: ConnectionRegistry,
    validator: Arc<dyn TokenValidator>,
    outbound_capacity: usize,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let (conn, mut outbound) = Connection::new(outbound_capacity);
    let mut session = Session::new(conn, registry, validator);
    let connection_id = session.connection().id();

    send(&mut sink, &ServerMessage::welcome()).await?;
    tracing::debug!(connection_id = %connection_id, "Client connected");

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break Ok(());
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    break Err(WsError::from(e));
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = session.handle_text(&text).await {
                        if let Err(e) = send(&mut sink, &reply).await {
                            break Err(e);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        break Err(WsError::from(e));
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Websocket error");
                    let _ = send(&mut sink, &ServerMessage::server_error()).await;
                    break Err(WsError::from(e));
                }
            }
        }
    };

    session.close();
    tracing::debug!(connection_id = %connection_id, "Client disconnected");
    result
}

async fn send<K>(sink: &mut K, msg: &ServerMessage) -> Result<()>
where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(Message::Text(msg.to_text()?)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenValidator;

    fn session(registry: &ConnectionRegistry) -> (Session, tokio::sync::mpsc::Receiver<String>) {
        let validator = StaticTokenValidator::new()
            .add_token("t42", "42")
            .add_token("t7", "7");
        let (conn, rx) = Connection::new(8);
        (Session::new(conn, registry.clone(), Arc::new(validator)), rx)
    }

    #[tokio::test]
    async fn test_join_registers_and_close_unregisters() {
        let registry = ConnectionRegistry::new();
        let (mut s, _rx) = session(&registry);

        let reply = s.handle_text(r#"{"type":"join","accessToken":"t42"}"#).await;
        assert_eq!(reply, Some(ServerMessage::auth_ok()));
        assert!(registry.contains_user(&UserId::new("42")));

        s.close();
        assert!(!registry.contains_user(&UserId::new("42")));
        assert!(!s.connection().is_open());
    }

    #[tokio::test]
    async fn test_failed_join_registers_nothing() {
        let registry = ConnectionRegistry::new();
        let (mut s, _rx) = session(&registry);

        let reply = s.handle_text(r#"{"type":"join","accessToken":"nope"}"#).await;
        assert_eq!(reply, Some(ServerMessage::auth_failed()));
        assert_eq!(registry.user_count(), 0);
        assert!(s.user_id().is_none());
    }

    #[tokio::test]
    async fn test_rejoin_moves_connection() {
        let registry = ConnectionRegistry::new();
        let (mut s, _rx) = session(&registry);

        s.handle_text(r#"{"type":"join","accessToken":"t42"}"#).await;
        s.handle_text(r#"{"type":"join","refreshToken":"t7"}"#).await;

        assert!(!registry.contains_user(&UserId::new("42")));
        assert!(registry.contains_user(&UserId::new("7")));
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_other_messages_get_no_reply() {
        let registry = ConnectionRegistry::new();
        let (mut s, _rx) = session(&registry);

        assert_eq!(s.handle_text(r#"{"type":"ping"}"#).await, None);
        assert_eq!(s.handle_text("garbage").await, None);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let registry = ConnectionRegistry::new();
        let (mut s, _rx) = session(&registry);
        s.handle_text(r#"{"type":"join","accessToken":"t42"}"#).await;
        drop(s);
        assert_eq!(registry.user_count(), 0);
    }
}
