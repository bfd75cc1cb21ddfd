//! # imgpipe-ws
//!
//! Real-time delivery of job results to connected clients.
//!
//! Clients open a WebSocket, receive a welcome message and send a `join`
//! carrying a token. Once the token resolves to a user, the connection is
//! registered under that user in the process-local [`ConnectionRegistry`].
//! The bridge task reads the process-wide bus subscription and queues each
//! event on the connections of the user it belongs to; users without a
//! connection in this process are skipped.
//!
//! ```rust,ignore
//! let registry = ConnectionRegistry::new();
//! let bridge = spawn_bridge(bus, registry.clone(), shutdown.clone()).await?;
//! WsServer::new(registry, Arc::new(JwtValidator::new(secret)))
//!     .run("0.0.0.0:8081", shutdown)
//!     .await?;
//! ```

pub mod auth;
mod bridge;
mod connection;
mod error;
pub mod message;
mod registry;
mod server;
mod session;

pub use auth::{AuthError, JwtValidator, StaticTokenValidator, TokenValidator};
pub use bridge::{run_bridge, spawn_bridge};
pub use connection::{Connection, ConnectionId};
pub use error::{Result, WsError};
pub use message::{ClientMessage, ServerMessage};
pub use registry::ConnectionRegistry;
pub use server::{WsConfig, WsServer};
pub use session::{run_session, Session};
