//! WebSocket error types

use imgpipe_bus::BusError;
use thiserror::Error;

/// Error type for the real-time delivery layer
#[derive(Error, Debug)]
pub enum WsError {
    /// WebSocket handshake failed
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// Message serialization error
    #[error("Message serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The bus subscription feeding the registry ended or failed
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Tungstenite error
    #[error("WebSocket error: {0}")]
    Tungstenite(#[from] tungstenite::Error),
}

impl WsError {
    /// Create a handshake failed error
    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }

    /// Whether the process can no longer deliver events without an operator
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Bus(BusError::ReconnectExhausted { .. }) | Self::Bus(BusError::Closed)
        )
    }
}

/// Result alias for this crate
pub type Result<T> = std::result::Result<T, WsError>;
