use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bus transport error: {0}")]
    Transport(String),

    /// The subscriber could not re-establish its transport. Nothing will be
    /// delivered to this process until an operator intervenes.
    #[error("Subscriber reconnect failed after {attempts} attempts, manual intervention required")]
    ReconnectExhausted { attempts: u32 },

    #[error("Bus closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BusError>;
