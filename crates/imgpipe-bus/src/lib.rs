//! # imgpipe-bus
//!
//! Publish/subscribe fanout of user-scoped events across processes.
//!
//! Every event is published on a channel named after the user it concerns
//! (`user:<id>:events`). Each process holds one subscription covering all
//! user channels and hands deliveries to its local connection registry,
//! which drops the ones it has no socket for.
//!
//! Delivery is at-most-once and fire-and-forget: an event published while no
//! process is subscribed is lost.

pub mod bus;
pub mod channel;
pub mod error;
pub mod memory;
pub mod reconnect;

#[cfg(feature = "redis")]
pub mod redis;

pub use bus::{Delivery, FanoutBus, Subscription};
pub use channel::{parse_user_channel, user_channel, USER_EVENTS_PATTERN};
pub use error::{BusError, Result};
pub use memory::InMemoryBus;
pub use reconnect::ReconnectPolicy;

#[cfg(feature = "redis")]
pub use crate::redis::RedisBus;
