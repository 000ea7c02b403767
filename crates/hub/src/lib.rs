#![forbid(unsafe_code)]

mod hub;
mod index;
pub mod keepalive;
mod stats;

pub use hub::{ConnectionId, Delivery, Hub, HubConfig, HubHandle};
pub use index::SubscriptionIndex;
pub use keepalive::spawn_keepalive;
pub use stats::{HubStats, StatsCollector};
