// Price Stream Core Library
// Shared real-time price connection, price cache and consumer-facing event bus

pub mod backoff;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod key;
pub mod manager;
pub mod models;
pub mod price_cache;
pub mod price_source;
pub mod profit;
pub mod protocol;
pub mod settings;
pub mod stats;
pub mod transport;

#[cfg(feature = "native")]
pub mod native;

// Re-exports
pub use error::StreamError;
pub use events::{handler, EventBus, EventHandler, EventKind, StreamEvent};
pub use key::KeyNormalizer;
pub use manager::{ConnectionManager, ConnectionState, Phase, Visibility};
pub use models::*;
pub use price_cache::{LookupPath, PriceCache, PriceHit};
pub use price_source::PriceSource;
pub use profit::calculate_profits;
pub use settings::StreamSettings;
pub use stats::Statistics;
pub use transport::{Connector, FrameSink, Transport, TransportEvent};
