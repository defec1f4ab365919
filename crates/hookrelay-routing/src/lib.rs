//! Destination resolution and fan-out for hookrelay.
//!
//! [`DestinationResolver`] answers "who receives this identifier" from a
//! [`ResolutionCache`] backed by the destination catalog, and
//! [`FanoutCoordinator`] turns one notification into one delivery job per
//! resolved destination.

pub mod cache;
pub mod fanout;
pub mod metrics;
pub mod resolver;

pub use cache::{
    CacheStats, Clock, DEFAULT_TTL, LocalResolutionCache, ManualClock, ResolutionCache,
    SystemClock, cache_key,
};
pub use fanout::{DispatchSummary, FanoutCoordinator};
pub use resolver::DestinationResolver;
