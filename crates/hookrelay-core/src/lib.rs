//! # hookrelay-core
//!
//! Destination catalog model for the hookrelay webhook relay.
//!
//! The catalog answers one question on the hot path: which downstream
//! destinations should receive a notification carrying a given inbound
//! identifier. Everything else here is the administrative data around it.
//!
//! - [`DestinationCatalog`]: the storage contract, implemented by
//!   [`InMemoryCatalog`] and by the PostgreSQL backend crate.
//! - [`ResolvedDestination`]: the flattened read model returned to the
//!   resolver, already in delivery order.

mod catalog;
mod error;
mod memory;
mod model;

pub use catalog::DestinationCatalog;
pub use error::{CatalogError, CatalogResult};
pub use memory::InMemoryCatalog;
pub use model::{
    App, BusinessAccount, Destination, Mapping, MappingView, NewApp, NewBusinessAccount,
    NewDestination, NewPhoneNumber, PhoneNumber, PhoneNumberSummary, ResolvedDestination,
    UpsertMapping, sort_by_rank, validate_endpoint,
};

/// Type alias for a shareable catalog instance.
pub type DynCatalog = std::sync::Arc<dyn DestinationCatalog>;
