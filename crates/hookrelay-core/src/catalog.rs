//! The destination catalog contract.

use async_trait::async_trait;

use crate::error::CatalogResult;
use crate::model::{
    App, BusinessAccount, Destination, Mapping, MappingView, NewApp, NewBusinessAccount,
    NewDestination, NewPhoneNumber, PhoneNumber, PhoneNumberSummary, ResolvedDestination,
    UpsertMapping,
};

/// Persistent source of truth for identifier-to-destination mappings.
///
/// Implementations must be safe for concurrent use. Mapping mutations should
/// go through the resolver rather than being called directly, so that cached
/// resolutions are invalidated.
#[async_trait]
pub trait DestinationCatalog: Send + Sync {
    /// Returns every active mapping for the identifier whose destination is
    /// also active, joined up to the owning app and business account.
    ///
    /// Results are ordered by mapping priority descending, then destination
    /// name ascending. An unknown identifier yields an empty list.
    async fn find_active_destinations(
        &self,
        phone_number_id: &str,
    ) -> CatalogResult<Vec<ResolvedDestination>>;

    /// Looks up the app owning a verify token.
    async fn find_app_by_verify_token(&self, verify_token: &str) -> CatalogResult<Option<App>>;

    /// Lists all business accounts ordered by name.
    async fn list_business_accounts(&self) -> CatalogResult<Vec<BusinessAccount>>;

    async fn create_business_account(
        &self,
        account: NewBusinessAccount,
    ) -> CatalogResult<BusinessAccount>;

    /// Lists the apps of a business account.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the business account does not exist.
    async fn list_apps(&self, business_id: &str) -> CatalogResult<Vec<App>>;

    async fn create_app(&self, app: NewApp) -> CatalogResult<App>;

    /// Lists the phone numbers of an app with their active mapping counts.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the app does not exist.
    async fn list_phone_numbers(&self, app_id: &str) -> CatalogResult<Vec<PhoneNumberSummary>>;

    async fn create_phone_number(&self, phone_number: NewPhoneNumber)
    -> CatalogResult<PhoneNumber>;

    /// Lists all destinations ordered by name.
    async fn list_destinations(&self) -> CatalogResult<Vec<Destination>>;

    async fn create_destination(&self, destination: NewDestination) -> CatalogResult<Destination>;

    /// Toggles a destination on or off. Affects every identifier mapped to it.
    async fn set_destination_active(&self, id: i64, active: bool) -> CatalogResult<Destination>;

    /// Creates the mapping or updates its priority, re-activating it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the phone number or destination does not exist.
    async fn upsert_mapping(&self, mapping: UpsertMapping) -> CatalogResult<Mapping>;

    /// Deactivates a mapping. Returns `None` if no mapping exists for the pair.
    async fn deactivate_mapping(
        &self,
        phone_number_id: &str,
        destination_id: i64,
    ) -> CatalogResult<Option<Mapping>>;

    /// Lists the mappings of a phone number in any state, in delivery order.
    async fn list_mappings(&self, phone_number_id: &str) -> CatalogResult<Vec<MappingView>>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> CatalogResult<()>;
}
