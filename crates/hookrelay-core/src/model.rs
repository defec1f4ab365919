//! Catalog records and request types.
//!
//! The catalog is a small relational graph:
//! business account → app → phone number → mapping → destination.
//! The phone number id is the inbound identifier carried by every webhook.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{CatalogError, CatalogResult};

fn default_timezone() -> String {
    "UTC".into()
}

fn default_true() -> bool {
    true
}

fn require_non_empty(field: &str, value: &str) -> CatalogResult<()> {
    if value.trim().is_empty() {
        return Err(CatalogError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// A business account owning one or more apps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessAccount {
    pub business_id: String,
    pub name: String,
    pub timezone: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBusinessAccount {
    pub business_id: String,
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl NewBusinessAccount {
    pub fn validate(&self) -> CatalogResult<()> {
        require_non_empty("business_id", &self.business_id)?;
        require_non_empty("name", &self.name)
    }
}

/// A provider app. The verify token is the per-app secret used by the
/// subscription verification handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub verify_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApp {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub verify_token: String,
}

impl NewApp {
    pub fn validate(&self) -> CatalogResult<()> {
        require_non_empty("id", &self.id)?;
        require_non_empty("business_id", &self.business_id)?;
        require_non_empty("name", &self.name)?;
        require_non_empty("verify_token", &self.verify_token)
    }
}

/// A phone number registered under an app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub phone_number_id: String,
    pub app_id: String,
    pub phone_number: String,
    pub display_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPhoneNumber {
    pub phone_number_id: String,
    pub app_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl NewPhoneNumber {
    pub fn validate(&self) -> CatalogResult<()> {
        require_non_empty("phone_number_id", &self.phone_number_id)?;
        require_non_empty("app_id", &self.app_id)?;
        require_non_empty("phone_number", &self.phone_number)
    }
}

/// Phone number listing entry with the number of active mappings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneNumberSummary {
    #[serde(flatten)]
    pub phone_number: PhoneNumber,
    pub destination_count: u32,
}

/// A downstream HTTP endpoint that receives forwarded payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: i64,
    pub name: String,
    pub endpoint: String,
    pub description: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDestination {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl NewDestination {
    pub fn validate(&self) -> CatalogResult<()> {
        require_non_empty("name", &self.name)?;
        validate_endpoint(&self.endpoint)
    }
}

/// Checks that an endpoint is an absolute http(s) URL.
pub fn validate_endpoint(endpoint: &str) -> CatalogResult<()> {
    let parsed = url::Url::parse(endpoint)
        .map_err(|e| CatalogError::validation(format!("endpoint is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CatalogError::validation(format!(
            "endpoint scheme must be http or https, got {other}"
        ))),
    }
}

/// Association of one phone number with one destination.
///
/// At most one mapping exists per (phone number, destination) pair; it is
/// deactivated rather than deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: i64,
    pub phone_number_id: String,
    pub destination_id: i64,
    pub priority: i32,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Create-or-update request for a mapping. Upserting always re-activates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertMapping {
    pub phone_number_id: String,
    pub destination_id: i64,
    #[serde(default)]
    pub priority: i32,
}

impl UpsertMapping {
    pub fn validate(&self) -> CatalogResult<()> {
        require_non_empty("phone_number_id", &self.phone_number_id)
    }
}

/// Mapping listing entry joined with its destination, in any state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingView {
    pub mapping_id: i64,
    pub phone_number_id: String,
    pub destination_id: i64,
    pub destination_name: String,
    pub endpoint: String,
    pub priority: i32,
    pub is_active: bool,
    pub destination_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Flattened read model produced by resolving an inbound identifier.
///
/// One entry per active mapping whose destination is also active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDestination {
    pub phone_number_id: String,
    pub phone_number: String,
    pub display_name: Option<String>,
    pub app_id: String,
    pub app_name: String,
    pub business_id: String,
    pub business_name: String,
    pub destination_id: i64,
    pub destination_name: String,
    pub endpoint: String,
    pub priority: i32,
}

impl ResolvedDestination {
    /// Delivery order: priority descending, then destination name ascending.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.destination_name.cmp(&other.destination_name))
    }
}

/// Sorts resolved destinations into delivery order.
pub fn sort_by_rank(destinations: &mut [ResolvedDestination]) {
    destinations.sort_by(ResolvedDestination::rank_cmp);
}
