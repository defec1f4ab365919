//! In-memory destination catalog.
//!
//! Intended for development and tests. All state lives behind a single
//! `RwLock`, so every operation observes a consistent snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::catalog::DestinationCatalog;
use crate::error::{CatalogError, CatalogResult};
use crate::model::{
    App, BusinessAccount, Destination, Mapping, MappingView, NewApp, NewBusinessAccount,
    NewDestination, NewPhoneNumber, PhoneNumber, PhoneNumberSummary, ResolvedDestination,
    UpsertMapping, sort_by_rank,
};

#[derive(Debug, Default)]
struct CatalogState {
    accounts: HashMap<String, BusinessAccount>,
    apps: HashMap<String, App>,
    phone_numbers: HashMap<String, PhoneNumber>,
    destinations: HashMap<i64, Destination>,
    mappings: Vec<Mapping>,
    next_destination_id: i64,
    next_mapping_id: i64,
}

impl CatalogState {
    fn destination(&self, id: i64) -> CatalogResult<&Destination> {
        self.destinations
            .get(&id)
            .ok_or_else(|| CatalogError::not_found("destination", id.to_string()))
    }
}

/// Destination catalog held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState {
                next_destination_id: 1,
                next_mapping_id: 1,
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl DestinationCatalog for InMemoryCatalog {
    async fn find_active_destinations(
        &self,
        phone_number_id: &str,
    ) -> CatalogResult<Vec<ResolvedDestination>> {
        let state = self.state.read().await;

        let Some(phone) = state.phone_numbers.get(phone_number_id) else {
            return Ok(Vec::new());
        };
        let Some(app) = state.apps.get(&phone.app_id) else {
            return Ok(Vec::new());
        };
        let Some(account) = state.accounts.get(&app.business_id) else {
            return Ok(Vec::new());
        };

        let mut resolved: Vec<ResolvedDestination> = state
            .mappings
            .iter()
            .filter(|m| m.phone_number_id == phone_number_id && m.is_active)
            .filter_map(|m| {
                let dest = state.destinations.get(&m.destination_id)?;
                dest.is_active.then(|| ResolvedDestination {
                    phone_number_id: phone.phone_number_id.clone(),
                    phone_number: phone.phone_number.clone(),
                    display_name: phone.display_name.clone(),
                    app_id: app.id.clone(),
                    app_name: app.name.clone(),
                    business_id: account.business_id.clone(),
                    business_name: account.name.clone(),
                    destination_id: dest.id,
                    destination_name: dest.name.clone(),
                    endpoint: dest.endpoint.clone(),
                    priority: m.priority,
                })
            })
            .collect();

        sort_by_rank(&mut resolved);
        Ok(resolved)
    }

    async fn find_app_by_verify_token(&self, verify_token: &str) -> CatalogResult<Option<App>> {
        let state = self.state.read().await;
        Ok(state
            .apps
            .values()
            .find(|app| app.verify_token == verify_token)
            .cloned())
    }

    async fn list_business_accounts(&self) -> CatalogResult<Vec<BusinessAccount>> {
        let state = self.state.read().await;
        let mut accounts: Vec<_> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    async fn create_business_account(
        &self,
        account: NewBusinessAccount,
    ) -> CatalogResult<BusinessAccount> {
        account.validate()?;
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.business_id) {
            return Err(CatalogError::conflict(format!(
                "business account {} already exists",
                account.business_id
            )));
        }
        let created = BusinessAccount {
            business_id: account.business_id,
            name: account.name,
            timezone: account.timezone,
            created_at: OffsetDateTime::now_utc(),
        };
        state
            .accounts
            .insert(created.business_id.clone(), created.clone());
        Ok(created)
    }

    async fn list_apps(&self, business_id: &str) -> CatalogResult<Vec<App>> {
        let state = self.state.read().await;
        if !state.accounts.contains_key(business_id) {
            return Err(CatalogError::not_found("business account", business_id));
        }
        let mut apps: Vec<_> = state
            .apps
            .values()
            .filter(|app| app.business_id == business_id)
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    async fn create_app(&self, app: NewApp) -> CatalogResult<App> {
        app.validate()?;
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&app.business_id) {
            return Err(CatalogError::not_found("business account", app.business_id));
        }
        if state.apps.contains_key(&app.id) {
            return Err(CatalogError::conflict(format!("app {} already exists", app.id)));
        }
        if state
            .apps
            .values()
            .any(|existing| existing.verify_token == app.verify_token)
        {
            return Err(CatalogError::conflict("verify_token is already in use"));
        }
        let created = App {
            id: app.id,
            business_id: app.business_id,
            name: app.name,
            verify_token: app.verify_token,
            created_at: OffsetDateTime::now_utc(),
        };
        state.apps.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn list_phone_numbers(&self, app_id: &str) -> CatalogResult<Vec<PhoneNumberSummary>> {
        let state = self.state.read().await;
        if !state.apps.contains_key(app_id) {
            return Err(CatalogError::not_found("app", app_id));
        }
        let mut numbers: Vec<_> = state
            .phone_numbers
            .values()
            .filter(|p| p.app_id == app_id)
            .map(|p| PhoneNumberSummary {
                destination_count: state
                    .mappings
                    .iter()
                    .filter(|m| m.phone_number_id == p.phone_number_id && m.is_active)
                    .count() as u32,
                phone_number: p.clone(),
            })
            .collect();
        numbers.sort_by(|a, b| {
            a.phone_number
                .phone_number_id
                .cmp(&b.phone_number.phone_number_id)
        });
        Ok(numbers)
    }

    async fn create_phone_number(
        &self,
        phone_number: NewPhoneNumber,
    ) -> CatalogResult<PhoneNumber> {
        phone_number.validate()?;
        let mut state = self.state.write().await;
        if !state.apps.contains_key(&phone_number.app_id) {
            return Err(CatalogError::not_found("app", phone_number.app_id));
        }
        if state
            .phone_numbers
            .contains_key(&phone_number.phone_number_id)
        {
            return Err(CatalogError::conflict(format!(
                "phone number {} already exists",
                phone_number.phone_number_id
            )));
        }
        let created = PhoneNumber {
            phone_number_id: phone_number.phone_number_id,
            app_id: phone_number.app_id,
            phone_number: phone_number.phone_number,
            display_name: phone_number.display_name,
            created_at: OffsetDateTime::now_utc(),
        };
        state
            .phone_numbers
            .insert(created.phone_number_id.clone(), created.clone());
        Ok(created)
    }

    async fn list_destinations(&self) -> CatalogResult<Vec<Destination>> {
        let state = self.state.read().await;
        let mut destinations: Vec<_> = state.destinations.values().cloned().collect();
        destinations.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(destinations)
    }

    async fn create_destination(&self, destination: NewDestination) -> CatalogResult<Destination> {
        destination.validate()?;
        let mut state = self.state.write().await;
        let id = state.next_destination_id;
        state.next_destination_id += 1;
        let created = Destination {
            id,
            name: destination.name,
            endpoint: destination.endpoint,
            description: destination.description,
            is_active: destination.is_active,
            created_at: OffsetDateTime::now_utc(),
        };
        state.destinations.insert(id, created.clone());
        Ok(created)
    }

    async fn set_destination_active(&self, id: i64, active: bool) -> CatalogResult<Destination> {
        let mut state = self.state.write().await;
        let dest = state
            .destinations
            .get_mut(&id)
            .ok_or_else(|| CatalogError::not_found("destination", id.to_string()))?;
        dest.is_active = active;
        Ok(dest.clone())
    }

    async fn upsert_mapping(&self, mapping: UpsertMapping) -> CatalogResult<Mapping> {
        mapping.validate()?;
        let mut state = self.state.write().await;
        if !state.phone_numbers.contains_key(&mapping.phone_number_id) {
            return Err(CatalogError::not_found(
                "phone number",
                mapping.phone_number_id,
            ));
        }
        state.destination(mapping.destination_id)?;

        let now = OffsetDateTime::now_utc();
        if let Some(existing) = state.mappings.iter_mut().find(|m| {
            m.phone_number_id == mapping.phone_number_id
                && m.destination_id == mapping.destination_id
        }) {
            existing.priority = mapping.priority;
            existing.is_active = true;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let id = state.next_mapping_id;
        state.next_mapping_id += 1;
        let created = Mapping {
            id,
            phone_number_id: mapping.phone_number_id,
            destination_id: mapping.destination_id,
            priority: mapping.priority,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.mappings.push(created.clone());
        Ok(created)
    }

    async fn deactivate_mapping(
        &self,
        phone_number_id: &str,
        destination_id: i64,
    ) -> CatalogResult<Option<Mapping>> {
        let mut state = self.state.write().await;
        let Some(existing) = state
            .mappings
            .iter_mut()
            .find(|m| m.phone_number_id == phone_number_id && m.destination_id == destination_id)
        else {
            return Ok(None);
        };
        existing.is_active = false;
        existing.updated_at = OffsetDateTime::now_utc();
        Ok(Some(existing.clone()))
    }

    async fn list_mappings(&self, phone_number_id: &str) -> CatalogResult<Vec<MappingView>> {
        let state = self.state.read().await;
        if !state.phone_numbers.contains_key(phone_number_id) {
            return Err(CatalogError::not_found("phone number", phone_number_id));
        }
        let mut views = Vec::new();
        for m in state
            .mappings
            .iter()
            .filter(|m| m.phone_number_id == phone_number_id)
        {
            let dest = state.destination(m.destination_id)?;
            views.push(MappingView {
                mapping_id: m.id,
                phone_number_id: m.phone_number_id.clone(),
                destination_id: dest.id,
                destination_name: dest.name.clone(),
                endpoint: dest.endpoint.clone(),
                priority: m.priority,
                is_active: m.is_active,
                destination_active: dest.is_active,
                updated_at: m.updated_at,
            });
        }
        views.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.destination_name.cmp(&b.destination_name))
        });
        Ok(views)
    }

    async fn ping(&self) -> CatalogResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (InMemoryCatalog, i64, i64) {
        let catalog = InMemoryCatalog::new();
        catalog
            .create_business_account(NewBusinessAccount {
                business_id: "123456789".into(),
                name: "Acme".into(),
                timezone: "UTC".into(),
            })
            .await
            .unwrap();
        catalog
            .create_app(NewApp {
                id: "promo-app".into(),
                business_id: "123456789".into(),
                name: "Promotions".into(),
                verify_token: "s3cret".into(),
            })
            .await
            .unwrap();
        catalog
            .create_phone_number(NewPhoneNumber {
                phone_number_id: "542491768952983".into(),
                app_id: "promo-app".into(),
                phone_number: "+1234567890".into(),
                display_name: Some("Main".into()),
            })
            .await
            .unwrap();
        let a = catalog
            .create_destination(NewDestination {
                name: "A".into(),
                endpoint: "https://a.example.com/hook".into(),
                description: None,
                is_active: true,
            })
            .await
            .unwrap();
        let b = catalog
            .create_destination(NewDestination {
                name: "B".into(),
                endpoint: "https://b.example.com/hook".into(),
                description: None,
                is_active: true,
            })
            .await
            .unwrap();
        (catalog, a.id, b.id)
    }

    fn upsert(destination_id: i64, priority: i32) -> UpsertMapping {
        UpsertMapping {
            phone_number_id: "542491768952983".into(),
            destination_id,
            priority,
        }
    }

    #[tokio::test]
    async fn test_find_active_destinations_orders_by_priority() {
        let (catalog, a, b) = seeded().await;
        catalog.upsert_mapping(upsert(b, 50)).await.unwrap();
        catalog.upsert_mapping(upsert(a, 100)).await.unwrap();

        let resolved = catalog
            .find_active_destinations("542491768952983")
            .await
            .unwrap();
        let names: Vec<_> = resolved.iter().map(|d| d.destination_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(resolved[0].business_name, "Acme");
        assert_eq!(resolved[0].app_name, "Promotions");
        assert_eq!(resolved[0].display_name.as_deref(), Some("Main"));
    }

    #[tokio::test]
    async fn test_unknown_identifier_resolves_empty() {
        let (catalog, _, _) = seeded().await;
        let resolved = catalog.find_active_destinations("nope").await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_mapping_and_destination_excluded() {
        let (catalog, a, b) = seeded().await;
        catalog.upsert_mapping(upsert(a, 100)).await.unwrap();
        catalog.upsert_mapping(upsert(b, 50)).await.unwrap();

        let removed = catalog
            .deactivate_mapping("542491768952983", a)
            .await
            .unwrap();
        assert!(removed.is_some_and(|m| !m.is_active));

        catalog.set_destination_active(b, false).await.unwrap();
        let resolved = catalog
            .find_active_destinations("542491768952983")
            .await
            .unwrap();
        assert!(resolved.is_empty());

        let views = catalog.list_mappings("542491768952983").await.unwrap();
        assert_eq!(views.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_updates_priority_and_reactivates() {
        let (catalog, a, _) = seeded().await;
        let first = catalog.upsert_mapping(upsert(a, 1)).await.unwrap();
        catalog
            .deactivate_mapping("542491768952983", a)
            .await
            .unwrap();
        let second = catalog.upsert_mapping(upsert(a, 7)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.priority, 7);
        assert!(second.is_active);
    }

    #[tokio::test]
    async fn test_upsert_requires_existing_references() {
        let (catalog, a, _) = seeded().await;
        let err = catalog
            .upsert_mapping(UpsertMapping {
                phone_number_id: "missing".into(),
                destination_id: a,
                priority: 0,
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = catalog.upsert_mapping(upsert(999, 0)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_deactivate_missing_mapping_returns_none() {
        let (catalog, a, _) = seeded().await;
        let result = catalog
            .deactivate_mapping("542491768952983", a)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_verify_token_conflicts() {
        let (catalog, _, _) = seeded().await;
        let err = catalog
            .create_app(NewApp {
                id: "other".into(),
                business_id: "123456789".into(),
                name: "Other".into(),
                verify_token: "s3cret".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict { .. }));

        let app = catalog.find_app_by_verify_token("s3cret").await.unwrap();
        assert_eq!(app.map(|a| a.id).as_deref(), Some("promo-app"));
    }

    #[tokio::test]
    async fn test_phone_number_summary_counts_active_mappings() {
        let (catalog, a, b) = seeded().await;
        catalog.upsert_mapping(upsert(a, 1)).await.unwrap();
        catalog.upsert_mapping(upsert(b, 1)).await.unwrap();
        catalog
            .deactivate_mapping("542491768952983", b)
            .await
            .unwrap();

        let numbers = catalog.list_phone_numbers("promo-app").await.unwrap();
        assert_eq!(numbers.len(), 1);
        assert_eq!(numbers[0].destination_count, 1);

        assert!(catalog.list_phone_numbers("missing").await.is_err());
    }
}
