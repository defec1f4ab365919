//! PostgreSQL implementation of [`DestinationCatalog`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookrelay_core::{
    App, BusinessAccount, CatalogError, CatalogResult, Destination, DestinationCatalog, Mapping,
    MappingView, NewApp, NewBusinessAccount, NewDestination, NewPhoneNumber, PhoneNumber,
    PhoneNumberSummary, ResolvedDestination, UpsertMapping,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use tracing::instrument;

use crate::convert::chrono_to_time;
use crate::error::{catalog_read_error, catalog_write_error};

type AccountRow = (String, String, String, DateTime<Utc>);
type AppRow = (String, String, String, String, DateTime<Utc>);
type PhoneRow = (String, String, String, Option<String>, DateTime<Utc>);
type DestinationRow = (i64, String, String, Option<String>, bool, DateTime<Utc>);
type MappingRow = (i64, String, i64, i32, bool, DateTime<Utc>, DateTime<Utc>);

const APP_COLUMNS: &str = "id, business_id, name, verify_token, created_at";
const DESTINATION_COLUMNS: &str = "id, name, endpoint, description, is_active, created_at";
const MAPPING_COLUMNS: &str =
    "id, phone_number_id, destination_id, priority, is_active, created_at, updated_at";

fn account_from_row(row: AccountRow) -> BusinessAccount {
    let (business_id, name, timezone, created_at) = row;
    BusinessAccount {
        business_id,
        name,
        timezone,
        created_at: chrono_to_time(created_at),
    }
}

fn app_from_row(row: AppRow) -> App {
    let (id, business_id, name, verify_token, created_at) = row;
    App {
        id,
        business_id,
        name,
        verify_token,
        created_at: chrono_to_time(created_at),
    }
}

fn phone_from_row(row: PhoneRow) -> PhoneNumber {
    let (phone_number_id, app_id, phone_number, display_name, created_at) = row;
    PhoneNumber {
        phone_number_id,
        app_id,
        phone_number,
        display_name,
        created_at: chrono_to_time(created_at),
    }
}

fn destination_from_row(row: DestinationRow) -> Destination {
    let (id, name, endpoint, description, is_active, created_at) = row;
    Destination {
        id,
        name,
        endpoint,
        description,
        is_active,
        created_at: chrono_to_time(created_at),
    }
}

fn mapping_from_row(row: MappingRow) -> Mapping {
    let (id, phone_number_id, destination_id, priority, is_active, created_at, updated_at) = row;
    Mapping {
        id,
        phone_number_id,
        destination_id,
        priority,
        is_active,
        created_at: chrono_to_time(created_at),
        updated_at: chrono_to_time(updated_at),
    }
}

/// Catalog backed by the routing tables of the initial schema.
#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    /// Creates a catalog over an existing pool. Migrations must already be applied.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, sql: &str, id: &str) -> CatalogResult<bool> {
        query_scalar::<_, bool>(sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(catalog_read_error)
    }

    async fn phone_number_exists(&self, phone_number_id: &str) -> CatalogResult<bool> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM phone_numbers WHERE phone_number_id = $1)",
            phone_number_id,
        )
        .await
    }
}

#[async_trait]
impl DestinationCatalog for PostgresCatalog {
    #[instrument(skip(self))]
    async fn find_active_destinations(
        &self,
        phone_number_id: &str,
    ) -> CatalogResult<Vec<ResolvedDestination>> {
        // COLLATE "C" keeps name ordering identical to byte-wise string ordering.
        let rows = query_as::<
            _,
            (
                String,
                String,
                Option<String>,
                String,
                String,
                String,
                String,
                i64,
                String,
                String,
                i32,
            ),
        >(
            r#"
            SELECT p.phone_number_id, p.phone_number, p.display_name,
                   a.id, a.name, b.business_id, b.name,
                   d.id, d.name, d.endpoint, m.priority
            FROM phone_number_destinations m
            JOIN phone_numbers p ON p.phone_number_id = m.phone_number_id
            JOIN apps a ON a.id = p.app_id
            JOIN business_accounts b ON b.business_id = a.business_id
            JOIN destinations d ON d.id = m.destination_id
            WHERE m.phone_number_id = $1
              AND m.is_active
              AND d.is_active
            ORDER BY m.priority DESC, d.name COLLATE "C" ASC, d.id ASC
            "#,
        )
        .bind(phone_number_id)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    phone_number_id,
                    phone_number,
                    display_name,
                    app_id,
                    app_name,
                    business_id,
                    business_name,
                    destination_id,
                    destination_name,
                    endpoint,
                    priority,
                )| ResolvedDestination {
                    phone_number_id,
                    phone_number,
                    display_name,
                    app_id,
                    app_name,
                    business_id,
                    business_name,
                    destination_id,
                    destination_name,
                    endpoint,
                    priority,
                },
            )
            .collect())
    }

    async fn find_app_by_verify_token(&self, verify_token: &str) -> CatalogResult<Option<App>> {
        let row = query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE verify_token = $1"
        ))
        .bind(verify_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(row.map(app_from_row))
    }

    async fn list_business_accounts(&self) -> CatalogResult<Vec<BusinessAccount>> {
        let rows = query_as::<_, AccountRow>(
            "SELECT business_id, name, timezone, created_at FROM business_accounts \
             ORDER BY name COLLATE \"C\"",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(rows.into_iter().map(account_from_row).collect())
    }

    #[instrument(skip(self, account), fields(business_id = %account.business_id))]
    async fn create_business_account(
        &self,
        account: NewBusinessAccount,
    ) -> CatalogResult<BusinessAccount> {
        account.validate()?;
        let row = query_as::<_, AccountRow>(
            "INSERT INTO business_accounts (business_id, name, timezone) VALUES ($1, $2, $3) \
             RETURNING business_id, name, timezone, created_at",
        )
        .bind(&account.business_id)
        .bind(&account.name)
        .bind(&account.timezone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| catalog_write_error(e, "business account", &account.business_id))?;

        Ok(account_from_row(row))
    }

    async fn list_apps(&self, business_id: &str) -> CatalogResult<Vec<App>> {
        if !self
            .exists(
                "SELECT EXISTS (SELECT 1 FROM business_accounts WHERE business_id = $1)",
                business_id,
            )
            .await?
        {
            return Err(CatalogError::not_found("business account", business_id));
        }

        let rows = query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE business_id = $1 ORDER BY name COLLATE \"C\""
        ))
        .bind(business_id)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(rows.into_iter().map(app_from_row).collect())
    }

    #[instrument(skip(self, app), fields(app_id = %app.id))]
    async fn create_app(&self, app: NewApp) -> CatalogResult<App> {
        app.validate()?;
        let row = query_as::<_, AppRow>(&format!(
            "INSERT INTO apps (id, business_id, name, verify_token) VALUES ($1, $2, $3, $4) \
             RETURNING {APP_COLUMNS}"
        ))
        .bind(&app.id)
        .bind(&app.business_id)
        .bind(&app.name)
        .bind(&app.verify_token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| catalog_write_error(e, "business account", &app.business_id))?;

        Ok(app_from_row(row))
    }

    async fn list_phone_numbers(&self, app_id: &str) -> CatalogResult<Vec<PhoneNumberSummary>> {
        if !self
            .exists("SELECT EXISTS (SELECT 1 FROM apps WHERE id = $1)", app_id)
            .await?
        {
            return Err(CatalogError::not_found("app", app_id));
        }

        let rows = query_as::<_, (String, String, String, Option<String>, DateTime<Utc>, i64)>(
            r#"
            SELECT p.phone_number_id, p.app_id, p.phone_number, p.display_name, p.created_at,
                   COUNT(m.id) FILTER (WHERE m.is_active) AS destination_count
            FROM phone_numbers p
            LEFT JOIN phone_number_destinations m ON m.phone_number_id = p.phone_number_id
            WHERE p.app_id = $1
            GROUP BY p.phone_number_id
            ORDER BY p.phone_number_id COLLATE "C"
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(rows
            .into_iter()
            .map(
                |(phone_number_id, app_id, phone_number, display_name, created_at, count)| {
                    PhoneNumberSummary {
                        phone_number: phone_from_row((
                            phone_number_id,
                            app_id,
                            phone_number,
                            display_name,
                            created_at,
                        )),
                        destination_count: u32::try_from(count).unwrap_or(u32::MAX),
                    }
                },
            )
            .collect())
    }

    #[instrument(skip(self, phone_number), fields(phone_number_id = %phone_number.phone_number_id))]
    async fn create_phone_number(
        &self,
        phone_number: NewPhoneNumber,
    ) -> CatalogResult<PhoneNumber> {
        phone_number.validate()?;
        let row = query_as::<_, PhoneRow>(
            "INSERT INTO phone_numbers (phone_number_id, app_id, phone_number, display_name) \
             VALUES ($1, $2, $3, $4) \
             RETURNING phone_number_id, app_id, phone_number, display_name, created_at",
        )
        .bind(&phone_number.phone_number_id)
        .bind(&phone_number.app_id)
        .bind(&phone_number.phone_number)
        .bind(&phone_number.display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| catalog_write_error(e, "app", &phone_number.app_id))?;

        Ok(phone_from_row(row))
    }

    async fn list_destinations(&self) -> CatalogResult<Vec<Destination>> {
        let rows = query_as::<_, DestinationRow>(&format!(
            "SELECT {DESTINATION_COLUMNS} FROM destinations ORDER BY name COLLATE \"C\", id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(rows.into_iter().map(destination_from_row).collect())
    }

    #[instrument(skip(self, destination), fields(name = %destination.name))]
    async fn create_destination(&self, destination: NewDestination) -> CatalogResult<Destination> {
        destination.validate()?;
        let row = query_as::<_, DestinationRow>(&format!(
            "INSERT INTO destinations (name, endpoint, description, is_active) \
             VALUES ($1, $2, $3, $4) RETURNING {DESTINATION_COLUMNS}"
        ))
        .bind(&destination.name)
        .bind(&destination.endpoint)
        .bind(&destination.description)
        .bind(destination.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(destination_from_row(row))
    }

    #[instrument(skip(self))]
    async fn set_destination_active(&self, id: i64, active: bool) -> CatalogResult<Destination> {
        let row = query_as::<_, DestinationRow>(&format!(
            "UPDATE destinations SET is_active = $2 WHERE id = $1 RETURNING {DESTINATION_COLUMNS}"
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        row.map(destination_from_row)
            .ok_or_else(|| CatalogError::not_found("destination", id.to_string()))
    }

    #[instrument(skip(self, mapping), fields(
        phone_number_id = %mapping.phone_number_id,
        destination_id = mapping.destination_id
    ))]
    async fn upsert_mapping(&self, mapping: UpsertMapping) -> CatalogResult<Mapping> {
        mapping.validate()?;
        if !self.phone_number_exists(&mapping.phone_number_id).await? {
            return Err(CatalogError::not_found(
                "phone number",
                mapping.phone_number_id,
            ));
        }

        let row = query_as::<_, MappingRow>(&format!(
            r#"
            INSERT INTO phone_number_destinations (phone_number_id, destination_id, priority, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (phone_number_id, destination_id)
            DO UPDATE SET priority = EXCLUDED.priority, is_active = TRUE, updated_at = NOW()
            RETURNING {MAPPING_COLUMNS}
            "#
        ))
        .bind(&mapping.phone_number_id)
        .bind(mapping.destination_id)
        .bind(mapping.priority)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| catalog_write_error(e, "destination", &mapping.destination_id.to_string()))?;

        Ok(mapping_from_row(row))
    }

    #[instrument(skip(self))]
    async fn deactivate_mapping(
        &self,
        phone_number_id: &str,
        destination_id: i64,
    ) -> CatalogResult<Option<Mapping>> {
        let row = query_as::<_, MappingRow>(&format!(
            "UPDATE phone_number_destinations SET is_active = FALSE, updated_at = NOW() \
             WHERE phone_number_id = $1 AND destination_id = $2 RETURNING {MAPPING_COLUMNS}"
        ))
        .bind(phone_number_id)
        .bind(destination_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(row.map(mapping_from_row))
    }

    async fn list_mappings(&self, phone_number_id: &str) -> CatalogResult<Vec<MappingView>> {
        if !self.phone_number_exists(phone_number_id).await? {
            return Err(CatalogError::not_found("phone number", phone_number_id));
        }

        let rows = query_as::<_, (i64, String, i64, String, String, i32, bool, bool, DateTime<Utc>)>(
            r#"
            SELECT m.id, m.phone_number_id, d.id, d.name, d.endpoint,
                   m.priority, m.is_active, d.is_active, m.updated_at
            FROM phone_number_destinations m
            JOIN destinations d ON d.id = m.destination_id
            WHERE m.phone_number_id = $1
            ORDER BY m.priority DESC, d.name COLLATE "C" ASC
            "#,
        )
        .bind(phone_number_id)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_read_error)?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    mapping_id,
                    phone_number_id,
                    destination_id,
                    destination_name,
                    endpoint,
                    priority,
                    is_active,
                    destination_active,
                    updated_at,
                )| MappingView {
                    mapping_id,
                    phone_number_id,
                    destination_id,
                    destination_name,
                    endpoint,
                    priority,
                    is_active,
                    destination_active,
                    updated_at: chrono_to_time(updated_at),
                },
            )
            .collect())
    }

    async fn ping(&self) -> CatalogResult<()> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(catalog_read_error)?;
        Ok(())
    }
}
