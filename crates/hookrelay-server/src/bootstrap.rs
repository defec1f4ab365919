//! Sample catalog data for first startup.
//!
//! Seeds one business account with an app, a phone number and two
//! destinations mapped at priorities 100 and 50. Skipped when any business
//! account already exists, so it is safe to leave enabled.

use hookrelay_core::{
    CatalogResult, DestinationCatalog, NewApp, NewBusinessAccount, NewDestination,
    NewPhoneNumber, UpsertMapping,
};
use hookrelay_routing::DestinationResolver;
use tracing::info;

pub const SAMPLE_BUSINESS_ID: &str = "123456789";
pub const SAMPLE_APP_ID: &str = "sample-app";
pub const SAMPLE_VERIFY_TOKEN: &str = "sample-verify-token";
pub const SAMPLE_PHONE_NUMBER_ID: &str = "542491768952983";

/// What the bootstrap created.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapStats {
    pub accounts: usize,
    pub apps: usize,
    pub phone_numbers: usize,
    pub destinations: usize,
    pub mappings: usize,
}

/// Inserts the sample data unless the catalog already has business accounts.
///
/// # Errors
///
/// Returns the first catalog error encountered.
pub async fn seed_sample_data(resolver: &DestinationResolver) -> CatalogResult<BootstrapStats> {
    let catalog = resolver.catalog();
    let mut stats = BootstrapStats::default();

    if !catalog.list_business_accounts().await?.is_empty() {
        info!("Sample data already exists, skipping");
        return Ok(stats);
    }

    catalog
        .create_business_account(NewBusinessAccount {
            business_id: SAMPLE_BUSINESS_ID.into(),
            name: "Sample Business".into(),
            timezone: "UTC".into(),
        })
        .await?;
    stats.accounts += 1;

    catalog
        .create_app(NewApp {
            id: SAMPLE_APP_ID.into(),
            business_id: SAMPLE_BUSINESS_ID.into(),
            name: "Sample App".into(),
            verify_token: SAMPLE_VERIFY_TOKEN.into(),
        })
        .await?;
    stats.apps += 1;

    catalog
        .create_phone_number(NewPhoneNumber {
            phone_number_id: SAMPLE_PHONE_NUMBER_ID.into(),
            app_id: SAMPLE_APP_ID.into(),
            phone_number: "+1234567890".into(),
            display_name: Some("Main Business Number".into()),
        })
        .await?;
    stats.phone_numbers += 1;

    let samples = [
        (
            "Promotion Service",
            "https://promotions.example.com/webhook",
            "Handles promotional campaigns",
            100,
        ),
        (
            "Appointment Service",
            "https://appointments.example.com/webhook",
            "Manages appointment bookings",
            50,
        ),
    ];

    for (name, endpoint, description, priority) in samples {
        let destination = create_destination(catalog.as_ref(), name, endpoint, description).await?;
        stats.destinations += 1;

        resolver
            .upsert_mapping(UpsertMapping {
                phone_number_id: SAMPLE_PHONE_NUMBER_ID.into(),
                destination_id: destination,
                priority,
            })
            .await?;
        stats.mappings += 1;
    }

    info!(
        accounts = stats.accounts,
        destinations = stats.destinations,
        mappings = stats.mappings,
        "Sample data inserted"
    );
    Ok(stats)
}

async fn create_destination(
    catalog: &dyn DestinationCatalog,
    name: &str,
    endpoint: &str,
    description: &str,
) -> CatalogResult<i64> {
    let created = catalog
        .create_destination(NewDestination {
            name: name.into(),
            endpoint: endpoint.into(),
            description: Some(description.into()),
            is_active: true,
        })
        .await?;
    Ok(created.id)
}
