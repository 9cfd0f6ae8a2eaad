use reqwest::get;
use tracing::info;

use crate::{bank::CatalogBank, error::CatalogError};

/// Downloads a JSON catalog bank published at `url`.
pub async fn get_remote_bank(url: &str) -> Result<CatalogBank, CatalogError> {
    info!("Fetching catalog bank from {url}");

    let response = get(url).await?.error_for_status()?;
    let bytes = response.bytes().await?;

    let bank: CatalogBank = serde_json::from_slice(&bytes)?;
    bank.validate()?;

    info!(
        "Loaded remote catalog: {} elections, {} candidates",
        bank.elections.len(),
        bank.candidates.len()
    );

    Ok(bank)
}
