//! # Catalog
//!
//! Read side of the voting wizard: which elections exist and who stands where.
//!
//! ## Sources
//!
//! - Built-in bank: the demonstration data set (`ge2024`, `mh2024`)
//! - File bank: JSON file with the same shape as [`CatalogBank`]
//! - Remote bank: the same JSON served over HTTP, fetched once at startup
//!
//! Whatever the source, the data is served through [`BankCatalog`] which adds
//! the simulated fetch latency the front end was built around.
//!
//! ## NOTA
//!
//! Every candidate list ends with exactly one "None of the Above" entry. The
//! upstream data may or may not contain one; [`seal_with_nota`] normalises it.
//! Display filters never hide it.
use async_trait::async_trait;

pub mod bank;
pub mod error;
pub mod models;
pub mod remote;
pub mod utils;

pub use bank::{BankCatalog, CatalogBank};
pub use error::CatalogError;
pub use models::{Candidate, CandidateEntry, Election, ElectionStatus, NOTA_ID};
pub use remote::get_remote_bank;
pub use utils::{filter_candidates, filter_constituencies, seal_with_nota};

#[async_trait]
pub trait ElectionCatalog: Send + Sync {
    async fn list_elections(&self) -> Result<Vec<Election>, CatalogError>;
}

/// Candidates for one (election, constituency) pair. Implementations must
/// return the NOTA sentinel as the last entry.
#[async_trait]
pub trait CandidateCatalog: Send + Sync {
    async fn list_candidates(
        &self,
        election_id: &str,
        constituency: &str,
    ) -> Result<Vec<Candidate>, CatalogError>;
}
