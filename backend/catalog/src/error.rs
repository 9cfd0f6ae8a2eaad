use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unknown election: {0}")]
    UnknownElection(String),

    #[error("Constituency {constituency} is not part of election {election_id}")]
    UnknownConstituency {
        election_id: String,
        constituency: String,
    },

    #[error("Invalid catalog: {0}")]
    Invalid(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed catalog: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Failed to fetch remote catalog: {0}")]
    Remote(#[from] reqwest::Error),
}
