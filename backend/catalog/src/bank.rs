use std::{
    collections::HashSet,
    fs,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    CandidateCatalog,
    ElectionCatalog,
    error::CatalogError,
    models::{Candidate, CandidateEntry, Election, ElectionStatus},
    utils::seal_with_nota,
};

/// Serializable snapshot of every election and candidate the platform knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogBank {
    pub elections: Vec<Election>,
    #[serde(default)]
    pub candidates: Vec<CandidateEntry>,
}

impl CatalogBank {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let data = fs::read(path.as_ref())?;
        let bank: Self = serde_json::from_slice(&data)?;
        bank.validate()?;

        info!(
            "Loaded catalog from {}: {} elections, {} candidates",
            path.as_ref().display(),
            bank.elections.len(),
            bank.candidates.len()
        );

        Ok(bank)
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), CatalogError> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut ids = HashSet::new();

        for election in &self.elections {
            if !ids.insert(election.id.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate election id {}",
                    election.id
                )));
            }

            let unique: HashSet<&String> = election.constituencies.iter().collect();
            if unique.len() != election.constituencies.len() {
                return Err(CatalogError::Invalid(format!(
                    "duplicate constituency in election {}",
                    election.id
                )));
            }
        }

        let mut candidate_ids = HashSet::new();
        for candidate in &self.candidates {
            if !candidate_ids.insert(candidate.id.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate candidate id {}",
                    candidate.id
                )));
            }
        }

        Ok(())
    }

    pub fn election(&self, election_id: &str) -> Option<&Election> {
        self.elections.iter().find(|e| e.id == election_id)
    }

    /// Candidates standing in `constituency` of `election_id`, sealed with NOTA.
    pub fn candidates_for(
        &self,
        election_id: &str,
        constituency: &str,
    ) -> Result<Vec<Candidate>, CatalogError> {
        let election = self
            .election(election_id)
            .ok_or_else(|| CatalogError::UnknownElection(election_id.to_string()))?;

        if !election.has_constituency(constituency) {
            return Err(CatalogError::UnknownConstituency {
                election_id: election_id.to_string(),
                constituency: constituency.to_string(),
            });
        }

        let candidates = self
            .candidates
            .iter()
            .filter(|entry| entry.stands_in(election_id))
            .map(|entry| entry.for_constituency(constituency))
            .collect();

        Ok(seal_with_nota(candidates, constituency))
    }

    /// The demonstration data set the voting front end ships with.
    pub fn builtin() -> Self {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default();
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();

        let elections = vec![
            Election {
                id: "ge2024".into(),
                title: "General Elections 2024".into(),
                date: date(2024, 5, 15),
                constituencies: names(&[
                    "Mumbai North",
                    "Mumbai South",
                    "Delhi East",
                    "Delhi West",
                    "Bangalore Central",
                ]),
                kind: "Parliamentary".into(),
                status: ElectionStatus::Ongoing,
            },
            Election {
                id: "mh2024".into(),
                title: "Maharashtra State Elections 2024".into(),
                date: date(2024, 6, 20),
                constituencies: names(&["Andheri", "Borivali", "Juhu", "Bandra"]),
                kind: "Assembly".into(),
                status: ElectionStatus::Upcoming,
            },
        ];

        let entry = |id: &str, name: &str, party: &str, symbol: &str, photo: &str, logo: &str| {
            CandidateEntry {
                id: id.into(),
                name: name.into(),
                party: party.into(),
                symbol: Some(symbol.to_string()).filter(|s| !s.is_empty()),
                party_logo: Some(logo.to_string()).filter(|s| !s.is_empty()),
                photo_url: photo.into(),
                elections: Vec::new(),
            }
        };

        let candidates = vec![
            entry(
                "c1",
                "Rajesh Kumar",
                "Bharatiya Janata Party",
                "🪷",
                "/images/candidates/c1.webp",
                "https://logos-world.net/wp-content/uploads/2022/06/BJP-Logo-700x394.png",
            ),
            entry(
                "c2",
                "Priya Singh",
                "Indian National Congress",
                "✋",
                "https://www.imageshine.in/uploads/gallery/Priyanka-Gandhi-Vadra-Png.png",
                "https://upload.wikimedia.org/wikipedia/commons/thumb/6/6c/Indian_National_Congress_hand_logo.svg/300px-Indian_National_Congress_hand_logo.svg.png",
            ),
            entry(
                "c3",
                "Amit Patel",
                "Aam Aadmi Party",
                "🧹",
                "/images/candidates/c3.jpg",
                "https://bsmedia.business-standard.com/_media/bs/img/article/2022-11/16/full/1668586087-9156.jpg",
            ),
            entry(
                "c4",
                "Sunita Verma",
                "Shiv Sena",
                "🏹",
                "/images/candidates/c4.jpg",
                "https://upload.wikimedia.org/wikipedia/commons/thumb/e/ef/Logo_of_Shiv_Sena.svg/1200px-Logo_of_Shiv_Sena.svg.png",
            ),
            entry(
                "c5",
                "Mohammed Khan",
                "Nationalist Congress Party",
                "⏰",
                "/images/candidates/c5.jpg",
                "https://www.flagcolorcodes.com/data/Flag-of-Nationalist-Congress-Party.png",
            ),
            entry(
                "c6",
                "NOTA",
                "None of the Above",
                "",
                "https://upload.wikimedia.org/wikipedia/commons/thumb/f/f6/NOTA_Option_Logo.svg/440px-NOTA_Option_Logo.svg.png",
                "",
            ),
        ];

        Self {
            elections,
            candidates,
        }
    }
}

/// Catalog provider serving a [`CatalogBank`] with simulated network latency.
pub struct BankCatalog {
    bank: CatalogBank,
    election_latency: Duration,
    candidate_latency: Duration,
    failures: AtomicUsize,
}

impl BankCatalog {
    pub fn new(bank: CatalogBank) -> Self {
        Self {
            bank,
            election_latency: Duration::ZERO,
            candidate_latency: Duration::ZERO,
            failures: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, elections: Duration, candidates: Duration) -> Self {
        self.election_latency = elections;
        self.candidate_latency = candidates;
        self
    }

    /// Makes the next `count` fetches fail with [`CatalogError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ElectionCatalog for BankCatalog {
    async fn list_elections(&self) -> Result<Vec<Election>, CatalogError> {
        sleep(self.election_latency).await;

        if self.take_failure() {
            warn!("Election catalog fetch failed (injected)");
            return Err(CatalogError::Unavailable("election catalog timed out".into()));
        }

        debug!("Serving {} elections", self.bank.elections.len());
        Ok(self.bank.elections.clone())
    }
}

#[async_trait]
impl CandidateCatalog for BankCatalog {
    async fn list_candidates(
        &self,
        election_id: &str,
        constituency: &str,
    ) -> Result<Vec<Candidate>, CatalogError> {
        sleep(self.candidate_latency).await;

        if self.take_failure() {
            warn!("Candidate catalog fetch failed (injected)");
            return Err(CatalogError::Unavailable("candidate catalog timed out".into()));
        }

        let candidates = self.bank.candidates_for(election_id, constituency)?;
        debug!(
            "Serving {} candidates for {election_id}/{constituency}",
            candidates.len()
        );

        Ok(candidates)
    }
}
