use std::{
    sync::{
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::WizardError;

pub const CONFIRMATION_ID_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub election_id: String,
    pub constituency: String,
    pub candidate_id: String,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub confirmation_id: String,
    pub submitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait BallotBox: Send + Sync {
    async fn submit(&self, ballot: &Ballot) -> Result<Receipt, WizardError>;
}

pub fn confirmation_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONFIRMATION_ID_LENGTH)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

/// Accepts every ballot after a fixed delay. Nothing is tallied.
pub struct SimulatedBallotBox {
    latency: Duration,
    failures: AtomicUsize,
    received: Mutex<Vec<Ballot>>,
}

impl SimulatedBallotBox {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failures: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Ballot> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BallotBox for SimulatedBallotBox {
    async fn submit(&self, ballot: &Ballot) -> Result<Receipt, WizardError> {
        sleep(self.latency).await;

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            warn!("Ballot box rejected submission (injected)");
            return Err(WizardError::Submission("ballot box unavailable".into()));
        }

        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ballot.clone());

        let receipt = Receipt {
            confirmation_id: confirmation_id(),
            submitted_at: Utc::now(),
        };

        info!(
            "Ballot for {}/{} accepted, confirmation {}",
            ballot.election_id, ballot.constituency, receipt.confirmation_id
        );

        Ok(receipt)
    }
}
