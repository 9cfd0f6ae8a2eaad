//! # Wizard
//!
//! The five step voting flow for a signed-in voter:
//!
//! 1. Select Election
//! 2. Choose Constituency
//! 3. Verify Identity
//! 4. Cast Vote
//! 5. Confirmation (OTP, then submission)
//!
//! [`transition`] holds every rule of the flow and performs no I/O. [`Wizard`]
//! wraps it with the catalog, the verification timer, the OTP service, the
//! ballot box and the session store.
pub mod auth;
pub mod ballot;
pub mod config;
pub mod error;
pub mod machine;
pub mod otp;
pub mod state;
pub mod store;
pub mod transition;
pub mod verification;

pub use auth::{AuthGate, VoterSession};
pub use ballot::{Ballot, BallotBox, Receipt, SimulatedBallotBox};
pub use config::WizardConfig;
pub use error::{ErrorKind, Notice, OtpError, StoreError, WizardError};
pub use machine::{
    Cached, FetchTicket, Fetched, PendingCandidates, PendingElections, Services, Wizard,
};
pub use otp::{ContactChannel, DeliveryId, OtpService, SimulatedOtp};
pub use state::{SessionState, Step};
pub use store::{FileStore, MemoryStore, SessionStore};
pub use transition::{Action, transition};
pub use verification::VerificationSimulator;
