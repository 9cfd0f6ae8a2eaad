//! # Wizard
//!
//! Drives one voter session through the five steps, owning everything the
//! pure [`transition`] function does not: catalog fetches, the verification
//! timer, OTP round-trips, ballot submission and persistence.
//!
//! ## Commit order
//!
//! 1. Compute the next state with [`transition`] (rejections change nothing)
//! 2. Run the entry action of the step being entered (a failed fetch aborts)
//! 3. Save the next state to the [`SessionStore`]
//! 4. Adopt it in memory
//!
//! ## In-flight fetches
//!
//! [`Wizard::pending_elections`] and [`Wizard::pending_candidates`] hand out a
//! fetch bound to a [`FetchTicket`]. The wizard bumps its epoch whenever the
//! voter goes back or changes an upstream selection, so results that land
//! afterwards are refused with [`WizardError::Stale`].
//!
//! ## Submission
//!
//! The ballot is handed to a spawned task the wizard keeps hold of. A caller
//! that stops waiting (a dropped request) leaves the task running, and its
//! outcome is applied by the next call that touches the wizard.
use std::sync::Arc;

use catalog::{
    Candidate, CandidateCatalog, CatalogError, Election, ElectionCatalog, filter_candidates,
    filter_constituencies,
};
use chrono::Utc;
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
};
use tracing::{debug, info, warn};

use crate::{
    auth::AuthGate,
    ballot::{Ballot, BallotBox, Receipt},
    config::WizardConfig,
    error::{Notice, OtpError, StoreError, WizardError},
    otp::{ContactChannel, DeliveryId, OtpService, is_well_formed},
    state::{SessionState, Step},
    store::SessionStore,
    transition::{Action, transition},
    verification::{COMPLETE, VerificationSimulator},
};

/// Collaborators a wizard talks to.
#[derive(Clone)]
pub struct Services {
    pub elections: Arc<dyn ElectionCatalog>,
    pub candidates: Arc<dyn CandidateCatalog>,
    pub otp: Arc<dyn OtpService>,
    pub ballot_box: Arc<dyn BallotBox>,
    pub store: Arc<dyn SessionStore>,
}

/// Last successfully fetched list. `stale` is set when a refresh failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached<T> {
    pub items: Vec<T>,
    pub stale: bool,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            stale: false,
        }
    }
}

impl<T> Cached<T> {
    fn fresh(items: Vec<T>) -> Self {
        Self {
            items,
            stale: false,
        }
    }

    fn needs_fetch(&self) -> bool {
        self.items.is_empty() || self.stale
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub election_id: String,
    pub constituency: String,
}

impl Scope {
    fn of(state: &SessionState) -> Option<Self> {
        Some(Self {
            election_id: state.election_id()?.to_string(),
            constituency: state.constituency.clone()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    epoch: u64,
    step: Step,
    scope: Option<Scope>,
}

pub struct Fetched<T> {
    ticket: FetchTicket,
    outcome: Result<Vec<T>, CatalogError>,
}

pub struct PendingElections {
    ticket: FetchTicket,
    catalog: Arc<dyn ElectionCatalog>,
}

impl PendingElections {
    pub fn ticket(&self) -> &FetchTicket {
        &self.ticket
    }

    pub async fn fetch(self) -> Fetched<Election> {
        Fetched {
            outcome: self.catalog.list_elections().await,
            ticket: self.ticket,
        }
    }
}

pub struct PendingCandidates {
    ticket: FetchTicket,
    scope: Scope,
    catalog: Arc<dyn CandidateCatalog>,
}

impl PendingCandidates {
    pub fn ticket(&self) -> &FetchTicket {
        &self.ticket
    }

    pub async fn fetch(self) -> Fetched<Candidate> {
        Fetched {
            outcome: self
                .catalog
                .list_candidates(&self.scope.election_id, &self.scope.constituency)
                .await,
            ticket: self.ticket,
        }
    }
}

pub struct Wizard {
    session_id: String,
    contact: Option<ContactChannel>,
    services: Services,
    config: WizardConfig,
    state: SessionState,
    elections: Cached<Election>,
    candidates: Cached<Candidate>,
    candidate_scope: Option<Scope>,
    verification: VerificationSimulator,
    constituency_filter: String,
    candidate_filter: String,
    last_error: Option<Notice>,
    epoch: u64,
    submission: Option<JoinHandle<Result<Receipt, WizardError>>>,
}

impl Wizard {
    /// Loads (or starts) the session of the signed-in voter and runs the entry
    /// action of the step it is on.
    ///
    /// A persisted session that is unreadable or inconsistent is discarded and
    /// the wizard starts over at step 1 with a [`WizardError::StateCorruption`]
    /// notice.
    pub async fn resume(
        auth: &dyn AuthGate,
        services: Services,
        config: WizardConfig,
    ) -> Result<Self, WizardError> {
        if !auth.is_authenticated() {
            return Err(WizardError::Unauthenticated);
        }

        let session_id = auth.session_id().to_string();
        let (state, notice) = rehydrate(&session_id, services.store.as_ref()).await?;

        let verification = if state.identity_verified {
            VerificationSimulator::completed(config.verification_tick, config.verification_step)
        } else {
            VerificationSimulator::new(config.verification_tick, config.verification_step)
        };

        let mut wizard = Self {
            session_id,
            contact: auth.contact_channel().cloned(),
            services,
            config,
            state,
            elections: Cached::default(),
            candidates: Cached::default(),
            candidate_scope: None,
            verification,
            constituency_filter: String::new(),
            candidate_filter: String::new(),
            last_error: notice,
            epoch: 0,
            submission: None,
        };

        if let Err(e) = wizard.enter_current().await {
            wizard.last_error = Some(Notice::from(&e));
        }

        Ok(wizard)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn step(&self) -> Step {
        self.state.step
    }

    pub fn elections(&self) -> &Cached<Election> {
        &self.elections
    }

    pub fn candidates(&self) -> &Cached<Candidate> {
        &self.candidates
    }

    pub fn last_error(&self) -> Option<&Notice> {
        self.last_error.as_ref()
    }

    pub fn confirmation_id(&self) -> Option<&str> {
        self.state.confirmation_id.as_deref()
    }

    pub fn constituency_filter(&self) -> &str {
        &self.constituency_filter
    }

    pub fn candidate_filter(&self) -> &str {
        &self.candidate_filter
    }

    pub fn set_constituency_filter(&mut self, query: impl Into<String>) {
        self.constituency_filter = query.into();
    }

    pub fn set_candidate_filter(&mut self, query: impl Into<String>) {
        self.candidate_filter = query.into();
    }

    /// Constituencies of the selected election matching the current filter.
    pub fn visible_constituencies(&self) -> Vec<&str> {
        self.state
            .selected_election
            .as_ref()
            .map(|e| filter_constituencies(&e.constituencies, &self.constituency_filter))
            .unwrap_or_default()
    }

    /// Cached candidates matching the current filter. NOTA is always last.
    pub fn visible_candidates(&self) -> Vec<&Candidate> {
        filter_candidates(&self.candidates.items, &self.candidate_filter)
    }

    pub fn verification_progress(&self) -> u8 {
        if self.state.identity_verified {
            COMPLETE
        } else {
            self.verification.progress()
        }
    }

    pub fn is_verifying(&self) -> bool {
        self.verification.is_running()
    }

    pub fn verification_updates(&self) -> watch::Receiver<u8> {
        self.verification.subscribe()
    }

    /// Whether a ballot has been handed over and its outcome is not yet applied.
    pub fn is_submitting(&self) -> bool {
        self.submission.is_some()
    }

    pub async fn select_election(&mut self, election_id: &str) -> Result<(), WizardError> {
        let result = self.try_select_election(election_id).await;
        self.settle(result)
    }

    pub async fn select_constituency(&mut self, name: &str) -> Result<(), WizardError> {
        let result = self
            .commit(Action::SelectConstituency(name.to_string()))
            .await;
        self.settle(result)
    }

    pub async fn select_candidate(&mut self, candidate_id: &str) -> Result<(), WizardError> {
        let result = self.try_select_candidate(candidate_id).await;
        self.settle(result)
    }

    pub async fn next(&mut self) -> Result<(), WizardError> {
        let result = self.try_next().await;
        self.settle(result)
    }

    pub async fn back(&mut self) -> Result<(), WizardError> {
        let result = self.try_back().await;
        self.settle(result)
    }

    /// Re-runs the entry action of the current step, ignoring cached data.
    pub async fn reload(&mut self) -> Result<(), WizardError> {
        let result = self.try_reload().await;
        self.settle(result)
    }

    /// Records a finished identity check or submission. Returns whether
    /// identity is verified.
    pub async fn sync_verification(&mut self) -> Result<bool, WizardError> {
        self.absorb_submission().await;
        match self.absorb_verification().await {
            Ok(()) => Ok(self.state.identity_verified),
            Err(e) => self.settle(Err(e)),
        }
    }

    pub async fn wait_for_verification(&mut self) -> Result<(), WizardError> {
        let result = self.try_wait_for_verification().await;
        self.settle(result)
    }

    pub async fn send_code(&mut self) -> Result<DeliveryId, WizardError> {
        let result = self.try_send_code().await;
        self.settle(result)
    }

    pub async fn verify_code(&mut self, code: &str) -> Result<(), WizardError> {
        let result = self.try_verify_code(code).await;
        self.settle(result)
    }

    /// Submits the ballot and returns the confirmation id.
    ///
    /// Calling it again while an earlier submission is still running waits
    /// for that submission instead of casting a second ballot.
    pub async fn confirm_vote(&mut self) -> Result<String, WizardError> {
        let result = self.try_confirm_vote().await;
        self.settle(result)
    }

    pub async fn reset_voting(&mut self) -> Result<(), WizardError> {
        let result = self.try_reset().await;
        self.settle(result)
    }

    /// Forgets the stored session and stops the verification timer. A ballot
    /// already handed over is left to finish.
    pub async fn discard(&mut self) -> Result<(), WizardError> {
        self.verification.cancel();
        self.services.store.clear(&self.session_id).await?;
        info!("Discarded session {}", self.session_id);
        Ok(())
    }

    pub fn pending_elections(&self) -> Result<PendingElections, WizardError> {
        if self.state.step != Step::SelectElection {
            return Err(WizardError::Validation(
                "Elections are only listed on the first step".into(),
            ));
        }

        Ok(PendingElections {
            ticket: self.ticket(),
            catalog: self.services.elections.clone(),
        })
    }

    pub fn pending_candidates(&self) -> Result<PendingCandidates, WizardError> {
        if self.state.step != Step::CastVote {
            return Err(WizardError::Validation(
                "Candidates are only listed on the voting step".into(),
            ));
        }
        let scope = Scope::of(&self.state).ok_or_else(|| {
            WizardError::Validation("Please select your constituency first".into())
        })?;

        Ok(PendingCandidates {
            ticket: self.ticket(),
            scope,
            catalog: self.services.candidates.clone(),
        })
    }

    pub fn apply_elections(&mut self, fetched: Fetched<Election>) -> Result<(), WizardError> {
        let result = self.try_apply_elections(fetched);
        self.settle(result)
    }

    pub fn apply_candidates(&mut self, fetched: Fetched<Candidate>) -> Result<(), WizardError> {
        let result = self.try_apply_candidates(fetched);
        self.settle(result)
    }

    async fn try_select_election(&mut self, election_id: &str) -> Result<(), WizardError> {
        let election = self
            .elections
            .items
            .iter()
            .find(|e| e.id == election_id)
            .cloned()
            .ok_or_else(|| WizardError::Validation(format!("Unknown election {election_id}")))?;

        self.commit(Action::SelectElection(election)).await
    }

    async fn try_select_candidate(&mut self, candidate_id: &str) -> Result<(), WizardError> {
        let candidate = self
            .candidates
            .items
            .iter()
            .find(|c| c.id == candidate_id)
            .cloned()
            .ok_or_else(|| {
                WizardError::Validation(format!("Unknown candidate {candidate_id}"))
            })?;

        self.commit(Action::SelectCandidate(candidate)).await
    }

    async fn try_next(&mut self) -> Result<(), WizardError> {
        self.absorb_submission().await;
        self.absorb_verification().await?;

        let next = transition(&self.state, Action::Next)?;
        if next.step == Step::CastVote {
            if let Some(scope) = Scope::of(&next) {
                self.ensure_candidates(scope).await?;
            }
        }

        self.save_and_adopt(next).await?;
        self.after_entry();

        Ok(())
    }

    async fn try_back(&mut self) -> Result<(), WizardError> {
        self.absorb_submission().await;
        let previous = transition(&self.state, Action::Back)?;
        if previous.step == Step::SelectElection {
            self.ensure_elections().await?;
        }

        self.save_and_adopt(previous).await?;
        self.after_entry();

        Ok(())
    }

    async fn try_reload(&mut self) -> Result<(), WizardError> {
        match self.state.step {
            Step::SelectElection => {
                let fetched = self.pending_elections()?.fetch().await;
                self.try_apply_elections(fetched)
            }
            Step::CastVote => {
                let fetched = self.pending_candidates()?.fetch().await;
                self.try_apply_candidates(fetched)
            }
            Step::VerifyIdentity => {
                self.verification.start();
                self.absorb_verification().await
            }
            Step::SelectConstituency | Step::Confirm => Ok(()),
        }
    }

    async fn try_wait_for_verification(&mut self) -> Result<(), WizardError> {
        if self.state.identity_verified {
            return Ok(());
        }
        if self.state.step != Step::VerifyIdentity {
            return Err(WizardError::Validation(
                "Identity verification has not started".into(),
            ));
        }

        self.verification.start();
        self.verification.wait().await;

        self.absorb_verification().await
    }

    async fn try_send_code(&mut self) -> Result<DeliveryId, WizardError> {
        let contact = self
            .contact
            .clone()
            .ok_or_else(|| OtpError::Delivery("no contact channel on file".into()))?;

        // Reject before dispatching anything the wizard would then refuse.
        transition(&self.state, Action::OtpSent(DeliveryId::from("")))?;

        let delivery = self.services.otp.send_code(&self.session_id, &contact).await?;
        self.commit(Action::OtpSent(delivery.clone())).await?;

        Ok(delivery)
    }

    async fn try_verify_code(&mut self, code: &str) -> Result<(), WizardError> {
        transition(&self.state, Action::OtpVerified)?;
        if self.state.otp_verified {
            return Ok(());
        }

        if !is_well_formed(code) {
            return Err(OtpError::InvalidCode.into());
        }

        let delivery = self.state.otp_delivery.clone().ok_or(OtpError::NotSent)?;
        if !self.services.otp.verify_code(&delivery, code).await? {
            return Err(OtpError::InvalidCode.into());
        }

        info!("OTP verified for session {}", self.session_id);
        self.commit(Action::OtpVerified).await
    }

    async fn try_confirm_vote(&mut self) -> Result<String, WizardError> {
        if self.submission.is_none() {
            let ballot = self.ballot()?;
            self.commit(Action::ConfirmVote).await?;

            info!("Submitting ballot for session {}", self.session_id);

            let ballot_box = self.services.ballot_box.clone();
            self.submission = Some(tokio::spawn(async move { ballot_box.submit(&ballot).await }));
        }

        let joined = match self.submission.as_mut() {
            Some(handle) => handle.await,
            None => return Err(WizardError::SubmissionInProgress),
        };
        self.submission = None;

        self.finish_submission(joined).await
    }

    async fn finish_submission(
        &mut self,
        joined: Result<Result<Receipt, WizardError>, JoinError>,
    ) -> Result<String, WizardError> {
        let outcome = joined.unwrap_or_else(|e| Err(WizardError::Submission(e.to_string())));

        match outcome {
            Ok(receipt) => {
                let done = transition(
                    &self.state,
                    Action::Submitted {
                        confirmation_id: receipt.confirmation_id.clone(),
                    },
                )?;
                // Adopted before saving, the ballot is in whatever the store says.
                self.adopt(done);
                if let Err(e) = self.services.store.save(&self.session_id, &self.state).await {
                    warn!("Ballot accepted but session {} not saved: {e}", self.session_id);
                }

                Ok(receipt.confirmation_id)
            }
            Err(e) => {
                warn!("Submission failed for session {}: {e}", self.session_id);

                let rolled_back = transition(&self.state, Action::SubmissionFailed)?;
                self.adopt(rolled_back);
                let saved = self.services.store.save(&self.session_id, &self.state).await;
                if let Err(store_err) = saved {
                    warn!("Failed to persist session {}: {store_err}", self.session_id);
                }

                Err(e)
            }
        }
    }

    /// Applies the outcome of a submission whose caller stopped waiting, once
    /// it has finished.
    async fn absorb_submission(&mut self) {
        if !self.submission.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        let Some(handle) = self.submission.take() else {
            return;
        };

        match self.finish_submission(handle.await).await {
            Ok(id) => info!("Session {} recorded ballot {id}", self.session_id),
            Err(e) => debug!("Session {} ballot came back with: {e}", self.session_id),
        }
    }

    async fn try_reset(&mut self) -> Result<(), WizardError> {
        self.absorb_submission().await;
        let fresh = transition(&self.state, Action::Reset)?;
        self.services.store.clear(&self.session_id).await?;

        self.verification =
            VerificationSimulator::new(self.config.verification_tick, self.config.verification_step);
        self.candidates = Cached::default();
        self.candidate_scope = None;
        self.constituency_filter.clear();
        self.candidate_filter.clear();
        self.epoch += 1;
        self.state = fresh;

        info!("Session {} reset to step 1", self.session_id);

        self.ensure_elections().await
    }

    fn try_apply_elections(&mut self, fetched: Fetched<Election>) -> Result<(), WizardError> {
        self.check_ticket(&fetched.ticket)?;

        match fetched.outcome {
            Ok(items) => {
                debug!("Loaded {} elections", items.len());
                self.elections = Cached::fresh(items);
                Ok(())
            }
            Err(e) => {
                warn!("Election catalog unavailable: {e}");
                self.elections.stale = true;
                Err(e.into())
            }
        }
    }

    fn try_apply_candidates(&mut self, fetched: Fetched<Candidate>) -> Result<(), WizardError> {
        self.check_ticket(&fetched.ticket)?;

        match fetched.outcome {
            Ok(items) => {
                debug!("Loaded {} candidates", items.len());
                self.candidates = Cached::fresh(items);
                self.candidate_scope = fetched.ticket.scope;
                Ok(())
            }
            Err(e) => {
                warn!("Candidate catalog unavailable: {e}");
                self.candidates.stale = true;
                Err(e.into())
            }
        }
    }

    async fn enter_current(&mut self) -> Result<(), WizardError> {
        match self.state.step {
            Step::SelectElection => self.ensure_elections().await,
            Step::CastVote => match Scope::of(&self.state) {
                Some(scope) => self.ensure_candidates(scope).await,
                None => Ok(()),
            },
            _ => {
                self.after_entry();
                Ok(())
            }
        }
    }

    /// Entry work that cannot fail and so runs after the step is committed.
    fn after_entry(&mut self) {
        if self.state.step == Step::VerifyIdentity && !self.state.identity_verified {
            self.verification.start();
        }
    }

    async fn ensure_elections(&mut self) -> Result<(), WizardError> {
        if !self.elections.needs_fetch() {
            return Ok(());
        }

        match self.services.elections.list_elections().await {
            Ok(items) => {
                debug!("Loaded {} elections", items.len());
                self.elections = Cached::fresh(items);
                Ok(())
            }
            Err(e) => {
                warn!("Election catalog unavailable: {e}");
                self.elections.stale = true;
                Err(e.into())
            }
        }
    }

    async fn ensure_candidates(&mut self, scope: Scope) -> Result<(), WizardError> {
        if self.candidate_scope.as_ref() == Some(&scope) && !self.candidates.needs_fetch() {
            return Ok(());
        }

        match self
            .services
            .candidates
            .list_candidates(&scope.election_id, &scope.constituency)
            .await
        {
            Ok(items) => {
                debug!(
                    "Loaded {} candidates for {}/{}",
                    items.len(),
                    scope.election_id,
                    scope.constituency
                );
                self.candidates = Cached::fresh(items);
                self.candidate_scope = Some(scope);
                Ok(())
            }
            Err(e) => {
                warn!("Candidate catalog unavailable: {e}");
                self.candidates.stale = true;
                Err(e.into())
            }
        }
    }

    async fn absorb_verification(&mut self) -> Result<(), WizardError> {
        if !self.state.identity_verified
            && self.state.step >= Step::VerifyIdentity
            && self.verification.is_complete()
        {
            info!("Identity verified for session {}", self.session_id);
            self.commit(Action::VerificationComplete).await?;
        }
        Ok(())
    }

    fn ballot(&self) -> Result<Ballot, WizardError> {
        match (
            self.state.election_id(),
            &self.state.constituency,
            &self.state.selected_candidate,
        ) {
            (Some(election_id), Some(constituency), Some(candidate)) => Ok(Ballot {
                election_id: election_id.to_string(),
                constituency: constituency.clone(),
                candidate_id: candidate.id.clone(),
                cast_at: Utc::now(),
            }),
            _ => Err(WizardError::Validation(
                "Please complete every step before casting your vote".into(),
            )),
        }
    }

    fn ticket(&self) -> FetchTicket {
        FetchTicket {
            epoch: self.epoch,
            step: self.state.step,
            scope: Scope::of(&self.state),
        }
    }

    fn check_ticket(&self, ticket: &FetchTicket) -> Result<(), WizardError> {
        if *ticket != self.ticket() {
            debug!(
                "Discarding fetch for step {} (epoch {}), wizard is at step {} (epoch {})",
                ticket.step, ticket.epoch, self.state.step, self.epoch
            );
            return Err(WizardError::Stale);
        }
        Ok(())
    }

    async fn commit(&mut self, action: Action) -> Result<(), WizardError> {
        let next = transition(&self.state, action)?;
        self.save_and_adopt(next).await
    }

    async fn save_and_adopt(&mut self, next: SessionState) -> Result<(), WizardError> {
        if let Err(e) = self.services.store.save(&self.session_id, &next).await {
            warn!("Failed to persist session {}: {e}", self.session_id);
            return Err(e.into());
        }
        self.adopt(next);
        Ok(())
    }

    fn adopt(&mut self, next: SessionState) {
        let election_changed = next.election_id() != self.state.election_id();
        let upstream_changed = election_changed || next.constituency != self.state.constituency;

        if election_changed {
            self.constituency_filter.clear();
        }
        if upstream_changed {
            self.candidates = Cached::default();
            self.candidate_scope = None;
            self.candidate_filter.clear();
        }
        if upstream_changed || next.step < self.state.step {
            self.epoch += 1;
        }
        if next.step != self.state.step {
            info!("Session {} moved to step {}", self.session_id, next.step);
        }

        self.state = next;
    }

    fn settle<T>(&mut self, result: Result<T, WizardError>) -> Result<T, WizardError> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(WizardError::Stale) => {}
            Err(e) => {
                debug!("Session {} rejected action: {e}", self.session_id);
                self.last_error = Some(Notice::from(e));
            }
        }
        result
    }
}

async fn rehydrate(
    session_id: &str,
    store: &dyn SessionStore,
) -> Result<(SessionState, Option<Notice>), WizardError> {
    let corruption = match store.load(session_id).await {
        Ok(Some(mut state)) => match state.check_consistency() {
            Ok(()) => {
                if state.is_submitting() {
                    warn!("Session {session_id} was interrupted during submission");
                    state.vote_confirmed = false;
                    store.save(session_id, &state).await?;
                }
                info!("Resumed session {session_id} at step {}", state.step);
                return Ok((state, None));
            }
            Err(e) => e,
        },
        Ok(None) => {
            let state = SessionState::default();
            store.save(session_id, &state).await?;
            info!("Started session {session_id}");
            return Ok((state, None));
        }
        Err(StoreError::Corrupt { reason, .. }) => WizardError::StateCorruption(reason),
        Err(e) => return Err(e.into()),
    };

    warn!("Discarding session {session_id}: {corruption}");
    store.clear(session_id).await?;

    Ok((SessionState::default(), Some(Notice::from(&corruption))))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use catalog::{BankCatalog, CatalogBank};
    use tokio::time::timeout;

    use super::*;
    use crate::{
        auth::VoterSession,
        ballot::SimulatedBallotBox,
        error::ErrorKind,
        otp::SimulatedOtp,
        state::tests::{at_confirm, ge2024},
        store::MemoryStore,
    };

    struct Harness {
        config: WizardConfig,
        catalog: Arc<BankCatalog>,
        otp: Arc<SimulatedOtp>,
        ballot_box: Arc<SimulatedBallotBox>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new() -> Self {
            let config = WizardConfig::default();

            Self {
                catalog: Arc::new(
                    BankCatalog::new(CatalogBank::builtin())
                        .with_latency(config.election_latency, config.candidate_latency),
                ),
                otp: Arc::new(SimulatedOtp::new(&config)),
                ballot_box: Arc::new(SimulatedBallotBox::new(config.submission_latency)),
                store: Arc::new(MemoryStore::new()),
                config,
            }
        }

        fn services(&self) -> Services {
            Services {
                elections: self.catalog.clone(),
                candidates: self.catalog.clone(),
                otp: self.otp.clone(),
                ballot_box: self.ballot_box.clone(),
                store: self.store.clone(),
            }
        }

        async fn wizard(&self) -> Wizard {
            Wizard::resume(&voter(), self.services(), self.config.clone())
                .await
                .unwrap()
        }
    }

    fn voter() -> VoterSession {
        VoterSession::authenticated("voter-1", ContactChannel::Phone("+91 98200 12345".into()))
    }

    async fn to_verify_identity(wizard: &mut Wizard) {
        wizard.select_election("ge2024").await.unwrap();
        wizard.next().await.unwrap();
        wizard.select_constituency("Mumbai North").await.unwrap();
        wizard.next().await.unwrap();
    }

    async fn to_confirm(wizard: &mut Wizard) {
        to_verify_identity(wizard).await;
        wizard.wait_for_verification().await.unwrap();
        wizard.next().await.unwrap();
        wizard.select_candidate("c6").await.unwrap();
        wizard.next().await.unwrap();
    }

    fn other_code(code: &str) -> &'static str {
        if code == "000000" {
            "111111"
        } else {
            "000000"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn casts_a_nota_vote_end_to_end() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        assert_eq!(wizard.step(), Step::SelectElection);
        assert_eq!(wizard.elections().items.len(), 2);

        wizard.select_election("ge2024").await.unwrap();
        wizard.next().await.unwrap();
        assert_eq!(wizard.step(), Step::SelectConstituency);

        wizard.select_constituency("Mumbai North").await.unwrap();
        wizard.next().await.unwrap();
        assert_eq!(wizard.step(), Step::VerifyIdentity);
        assert!(wizard.is_verifying());

        wizard.wait_for_verification().await.unwrap();
        assert!(wizard.state().identity_verified);
        assert_eq!(wizard.verification_progress(), COMPLETE);

        wizard.next().await.unwrap();
        assert_eq!(wizard.step(), Step::CastVote);
        let last = wizard.candidates().items.last().unwrap();
        assert!(last.is_nota());
        assert_eq!(last.id, "c6");

        wizard.select_candidate("c6").await.unwrap();
        wizard.next().await.unwrap();
        assert_eq!(wizard.step(), Step::Confirm);

        let delivery = wizard.send_code().await.unwrap();
        assert!(wizard.state().otp_sent);
        let code = h.otp.inbox(&delivery).unwrap();

        let err = wizard.verify_code(other_code(&code)).await;
        assert!(matches!(err, Err(WizardError::Otp(OtpError::InvalidCode))));
        assert!(!wizard.state().otp_verified);
        assert!(!wizard.state().vote_confirmed);
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::Otp);

        wizard.verify_code(&code).await.unwrap();
        assert!(wizard.state().otp_verified);
        assert!(wizard.last_error().is_none());

        let confirmation_id = wizard.confirm_vote().await.unwrap();
        assert!(wizard.state().vote_success);
        assert_eq!(confirmation_id.len(), 10);
        assert_eq!(wizard.confirmation_id(), Some(confirmation_id.as_str()));

        let ballots = h.ballot_box.received();
        assert_eq!(ballots.len(), 1);
        assert_eq!(ballots[0].candidate_id, "c6");
        assert_eq!(ballots[0].constituency, "Mumbai North");

        let saved = h.store.load("voter-1").await.unwrap().unwrap();
        assert!(saved.vote_success);
        assert_eq!(saved.confirmation_id, Some(confirmation_id));
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_without_a_session() {
        let h = Harness::new();

        let result = Wizard::resume(
            &VoterSession::new("voter-1"),
            h.services(),
            h.config.clone(),
        )
        .await;

        assert!(matches!(result, Err(WizardError::Unauthenticated)));
        assert!(!h.store.contains("voter-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn verification_cannot_be_skipped() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_verify_identity(&mut wizard).await;

        assert!(matches!(
            wizard.next().await,
            Err(WizardError::VerificationInProgress)
        ));
        assert_eq!(wizard.step(), Step::VerifyIdentity);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let reached = wizard.verification_progress();
        assert!(reached > 0 && reached < COMPLETE);

        // Going back does not cancel or restart the check.
        wizard.back().await.unwrap();
        wizard.next().await.unwrap();
        assert!(wizard.verification_progress() >= reached);

        wizard.wait_for_verification().await.unwrap();
        wizard.next().await.unwrap();
        assert_eq!(wizard.step(), Step::CastVote);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_candidate_fetch_keeps_the_step() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_verify_identity(&mut wizard).await;
        wizard.wait_for_verification().await.unwrap();

        h.catalog.fail_next(1);
        let err = wizard.next().await;
        assert!(matches!(err, Err(WizardError::Provider(_))));
        assert_eq!(wizard.step(), Step::VerifyIdentity);
        assert!(wizard.last_error().unwrap().retryable);
        assert!(wizard.candidates().stale);

        let saved = h.store.load("voter-1").await.unwrap().unwrap();
        assert_eq!(saved.step, Step::VerifyIdentity);

        wizard.next().await.unwrap();
        assert_eq!(wizard.step(), Step::CastVote);
        assert!(!wizard.candidates().stale);
        assert!(wizard.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_election_fetch_is_retryable() {
        let h = Harness::new();
        h.catalog.fail_next(1);

        let mut wizard = h.wizard().await;
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::Provider);
        assert!(wizard.elections().stale);
        assert!(wizard.select_election("ge2024").await.is_err());

        wizard.reload().await.unwrap();
        assert_eq!(wizard.elections().items.len(), 2);
        assert!(!wizard.elections().stale);
        wizard.select_election("ge2024").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_results_are_discarded() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_verify_identity(&mut wizard).await;
        wizard.wait_for_verification().await.unwrap();
        wizard.next().await.unwrap();

        let pending = wizard.pending_candidates().unwrap();
        wizard.back().await.unwrap();
        wizard.next().await.unwrap();

        let fetched = pending.fetch().await;
        assert!(matches!(
            wizard.apply_candidates(fetched),
            Err(WizardError::Stale)
        ));
        assert!(wizard.last_error().is_none());

        let fresh = wizard.pending_candidates().unwrap().fetch().await;
        wizard.apply_candidates(fresh).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn changing_constituency_refetches_candidates() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_verify_identity(&mut wizard).await;
        wizard.wait_for_verification().await.unwrap();
        wizard.next().await.unwrap();
        wizard.select_candidate("c2").await.unwrap();

        wizard.back().await.unwrap();
        wizard.back().await.unwrap();
        wizard.select_constituency("Delhi East").await.unwrap();
        assert_eq!(wizard.state().selected_candidate, None);
        assert!(wizard.candidates().items.is_empty());

        wizard.next().await.unwrap();
        wizard.next().await.unwrap();
        assert!(wizard
            .candidates()
            .items
            .iter()
            .all(|c| c.constituency == "Delhi East"));
    }

    #[tokio::test(start_paused = true)]
    async fn filters_only_change_the_view() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_verify_identity(&mut wizard).await;
        wizard.back().await.unwrap();

        wizard.set_constituency_filter("mumbai");
        assert_eq!(
            wizard.visible_constituencies(),
            vec!["Mumbai North", "Mumbai South"]
        );
        assert_eq!(wizard.state().constituency.as_deref(), Some("Mumbai North"));

        wizard.next().await.unwrap();
        wizard.wait_for_verification().await.unwrap();
        wizard.next().await.unwrap();

        wizard.set_candidate_filter("zzz");
        let visible = wizard.visible_candidates();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_nota());
        assert_eq!(wizard.candidates().items.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_where_the_voter_left() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        wizard.select_election("ge2024").await.unwrap();
        wizard.next().await.unwrap();
        wizard.select_constituency("Mumbai South").await.unwrap();
        drop(wizard);

        let wizard = h.wizard().await;
        assert_eq!(wizard.step(), Step::SelectConstituency);
        assert_eq!(wizard.state().constituency.as_deref(), Some("Mumbai South"));
        assert_eq!(wizard.visible_constituencies().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupted_session_restarts_at_step_one() {
        let h = Harness::new();
        let corrupt = SessionState {
            step: Step::SelectConstituency,
            selected_election: Some(ge2024()),
            constituency: Some("Juhu".into()),
            ..SessionState::default()
        };
        h.store.save("voter-1", &corrupt).await.unwrap();

        let wizard = h.wizard().await;
        assert_eq!(wizard.state(), &SessionState::default());
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::StateCorruption);
        assert!(!h.store.contains("voter-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_session_restarts_at_step_one() {
        let h = Harness::new();
        h.store.insert_raw("voter-1", "{\"step\": \"five\"").await;

        let wizard = h.wizard().await;
        assert_eq!(wizard.step(), Step::SelectElection);
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::StateCorruption);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_submission_asks_to_confirm_again() {
        let h = Harness::new();
        let mut interrupted = at_confirm();
        interrupted.otp_sent = true;
        interrupted.otp_delivery = Some(DeliveryId::from("d-1"));
        interrupted.otp_verified = true;
        interrupted.vote_confirmed = true;
        h.store.save("voter-1", &interrupted).await.unwrap();

        let mut wizard = h.wizard().await;
        assert!(!wizard.state().vote_confirmed);
        assert!(wizard.state().otp_verified);
        assert!(wizard.last_error().is_none());

        wizard.confirm_vote().await.unwrap();
        assert!(wizard.state().vote_success);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_requires_a_verified_code() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_confirm(&mut wizard).await;

        assert!(matches!(
            wizard.confirm_vote().await,
            Err(WizardError::Validation(_))
        ));
        assert!(!wizard.state().vote_confirmed);
        assert!(h.ballot_box.received().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_code_is_rejected_locally() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_confirm(&mut wizard).await;

        assert!(matches!(
            wizard.verify_code("123456").await,
            Err(WizardError::Validation(_))
        ));

        wizard.send_code().await.unwrap();
        for code in ["12345", "1234567", "12a456", ""] {
            assert!(matches!(
                wizard.verify_code(code).await,
                Err(WizardError::Otp(OtpError::InvalidCode))
            ));
        }
        assert!(!wizard.state().otp_verified);
    }

    #[tokio::test(start_paused = true)]
    async fn resend_invalidates_the_previous_code() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_confirm(&mut wizard).await;

        let first = wizard.send_code().await.unwrap();
        let first_code = h.otp.inbox(&first).unwrap();
        let second = wizard.send_code().await.unwrap();
        let second_code = h.otp.inbox(&second).unwrap();

        assert_eq!(h.otp.inbox(&first), None);
        if first_code != second_code {
            assert!(wizard.verify_code(&first_code).await.is_err());
        }
        wizard.verify_code(&second_code).await.unwrap();
        assert!(wizard.state().otp_verified);

        assert!(wizard.send_code().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_submission_can_be_retried() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_confirm(&mut wizard).await;
        let delivery = wizard.send_code().await.unwrap();
        let code = h.otp.inbox(&delivery).unwrap();
        wizard.verify_code(&code).await.unwrap();

        h.ballot_box.fail_next(1);
        let err = wizard.confirm_vote().await;
        assert!(matches!(err, Err(WizardError::Submission(_))));
        assert!(!wizard.state().vote_confirmed);
        assert!(wizard.last_error().unwrap().retryable);

        wizard.confirm_vote().await.unwrap();
        assert!(wizard.state().vote_success);
        assert_eq!(h.ballot_box.received().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_stored_session() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_verify_identity(&mut wizard).await;
        assert!(h.store.contains("voter-1").await);

        wizard.reset_voting().await.unwrap();
        assert_eq!(wizard.state(), &SessionState::default());
        assert!(!wizard.is_verifying());
        assert!(!h.store.contains("voter-1").await);
        assert_eq!(wizard.elections().items.len(), 2);

        wizard.select_election("mh2024").await.unwrap();
        assert!(h.store.contains("voter-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn discard_stops_everything() {
        let h = Harness::new();
        let mut wizard = h.wizard().await;
        to_verify_identity(&mut wizard).await;
        let updates = wizard.verification_updates();

        wizard.discard().await.unwrap();
        let frozen = *updates.borrow();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*updates.borrow(), frozen);
        assert!(!h.store.contains("voter-1").await);
    }

    async fn verified_at_confirm(h: &Harness) -> Wizard {
        let mut wizard = h.wizard().await;
        to_confirm(&mut wizard).await;
        let delivery = wizard.send_code().await.unwrap();
        let code = h.otp.inbox(&delivery).unwrap();
        wizard.verify_code(&code).await.unwrap();
        wizard
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_confirm_can_be_awaited_again() {
        let h = Harness::new();
        let mut wizard = verified_at_confirm(&h).await;

        let abandoned = timeout(Duration::from_millis(100), wizard.confirm_vote()).await;
        assert!(abandoned.is_err());
        assert!(wizard.is_submitting());
        assert!(matches!(
            wizard.reset_voting().await,
            Err(WizardError::SubmissionInProgress)
        ));

        let id = wizard.confirm_vote().await.unwrap();
        assert_eq!(wizard.confirmation_id(), Some(id.as_str()));
        assert!(!wizard.is_submitting());
        assert_eq!(h.ballot_box.received().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_confirm_is_applied_by_the_next_action() {
        let h = Harness::new();
        let mut wizard = verified_at_confirm(&h).await;

        let abandoned = timeout(Duration::from_millis(100), wizard.confirm_vote()).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(h.config.submission_latency).await;

        wizard.reset_voting().await.unwrap();
        assert_eq!(wizard.state(), &SessionState::default());
        assert_eq!(h.ballot_box.received().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_failed_confirm_rolls_back() {
        let h = Harness::new();
        let mut wizard = verified_at_confirm(&h).await;
        h.ballot_box.fail_next(1);

        let abandoned = timeout(Duration::from_millis(100), wizard.confirm_vote()).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(h.config.submission_latency).await;

        assert!(wizard.sync_verification().await.unwrap());
        assert!(!wizard.state().vote_confirmed);
        assert!(!wizard.is_submitting());

        wizard.confirm_vote().await.unwrap();
        assert!(wizard.state().vote_success);
    }
}
