//! Pure transition function of the voting wizard.
//!
//! Every change to [`SessionState`] goes through [`transition`], which either
//! returns the complete next state or a typed error and leaves the input
//! untouched. Side effects (fetching, timers, OTP, persistence) live in the
//! orchestrator and feed their results back in as [`Action`]s.
use catalog::{Candidate, Election};

use crate::{
    error::WizardError,
    otp::DeliveryId,
    state::{SessionState, Step},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SelectElection(Election),
    SelectConstituency(String),
    SelectCandidate(Candidate),
    Next,
    Back,
    VerificationComplete,
    OtpSent(DeliveryId),
    OtpVerified,
    ConfirmVote,
    Submitted { confirmation_id: String },
    SubmissionFailed,
    Reset,
}

fn invalid<T>(message: impl Into<String>) -> Result<T, WizardError> {
    Err(WizardError::Validation(message.into()))
}

fn require_step(state: &SessionState, step: Step, what: &str) -> Result<(), WizardError> {
    if state.step != step {
        return invalid(format!(
            "{what} can only be changed on step {step}, the wizard is on step {}",
            state.step
        ));
    }
    Ok(())
}

pub fn transition(state: &SessionState, action: Action) -> Result<SessionState, WizardError> {
    if state.vote_success && action != Action::Reset {
        return Err(WizardError::AlreadySubmitted);
    }
    if state.is_submitting()
        && !matches!(action, Action::Submitted { .. } | Action::SubmissionFailed)
    {
        return Err(WizardError::SubmissionInProgress);
    }

    let mut next = state.clone();

    match action {
        Action::SelectElection(election) => {
            require_step(state, Step::SelectElection, "The election")?;

            if state.election_id() != Some(election.id.as_str()) {
                next.constituency = None;
                next.selected_candidate = None;
            }
            next.selected_election = Some(election);
        }

        Action::SelectConstituency(name) => {
            require_step(state, Step::SelectConstituency, "The constituency")?;

            let Some(election) = &state.selected_election else {
                return invalid("Please select an election first");
            };
            if !election.has_constituency(&name) {
                return invalid(format!("{name} is not a constituency of {}", election.title));
            }

            if state.constituency.as_deref() != Some(name.as_str()) {
                next.selected_candidate = None;
            }
            next.constituency = Some(name);
        }

        Action::SelectCandidate(candidate) => {
            require_step(state, Step::CastVote, "The candidate")?;

            if state.constituency.as_deref() != Some(candidate.constituency.as_str()) {
                return invalid(format!(
                    "{} does not stand in the selected constituency",
                    candidate.name
                ));
            }
            next.selected_candidate = Some(candidate);
        }

        Action::Next => {
            match state.step {
                Step::SelectElection if state.selected_election.is_none() => {
                    return invalid("Please select an election to continue")
                }
                Step::SelectConstituency => {
                    let valid = match (&state.selected_election, &state.constituency) {
                        (Some(election), Some(name)) => election.has_constituency(name),
                        _ => false,
                    };
                    if !valid {
                        return invalid("Please select your constituency to continue");
                    }
                }
                Step::VerifyIdentity if !state.identity_verified => {
                    return Err(WizardError::VerificationInProgress)
                }
                Step::CastVote if state.selected_candidate.is_none() => {
                    return invalid("Please select a candidate to continue")
                }
                Step::Confirm => {
                    return invalid("This is the final step, confirm your vote to finish")
                }
                _ => {}
            }

            next.step = state.step.next().unwrap_or(state.step);
        }

        Action::Back => match state.step.previous() {
            Some(previous) => next.step = previous,
            None => return invalid("Already at the first step"),
        },

        Action::VerificationComplete => {
            if state.step < Step::VerifyIdentity {
                return invalid("Identity verification has not started");
            }
            next.identity_verified = true;
        }

        Action::OtpSent(delivery) => {
            require_step(state, Step::Confirm, "The OTP")?;
            if state.otp_verified {
                return invalid("OTP already verified");
            }
            next.otp_sent = true;
            next.otp_delivery = Some(delivery);
        }

        Action::OtpVerified => {
            require_step(state, Step::Confirm, "The OTP")?;
            if !state.otp_sent {
                return invalid("Please request an OTP first");
            }
            next.otp_verified = true;
        }

        Action::ConfirmVote => {
            if state.step != Step::Confirm {
                return invalid("Votes can only be confirmed on the confirmation step");
            }
            if !state.otp_verified {
                return invalid("Please verify your OTP before casting your vote");
            }
            next.vote_confirmed = true;
        }

        Action::Submitted { confirmation_id } => {
            if !state.is_submitting() {
                return invalid("No vote submission in progress");
            }
            next.vote_success = true;
            next.confirmation_id = Some(confirmation_id);
        }

        Action::SubmissionFailed => {
            if !state.is_submitting() {
                return invalid("No vote submission in progress");
            }
            next.vote_confirmed = false;
        }

        Action::Reset => next = SessionState::default(),
    }

    debug_assert!(next.check_consistency().is_ok(), "{next:?}");

    Ok(next)
}
