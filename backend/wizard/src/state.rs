use std::fmt;

use catalog::{Candidate, Election};
use serde::{Deserialize, Serialize};

use crate::{error::WizardError, otp::DeliveryId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Step {
    #[default]
    SelectElection = 1,
    SelectConstituency = 2,
    VerifyIdentity = 3,
    CastVote = 4,
    Confirm = 5,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::SelectElection,
        Step::SelectConstituency,
        Step::VerifyIdentity,
        Step::CastVote,
        Step::Confirm,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    pub fn previous(self) -> Option<Self> {
        Self::from_number(self.number().checked_sub(1)?)
    }

    /// Label shown in the step indicator.
    pub fn label(self) -> &'static str {
        match self {
            Self::SelectElection => "Select Election",
            Self::SelectConstituency => "Choose Constituency",
            Self::VerifyIdentity => "Verify Identity",
            Self::CastVote => "Cast Vote",
            Self::Confirm => "Confirmation",
        }
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_number(value).ok_or_else(|| format!("step {value} is outside 1..=5"))
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> Self {
        step.number()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.label())
    }
}

/// Persisted wizard progress for one voter session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    pub step: Step,
    pub selected_election: Option<Election>,
    pub constituency: Option<String>,
    pub selected_candidate: Option<Candidate>,
    pub identity_verified: bool,
    pub otp_sent: bool,
    pub otp_verified: bool,
    pub vote_confirmed: bool,
    pub vote_success: bool,
    pub otp_delivery: Option<DeliveryId>,
    pub confirmation_id: Option<String>,
}

impl SessionState {
    /// The ballot has been handed to the ballot box and no receipt is back yet.
    pub fn is_submitting(&self) -> bool {
        self.vote_confirmed && !self.vote_success
    }

    pub fn election_id(&self) -> Option<&str> {
        self.selected_election.as_ref().map(|e| e.id.as_str())
    }

    /// Rejects snapshots that could not have been produced by the wizard.
    pub fn check_consistency(&self) -> Result<(), WizardError> {
        let corrupt = |reason: String| Err(WizardError::StateCorruption(reason));

        if let Some(constituency) = &self.constituency {
            match &self.selected_election {
                None => return corrupt(format!("constituency {constituency} without an election")),
                Some(election) if !election.has_constituency(constituency) => {
                    return corrupt(format!(
                        "constituency {constituency} is not part of election {}",
                        election.id
                    ))
                }
                Some(_) => {}
            }
        }

        if let Some(candidate) = &self.selected_candidate {
            if self.constituency.as_deref() != Some(candidate.constituency.as_str()) {
                return corrupt(format!(
                    "candidate {} belongs to {}, not the selected constituency",
                    candidate.id, candidate.constituency
                ));
            }
        }

        let needs = [
            (Step::SelectConstituency, self.selected_election.is_some(), "an election"),
            (Step::VerifyIdentity, self.constituency.is_some(), "a constituency"),
            (Step::CastVote, self.identity_verified, "a verified identity"),
            (Step::Confirm, self.selected_candidate.is_some(), "a candidate"),
        ];
        for (step, present, what) in needs {
            if self.step >= step && !present {
                return corrupt(format!("step {} reached without {what}", self.step.number()));
            }
        }

        if self.otp_verified && !self.otp_sent {
            return corrupt("OTP verified without being sent".into());
        }
        if self.otp_sent && self.otp_delivery.is_none() {
            return corrupt("OTP sent without a delivery id".into());
        }
        if self.vote_confirmed && !self.otp_verified {
            return corrupt("vote confirmed without OTP verification".into());
        }
        if self.vote_success && !self.vote_confirmed {
            return corrupt("vote recorded without confirmation".into());
        }
        if self.confirmation_id.is_some() != self.vote_success {
            return corrupt("confirmation id does not match submission state".into());
        }
        if self.vote_confirmed && self.step != Step::Confirm {
            return corrupt("vote confirmed outside the confirmation step".into());
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use catalog::{CatalogBank, Election};

    use super::*;

    pub(crate) fn ge2024() -> Election {
        CatalogBank::builtin().elections[0].clone()
    }

    pub(crate) fn candidate(id: &str, constituency: &str) -> Candidate {
        CatalogBank::builtin()
            .candidates
            .iter()
            .find(|c| c.id == id)
            .unwrap()
            .for_constituency(constituency)
    }

    pub(crate) fn at_confirm() -> SessionState {
        SessionState {
            step: Step::Confirm,
            selected_election: Some(ge2024()),
            constituency: Some("Mumbai North".into()),
            selected_candidate: Some(candidate("c6", "Mumbai North")),
            identity_verified: true,
            ..SessionState::default()
        }
    }

    #[test]
    fn step_numbers_round_trip() {
        for step in Step::ALL {
            assert_eq!(Step::from_number(step.number()), Some(step));
        }
        assert_eq!(Step::from_number(0), None);
        assert_eq!(Step::from_number(6), None);
        assert_eq!(Step::Confirm.next(), None);
        assert_eq!(Step::SelectElection.previous(), None);
    }

    #[test]
    fn step_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Step::VerifyIdentity).unwrap(), "3");
        assert!(serde_json::from_str::<Step>("9").is_err());
    }

    #[test]
    fn fresh_state_is_consistent() {
        SessionState::default().check_consistency().unwrap();
        at_confirm().check_consistency().unwrap();
    }

    #[test]
    fn missing_fields_default_on_load() {
        let state: SessionState = serde_json::from_str(r#"{"step": 1}"#).unwrap();
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn foreign_constituency_is_corruption() {
        let state = SessionState {
            step: Step::SelectConstituency,
            selected_election: Some(ge2024()),
            constituency: Some("Juhu".into()),
            ..SessionState::default()
        };

        assert!(matches!(
            state.check_consistency(),
            Err(WizardError::StateCorruption(_))
        ));
    }

    #[test]
    fn mismatched_candidate_is_corruption() {
        let mut state = at_confirm();
        state.selected_candidate = Some(candidate("c1", "Mumbai South"));

        assert!(state.check_consistency().is_err());
    }

    #[test]
    fn step_ahead_of_data_is_corruption() {
        let mut state = at_confirm();
        state.identity_verified = false;
        assert!(state.check_consistency().is_err());

        let state = SessionState {
            step: Step::CastVote,
            ..SessionState::default()
        };
        assert!(state.check_consistency().is_err());
    }

    #[test]
    fn submission_flags_must_chain() {
        let mut state = at_confirm();
        state.vote_success = true;
        state.confirmation_id = Some("ABCDEFGHIJ".into());
        assert!(state.check_consistency().is_err());

        state.otp_sent = true;
        state.otp_delivery = Some(DeliveryId::from("d-1"));
        state.otp_verified = true;
        state.vote_confirmed = true;
        state.check_consistency().unwrap();
    }
}
