use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const NOTA_ID: &str = "nota";
pub const NOTA_NAME: &str = "NOTA";
pub const NOTA_PARTY: &str = "None of the Above";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionStatus {
    Upcoming,
    Ongoing,
    Completed,
}

impl ElectionStatus {
    /// Badge text shown next to the election card.
    pub fn label(self) -> &'static str {
        match self {
            Self::Upcoming => "Coming Soon",
            Self::Ongoing => "Voting Open",
            Self::Completed => "Closed",
        }
    }
}

impl fmt::Display for ElectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Upcoming => "upcoming",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// An election as handed out by the catalog. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    pub constituencies: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ElectionStatus,
}

impl Election {
    pub fn has_constituency(&self, name: &str) -> bool {
        self.constituencies.iter().any(|c| c == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub party: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_logo: Option<String>,
    pub photo_url: String,
    pub constituency: String,
}

impl Candidate {
    pub fn none_of_the_above(id: &str, constituency: &str) -> Self {
        Self {
            id: id.to_string(),
            name: NOTA_NAME.to_string(),
            party: NOTA_PARTY.to_string(),
            symbol: None,
            party_logo: None,
            photo_url: "https://upload.wikimedia.org/wikipedia/commons/thumb/f/f6/NOTA_Option_Logo.svg/440px-NOTA_Option_Logo.svg.png".to_string(),
            constituency: constituency.to_string(),
        }
    }

    pub fn is_nota(&self) -> bool {
        self.party.eq_ignore_ascii_case(NOTA_PARTY) || self.name.eq_ignore_ascii_case(NOTA_NAME)
    }
}

/// Candidate as stored in the bank, before being stamped with a constituency.
///
/// `elections` restricts the entry to the listed election ids; an empty list
/// means the candidate stands in every election of the bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEntry {
    pub id: String,
    pub name: String,
    pub party: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_logo: Option<String>,
    pub photo_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elections: Vec<String>,
}

impl CandidateEntry {
    pub fn stands_in(&self, election_id: &str) -> bool {
        self.elections.is_empty() || self.elections.iter().any(|e| e == election_id)
    }

    pub fn for_constituency(&self, constituency: &str) -> Candidate {
        Candidate {
            id: self.id.clone(),
            name: self.name.clone(),
            party: self.party.clone(),
            symbol: self.symbol.clone().filter(|s| !s.is_empty()),
            party_logo: self.party_logo.clone().filter(|s| !s.is_empty()),
            photo_url: self.photo_url.clone(),
            constituency: constituency.to_string(),
        }
    }
}
