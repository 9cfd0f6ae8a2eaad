use serde::{Deserialize, Serialize};
use tracing::info;

use crate::otp::ContactChannel;

/// Tells the wizard whether a voter is signed in and where their codes go.
///
/// Signing in itself is the job of the surrounding application.
pub trait AuthGate: Send + Sync {
    fn session_id(&self) -> &str;

    fn is_authenticated(&self) -> bool;

    fn contact_channel(&self) -> Option<&ContactChannel>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterSession {
    session_id: String,
    authenticated: bool,
    contact: Option<ContactChannel>,
}

impl VoterSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            authenticated: false,
            contact: None,
        }
    }

    pub fn authenticated(session_id: impl Into<String>, contact: ContactChannel) -> Self {
        let mut session = Self::new(session_id);
        session.login(contact);
        session
    }

    pub fn login(&mut self, contact: ContactChannel) {
        info!("Voter {} signed in via {}", self.session_id, contact.masked());

        self.authenticated = true;
        self.contact = Some(contact);
    }

    pub fn logout(&mut self) {
        info!("Voter {} signed out", self.session_id);

        self.authenticated = false;
        self.contact = None;
    }
}

impl AuthGate for VoterSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn contact_channel(&self) -> Option<&ContactChannel> {
        self.contact.as_ref()
    }
}
