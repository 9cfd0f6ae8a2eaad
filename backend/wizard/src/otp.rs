//! # OTP Challenge
//!
//! Secondary confirmation gate before a ballot is submitted.
//!
//! - 6 digit numeric code as a string (keeps leading zeroes)
//! - Sent to the contact channel the voter registered with
//! - Every send supersedes the previous code of the same voter session
//! - Malformed codes are rejected before any lookup happens
//! - Codes are single use, expire, and lock after too many wrong attempts
use std::{
    collections::HashMap,
    fmt,
    sync::{LazyLock, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::WizardConfig, error::OtpError};

pub const CODE_LENGTH: usize = 6;

static CODE_FORMAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{6}$").unwrap());

pub fn is_well_formed(code: &str) -> bool {
    CODE_FORMAT.is_match(code)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(String);

impl DeliveryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeliveryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the voter receives one-time codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "lowercase")]
pub enum ContactChannel {
    Phone(String),
    Email(String),
}

impl ContactChannel {
    /// Address with everything but a few characters hidden, for display and logs.
    pub fn masked(&self) -> String {
        match self {
            Self::Phone(number) => {
                let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
                let visible = digits.len().saturating_sub(4);
                let tail: String = digits[visible..].iter().collect();

                format!("{}{tail}", "*".repeat(visible))
            }
            Self::Email(address) => match address.split_once('@') {
                Some((user, domain)) => {
                    let first = user.chars().next().map(String::from).unwrap_or_default();
                    format!("{first}***@{domain}")
                }
                None => "***".to_string(),
            },
        }
    }
}

#[async_trait]
pub trait OtpService: Send + Sync {
    /// Issues a fresh code to `channel`, invalidating any earlier one issued
    /// for `session_id`.
    async fn send_code(
        &self,
        session_id: &str,
        channel: &ContactChannel,
    ) -> Result<DeliveryId, OtpError>;

    /// `Ok(false)` for a malformed, superseded or wrong code.
    async fn verify_code(&self, delivery: &DeliveryId, code: &str) -> Result<bool, OtpError>;
}

struct Issued {
    code: String,
    issued_at: Instant,
    attempts: u32,
}

#[derive(Default)]
struct Ledger {
    issued: HashMap<DeliveryId, Issued>,
    latest: HashMap<String, DeliveryId>,
}

/// In-process OTP service standing in for an SMS/e-mail gateway.
pub struct SimulatedOtp {
    latency: Duration,
    max_attempts: Option<u32>,
    ttl: Option<Duration>,
    ledger: Mutex<Ledger>,
}

impl SimulatedOtp {
    pub fn new(config: &WizardConfig) -> Self {
        Self {
            latency: config.otp_latency,
            max_attempts: config.otp_max_attempts,
            ttl: config.otp_ttl,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// The code as it arrived on the voter's device, if still outstanding.
    pub fn inbox(&self, delivery: &DeliveryId) -> Option<String> {
        self.ledger()
            .issued
            .get(delivery)
            .map(|issued| issued.code.clone())
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OtpService for SimulatedOtp {
    async fn send_code(
        &self,
        session_id: &str,
        channel: &ContactChannel,
    ) -> Result<DeliveryId, OtpError> {
        sleep(self.latency).await;

        let code = format!(
            "{:0width$}",
            rand::thread_rng().gen_range(0..1_000_000u32),
            width = CODE_LENGTH
        );
        let delivery = DeliveryId::generate();

        let mut ledger = self.ledger();
        if let Some(previous) = ledger.latest.insert(session_id.to_string(), delivery.clone()) {
            ledger.issued.remove(&previous);
            debug!("Superseded OTP delivery {previous}");
        }
        ledger.issued.insert(
            delivery.clone(),
            Issued {
                code,
                issued_at: Instant::now(),
                attempts: 0,
            },
        );

        info!("Sent OTP to {} ({delivery})", channel.masked());

        Ok(delivery)
    }

    async fn verify_code(&self, delivery: &DeliveryId, code: &str) -> Result<bool, OtpError> {
        if !is_well_formed(code) {
            debug!("Rejected malformed OTP for {delivery}");
            return Ok(false);
        }

        sleep(self.latency).await;

        let mut ledger = self.ledger();

        let Some(issued) = ledger.issued.get_mut(delivery) else {
            debug!("OTP delivery {delivery} unknown or superseded");
            return Ok(false);
        };

        if self.ttl.is_some_and(|ttl| issued.issued_at.elapsed() > ttl) {
            ledger.issued.remove(delivery);
            warn!("OTP delivery {delivery} expired");
            return Err(OtpError::Expired);
        }

        if self.max_attempts.is_some_and(|max| issued.attempts >= max) {
            warn!("OTP delivery {delivery} locked after {} attempts", issued.attempts);
            return Err(OtpError::AttemptsExhausted);
        }

        if issued.code != code {
            issued.attempts += 1;
            return Ok(false);
        }

        ledger.issued.remove(delivery);
        ledger.latest.retain(|_, latest| latest != delivery);

        Ok(true)
    }
}
