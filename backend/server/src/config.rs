use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};
use wizard::WizardConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    File,
    Redis,
}

impl FromStr for SessionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown session backend {other}")),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub session_backend: SessionBackend,
    pub session_dir: PathBuf,
    pub redis_url: String,
    pub session_ttl: Duration,
    pub catalog_path: Option<PathBuf>,
    pub catalog_url: Option<String>,
    pub wizard: WizardConfig,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            session_backend: try_load("SESSION_BACKEND", "memory"),
            session_dir: try_load("SESSION_DIR", "./sessions"),
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379"),
            session_ttl: Duration::from_secs(try_load("SESSION_TTL_SECS", "86400")),
            catalog_path: var("CATALOG_PATH").ok().map(PathBuf::from),
            catalog_url: var("CATALOG_URL").ok(),
            wizard: load_wizard(),
        }
    }
}

/// Wizard timings. Unset variables keep the front end pacing, `0` disables
/// the OTP attempt cap and lifetime.
fn load_wizard() -> WizardConfig {
    let defaults = WizardConfig::default();

    let tick = Duration::from_millis(try_load(
        "VERIFICATION_TICK_MS",
        &defaults.verification_tick.as_millis().to_string(),
    ));
    let step = try_load("VERIFICATION_STEP", &defaults.verification_step.to_string());
    let max_attempts: u32 = try_load("OTP_MAX_ATTEMPTS", "5");
    let ttl_secs: u64 = try_load("OTP_TTL_SECS", "300");
    let submission = Duration::from_millis(try_load(
        "SUBMISSION_DELAY_MS",
        &defaults.submission_latency.as_millis().to_string(),
    ));

    let (election_latency, candidate_latency) = match var("CATALOG_DELAY_MS") {
        Ok(raw) => {
            let delay = Duration::from_millis(parse("CATALOG_DELAY_MS", &raw));
            (delay, delay)
        }
        Err(()) => (defaults.election_latency, defaults.candidate_latency),
    };

    WizardConfig {
        election_latency,
        candidate_latency,
        verification_tick: tick,
        verification_step: step,
        otp_max_attempts: (max_attempts > 0).then_some(max_attempts),
        otp_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        submission_latency: submission,
        ..defaults
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse(key, &raw)
}

fn parse<T: FromStr>(key: &str, raw: &str) -> T
where
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}
