use std::time::Duration;

/// Timings and policy knobs of the voting wizard.
///
/// Defaults reproduce the pacing voters see in the web front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardConfig {
    pub election_latency: Duration,
    pub candidate_latency: Duration,
    pub verification_tick: Duration,
    pub verification_step: u8,
    pub otp_latency: Duration,
    pub otp_max_attempts: Option<u32>,
    pub otp_ttl: Option<Duration>,
    pub submission_latency: Duration,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            election_latency: Duration::from_millis(1500),
            candidate_latency: Duration::from_millis(1000),
            verification_tick: Duration::from_millis(150),
            verification_step: 5,
            otp_latency: Duration::from_millis(1500),
            otp_max_attempts: Some(5),
            otp_ttl: Some(Duration::from_secs(5 * 60)),
            submission_latency: Duration::from_millis(2000),
        }
    }
}

impl WizardConfig {
    /// Number of ticks the identity check needs to reach 100%.
    pub fn verification_ticks(&self) -> u32 {
        let step = u32::from(self.verification_step.max(1));
        100_u32.div_ceil(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_verification_takes_twenty_ticks() {
        assert_eq!(WizardConfig::default().verification_ticks(), 20);
    }

    #[test]
    fn zero_step_is_clamped() {
        let config = WizardConfig {
            verification_step: 0,
            ..WizardConfig::default()
        };

        assert_eq!(config.verification_ticks(), 100);
    }
}
