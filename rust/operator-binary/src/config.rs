use std::time::Duration;

/// Certificates are renewed once they have less than this much validity left.
pub const DEFAULT_RENEWAL_THRESHOLD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Size of generated RSA keys, in bits.
pub const DEFAULT_KEY_STRENGTH: u32 = 2048;

/// Weaker keys are rejected, regardless of configuration.
pub const MIN_KEY_STRENGTH: u32 = 2048;

/// Issuance and renewal policy, shared by all [`CertificateRequest`](crate::crd::CertificateRequest)s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub renewal_threshold: Duration,
    pub key_strength: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            renewal_threshold: DEFAULT_RENEWAL_THRESHOLD,
            key_strength: DEFAULT_KEY_STRENGTH,
        }
    }
}
