use serde::{Deserialize, Serialize};

/// Per-user consumption limits: requests per minute and tokens per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub rpm_limit: u32,
    pub tpm_limit: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            rpm_limit: 20,
            tpm_limit: 50_000,
        }
    }
}

/// Result of a quota admission check. Denial is a first-class negative
/// result, not an error inside the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "admission")]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64, reason: String },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}
