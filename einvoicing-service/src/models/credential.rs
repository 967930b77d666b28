//! Short-lived access credential issued by the authentication service.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Margin subtracted from the authority-declared expiry before a credential
/// is considered usable. Keeps concurrent instances from racing the clock at
/// the edge of the window.
pub const SAFETY_MARGIN_MINUTES: i64 = 10;

/// Token/sign pair proving a successful ticket exchange. `expires_at` holds
/// the expiry as declared by the authority; usability is always evaluated
/// through [`Credential::is_usable_at`] so every tier applies the same margin.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Credential {
    /// Holder tax identifier (CUIT).
    pub holder_id: String,
    pub token: String,
    pub sign: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::minutes(SAFETY_MARGIN_MINUTES) > now
    }

    pub fn is_usable(&self) -> bool {
        self.is_usable_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_at: DateTime<Utc>) -> Credential {
        Credential {
            holder_id: "20111111112".to_string(),
            token: "tok".to_string(),
            sign: "sig".to_string(),
            expires_at,
        }
    }

    #[test]
    fn usable_only_outside_the_safety_margin() {
        let now = Utc::now();
        assert!(credential(now + Duration::minutes(11)).is_usable_at(now));
        assert!(!credential(now + Duration::minutes(10)).is_usable_at(now));
        assert!(!credential(now + Duration::minutes(5)).is_usable_at(now));
        assert!(!credential(now - Duration::minutes(1)).is_usable_at(now));
    }

    #[test]
    fn validity_is_monotonic() {
        // Valid at T implies valid at any earlier T'.
        let now = Utc::now();
        let cred = credential(now + Duration::minutes(30));
        assert!(cred.is_usable_at(now));
        for earlier_mins in [1, 5, 15, 60] {
            assert!(cred.is_usable_at(now - Duration::minutes(earlier_mins)));
        }
    }
}
