//! §3, §4.4 Credentials — the result of a credential-exchange hop, and the
//! cache key the broker uses to keep hits warm.

use chrono::{DateTime, Utc};

/// A temporary credential set returned by a credential-exchange hop.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_id: String,
    pub secret: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Margin before `expires_at` at which a cached credential set is considered
/// stale and must be refreshed (§3).
pub const REFRESH_MARGIN_SECONDS: i64 = 60;

impl Credentials {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > chrono::Duration::seconds(REFRESH_MARGIN_SECONDS)
    }
}

/// Cache key for the credential broker: `(role, external_id, session_name)` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialCacheKey {
    pub role: String,
    pub external_id: Option<String>,
    pub session_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_just_inside_margin_is_stale() {
        let now = Utc::now();
        let creds = Credentials {
            access_id: "a".into(),
            secret: "s".into(),
            session_token: "t".into(),
            expires_at: now + chrono::Duration::seconds(59),
        };
        assert!(!creds.is_fresh(now));
    }

    #[test]
    fn fresh_well_outside_margin_is_fresh() {
        let now = Utc::now();
        let creds = Credentials {
            access_id: "a".into(),
            secret: "s".into(),
            session_token: "t".into(),
            expires_at: now + chrono::Duration::seconds(600),
        };
        assert!(creds.is_fresh(now));
    }
}
