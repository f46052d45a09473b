//! `/health` endpoint.

use std::time::Instant;

use racewire_core::SessionToken;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: String,
    pub uptime_secs: u64,
    /// Registered subscriber count.
    pub subscribers: usize,
    /// Active session token, `null` when no session is running.
    pub session: Option<String>,
}

/// Build a health response from live state.
pub fn health_check(
    start_time: Instant,
    subscribers: usize,
    session: Option<&SessionToken>,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        subscribers,
        session: session.map(|t| t.as_str().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_server_reports_ok() {
        let resp = health_check(Instant::now(), 0, None);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
        assert!(resp.session.is_none());
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, None).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let token = SessionToken::from_raw("01012025120000");
        let resp = health_check(Instant::now(), 3, Some(&token));
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["subscribers"], 3);
        assert_eq!(parsed["session"], "01012025120000");
        assert!(parsed["uptime_secs"].is_number());
    }

    #[test]
    fn no_session_serializes_null() {
        let parsed = serde_json::to_value(health_check(Instant::now(), 0, None)).unwrap();
        assert!(parsed["session"].is_null());
    }
}
