//! HTTP middleware contract.
//!
//! Server frameworks stay outside this crate. This module turns a limiter
//! decision into what a middleware needs: the `X-RateLimit-*` headers, the
//! status code and the JSON body of a rejection. A bad cost is the caller's
//! error and is refused; any other limiter error lets the request through.

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TurnstileError;
use crate::ratelimit::{to_datetime, RateLimitInfo, RateLimiter};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

/// Status code of a rejected request.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Status code of a request the limiter cannot evaluate.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Message carried by every rejection body.
pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded";

/// Values of the rate limit response headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Reset time, RFC 3339 in UTC with millisecond precision
    pub reset: String,
}

impl RateLimitHeaders {
    /// Build the headers for a decision of a limiter allowing `max_requests`.
    pub fn from_info(max_requests: u64, info: &RateLimitInfo) -> Self {
        Self {
            limit: max_requests,
            remaining: info.remaining,
            reset: iso8601(info.reset_time),
        }
    }

    /// Header name and value pairs, ready to be set on a response.
    pub fn to_pairs(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.clone()),
        ]
    }
}

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    /// When the client may retry, RFC 3339
    pub retry_after: String,
    pub remaining: u64,
}

impl RejectionBody {
    pub fn from_info(info: &RateLimitInfo) -> Self {
        Self {
            error: RATE_LIMIT_EXCEEDED.to_string(),
            retry_after: iso8601(info.reset_time),
            remaining: info.remaining,
        }
    }
}

/// What the middleware should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Forward the request, setting the headers on the response.
    Allowed(RateLimitHeaders),
    /// Answer 429 with the headers and body.
    Rejected(RateLimitHeaders, RejectionBody),
    /// The request asked for something the limiter refuses, e.g. zero cost; answer 400.
    Invalid(String),
    /// The limiter failed; forward the request without rate limit headers.
    FailedOpen,
}

impl Admission {
    /// Whether the request goes through.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_) | Admission::FailedOpen)
    }

    /// Status code for a request that does not go through.
    pub fn status(&self) -> Option<u16> {
        match self {
            Admission::Rejected(..) => Some(STATUS_TOO_MANY_REQUESTS),
            Admission::Invalid(_) => Some(STATUS_BAD_REQUEST),
            Admission::Allowed(_) | Admission::FailedOpen => None,
        }
    }
}

/// Check one unit of cost for `identifier` and map the decision.
pub fn admit(limiter: &RateLimiter, identifier: &str) -> Admission {
    admit_with_cost(limiter, identifier, 1)
}

/// Check `cost` units for `identifier`, e.g. a gateway charging per message size.
pub fn admit_with_cost(limiter: &RateLimiter, identifier: &str, cost: u64) -> Admission {
    match limiter.check_limit(identifier, cost) {
        Ok(info) => admission_for(limiter.config().max_requests, &info),
        Err(err @ TurnstileError::InvalidCost(_)) => {
            debug!(identifier = %identifier, cost = cost, "Refusing invalid cost");
            Admission::Invalid(err.to_string())
        }
        Err(err) => {
            warn!(
                identifier = %identifier,
                cost = cost,
                error = %err,
                "Rate limiter error, allowing request"
            );
            Admission::FailedOpen
        }
    }
}

/// Map a decision onto an admission.
pub fn admission_for(max_requests: u64, info: &RateLimitInfo) -> Admission {
    let headers = RateLimitHeaders::from_info(max_requests, info);
    if info.is_blocked {
        Admission::Rejected(headers, RejectionBody::from_info(info))
    } else {
        Admission::Allowed(headers)
    }
}

fn iso8601(ms: u64) -> String {
    to_datetime(ms).to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, MemoryStore, RateLimitConfig, Strategy};
    use std::sync::Arc;
    use std::time::Duration;

    fn limiter(max: u64) -> RateLimiter {
        let config =
            RateLimitConfig::new(Strategy::Fixed, max, Duration::from_secs(60)).key_prefix("ip:");
        RateLimiter::with_store(config, Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)))
            .unwrap()
    }

    #[test]
    fn test_allowed_headers() {
        let limiter = limiter(2);
        let admission = admit(&limiter, "203.0.113.5");

        let Admission::Allowed(headers) = admission else {
            panic!("expected an allowed request");
        };
        assert_eq!(
            headers.to_pairs(),
            [
                (HEADER_LIMIT, "2".to_string()),
                (HEADER_REMAINING, "1".to_string()),
                (HEADER_RESET, "1970-01-01T00:01:00.000Z".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejection() {
        let limiter = limiter(1);
        assert!(admit(&limiter, "a").is_allowed());

        let admission = admit(&limiter, "a");
        assert!(!admission.is_allowed());
        assert_eq!(admission.status(), Some(429));

        let Admission::Rejected(headers, body) = admission else {
            panic!("expected a rejection");
        };
        assert_eq!(headers.remaining, 0);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "error": "Rate limit exceeded",
                "retryAfter": "1970-01-01T00:01:00.000Z",
                "remaining": 0,
            })
        );
    }

    #[test]
    fn test_admission_for_info() {
        let info = RateLimitInfo {
            identifier: "ip:a".to_string(),
            total_hits: 3,
            total_hits_in_window: 3,
            remaining: 7,
            reset_time: 1_500,
            is_blocked: false,
        };
        let admission = admission_for(10, &info);
        assert_eq!(admission.status(), None);
        let Admission::Allowed(headers) = admission else {
            panic!("expected an allowed request");
        };
        assert_eq!(headers.reset, "1970-01-01T00:00:01.500Z");
    }

    #[test]
    fn test_zero_cost_is_refused() {
        let limiter = limiter(1);
        assert!(admit(&limiter, "a").is_allowed());

        let admission = admit_with_cost(&limiter, "a", 0);
        assert!(matches!(admission, Admission::Invalid(ref reason) if reason.contains("cost")));
        assert!(!admission.is_allowed());
        assert_eq!(admission.status(), Some(STATUS_BAD_REQUEST));
    }

    #[test]
    fn test_zero_cost_consumes_nothing() {
        let limiter = limiter(1);
        assert!(!admit_with_cost(&limiter, "a", 0).is_allowed());
        assert!(admit(&limiter, "a").is_allowed());
    }

    #[test]
    fn test_failed_open_is_allowed_without_status() {
        assert!(Admission::FailedOpen.is_allowed());
        assert_eq!(Admission::FailedOpen.status(), None);
    }
}
