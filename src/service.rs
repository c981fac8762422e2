//! Admission service.
//!
//! Answers admission requests read one per line, `<limiter> <identifier> [cost]`,
//! with one JSON decision per line. The service is generic over its reader and
//! writer; the binary runs it on stdin and stdout.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::http::{
    admit_with_cost, Admission, RejectionBody, STATUS_BAD_REQUEST, STATUS_TOO_MANY_REQUESTS,
};
use crate::ratelimit::RateLimiter;

/// Status of a forwarded request.
pub const STATUS_OK: u16 = 200;

/// One decision as written back to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ResponseBody>,
}

/// Body of a non-200 response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Rejected(RejectionBody),
    Invalid { error: String },
}

impl AdmissionResponse {
    fn invalid(error: impl Into<String>) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            headers: BTreeMap::new(),
            body: Some(ResponseBody::Invalid { error: error.into() }),
        }
    }

    fn from_admission(admission: Admission) -> Self {
        match admission {
            Admission::Allowed(headers) => Self {
                status: STATUS_OK,
                headers: pairs(headers.to_pairs()),
                body: None,
            },
            Admission::Rejected(headers, body) => Self {
                status: STATUS_TOO_MANY_REQUESTS,
                headers: pairs(headers.to_pairs()),
                body: Some(ResponseBody::Rejected(body)),
            },
            Admission::Invalid(reason) => Self::invalid(reason),
            Admission::FailedOpen => Self {
                status: STATUS_OK,
                headers: BTreeMap::new(),
                body: None,
            },
        }
    }
}

fn pairs(pairs: [(&'static str, String); 3]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// A parsed admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest<'a> {
    pub limiter: &'a str,
    pub identifier: &'a str,
    pub cost: u64,
}

impl<'a> AdmissionRequest<'a> {
    /// Parse one request line. Blank lines parse to `Ok(None)`.
    pub fn parse(line: &'a str) -> std::result::Result<Option<Self>, String> {
        let mut fields = line.split_whitespace();
        let Some(limiter) = fields.next() else {
            return Ok(None);
        };
        let identifier = fields
            .next()
            .ok_or_else(|| "expected '<limiter> <identifier> [cost]'".to_string())?;
        let cost = match fields.next() {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| format!("invalid cost '{}'", raw))?,
            None => 1,
        };
        if cost == 0 {
            return Err("cost must be at least 1".to_string());
        }
        if fields.next().is_some() {
            return Err("unexpected trailing fields".to_string());
        }
        Ok(Some(Self {
            limiter,
            identifier,
            cost,
        }))
    }
}

/// Routes admission requests to named limiters.
pub struct AdmissionService {
    limiters: HashMap<String, Arc<RateLimiter>>,
}

impl AdmissionService {
    pub fn new(limiters: impl IntoIterator<Item = (String, Arc<RateLimiter>)>) -> Self {
        Self {
            limiters: limiters.into_iter().collect(),
        }
    }

    /// Look up a limiter by name.
    pub fn limiter(&self, name: &str) -> Option<&Arc<RateLimiter>> {
        self.limiters.get(name)
    }

    /// Answer one request line. Returns `None` for blank lines.
    #[instrument(skip(self))]
    pub fn handle_line(&self, line: &str) -> Option<AdmissionResponse> {
        let request = match AdmissionRequest::parse(line) {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(error) => {
                warn!(error = %error, "Malformed admission request");
                return Some(AdmissionResponse::invalid(error));
            }
        };

        let Some(limiter) = self.limiters.get(request.limiter) else {
            warn!(limiter = %request.limiter, "Unknown limiter");
            return Some(AdmissionResponse::invalid(format!(
                "unknown limiter '{}'",
                request.limiter
            )));
        };

        let admission = admit_with_cost(limiter, request.identifier, request.cost);
        debug!(
            limiter = %request.limiter,
            identifier = %request.identifier,
            cost = request.cost,
            allowed = admission.is_allowed(),
            "Admission decided"
        );
        Some(AdmissionResponse::from_admission(admission))
    }

    /// Serve requests from `reader` until end of input.
    ///
    /// Returns the number of requests answered.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut answered = 0;

        while let Some(line) = lines.next_line().await? {
            let Some(response) = self.handle_line(&line) else {
                continue;
            };
            let mut encoded = serde_json::to_vec(&response)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await?;
            writer.flush().await?;
            answered += 1;
        }

        info!(answered = answered, "Admission input closed");
        Ok(answered)
    }
}
