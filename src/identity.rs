use axum::http::{HeaderMap, header};

pub const UNKNOWN_IP: &str = "unknown";

/// Who is asking. Anonymous callers are keyed by IP, subscribers by user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous { ip: String },
    Subscriber { user_id: String },
}

impl Identity {
    // Namespaced so an IP string never collides with a user id
    pub fn ledger_key(&self) -> String {
        match self {
            Identity::Anonymous { ip } => format!("ip:{ip}"),
            Identity::Subscriber { user_id } => format!("user:{user_id}"),
        }
    }

    pub fn tier(&self) -> &'static str {
        match self {
            Identity::Anonymous { .. } => "anonymous",
            Identity::Subscriber { .. } => "subscriber",
        }
    }
}

// Everything the gate may use to work out an identity
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub bearer: Option<String>,
    pub client_ip: String,
}

impl Credentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            bearer: bearer_token(headers),
            client_ip: client_ip(headers),
        }
    }
}

/// `X-Forwarded-For` (left-most hop), then `X-Real-IP`, then `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_IP)
        .to_string()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
