use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::rate_limit::Policy;

// Which callers take which path through the gate
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    // everyone is keyed by IP, credentials are ignored
    Anonymous,
    // everyone needs a session and an active subscription
    Subscription,
    // credentials present -> subscriber path, otherwise anonymous
    Mixed,
}

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "caseprep-gateway")]
#[command(about = "Usage-gated gateway in front of an LLM case analysis model")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    // Base URL of the OpenAI-compatible API
    #[arg(long, env = "UPSTREAM_URL", default_value = "https://api.openai.com/v1")]
    pub upstream_url: String,

    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    #[arg(long, env = "MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    #[arg(long, default_value_t = 0.3)]
    pub temperature: f32,

    #[arg(long, default_value_t = 4000)]
    pub max_tokens: u32,

    // Upstream call timeout in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub upstream_timeout: u64,

    #[arg(long, value_enum, env = "ACCESS_MODE", default_value_t = AccessMode::Mixed)]
    pub access_mode: AccessMode,

    // Anonymous requests allowed per window
    #[arg(long, default_value_t = 10)]
    pub rate_limit: u32,

    // Anonymous window in seconds
    #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
    pub rate_window: u64,

    // Subscriber analyses per calendar month
    #[arg(long, default_value_t = 50)]
    pub monthly_quota: u32,

    // JSON file of accounts: [{ userId, tokenSha256, subscriptionActive }]
    #[arg(long, env = "ACCOUNTS_FILE")]
    pub accounts_file: Option<PathBuf>,

    // Consume a usage slot before validating the case text
    #[arg(long, default_value_t = false)]
    pub charge_invalid_requests: bool,

    // Pending analyses before new ones are turned away
    #[arg(long, default_value_t = 100)]
    pub queue_capacity: usize,

    // Concurrent upstream calls
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    // Ledger sweep interval in seconds
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval: u64,
}

impl Args {
    pub fn anonymous_policy(&self) -> Policy {
        Policy::fixed_window(self.rate_limit, Duration::from_secs(self.rate_window))
    }

    pub fn subscriber_policy(&self) -> Policy {
        Policy::CalendarMonth {
            limit: self.monthly_quota,
        }
    }
}
