// Test doubles shared by the module tests
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::invoker::{ModelClient, UpstreamError};
use crate::rate_limit::Clock;

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

enum Reply {
    Content(String),
    Fail(Box<dyn Fn() -> UpstreamError + Send + Sync>),
}

pub struct FakeModel {
    reply: Reply,
    calls: AtomicUsize,
}

impl FakeModel {
    pub fn replying(content: String) -> Self {
        Self {
            reply: Reply::Content(content),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: impl Fn() -> UpstreamError + Send + Sync + 'static) -> Self {
        Self {
            reply: Reply::Fail(Box::new(err)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn complete(&self, _case_text: &str) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Content(content) => Ok(content.clone()),
            Reply::Fail(make) => Err(make()),
        }
    }
}

// Case text of exactly `chars` characters
pub fn case_text(chars: usize) -> String {
    "Acme Corp weighs entering the Brazilian market. "
        .chars()
        .cycle()
        .take(chars)
        .collect::<String>()
        .replace(' ', "x")
}

pub fn sample_model_json() -> String {
    serde_json::json!({
        "title": "Acme Goes South",
        "frameworks": [{
            "name": "SWOT",
            "relevance": "Acme must weigh internal strengths against a new market.",
            "application": ["Strong brand", "Thin local network", "Growing demand"]
        }],
        "keyQuestions": ["Should Acme enter now?", "What would make you wait?"],
        "executiveSummary": "Acme is considering expansion.\n\nMargins are thin.\n\nTiming matters.",
        "keyMetrics": [{ "metric": "Revenue", "value": "$12M", "significance": "Funds the launch" }],
        "protagonistDecision": {
            "recommendation": "Enter through a partnership.",
            "reasoning": ["Lower capital at risk"],
            "risks": ["Partner lock-in"]
        },
        "counterArguments": [{
            "position": "Wait a year",
            "argument": "The currency is volatile.",
            "rebuttal": "Hedging covers most of the exposure."
        }]
    })
    .to_string()
}
