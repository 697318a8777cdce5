use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::AnalyzeError;

// POST /analyze body
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub case_text: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Framework {
    pub name: String,
    pub relevance: String,
    pub application: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct KeyMetric {
    pub metric: String,
    pub value: String,
    pub significance: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ProtagonistDecision {
    pub recommendation: String,
    pub reasoning: Vec<String>,
    pub risks: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CounterArgument {
    pub position: String,
    pub argument: String,
    pub rebuttal: String,
}

/// The document the model is asked to return. All six sections are
/// required; a reply missing one does not deserialize.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelAnalysis {
    #[serde(default)]
    pub title: String,
    pub frameworks: Vec<Framework>,
    pub key_questions: Vec<String>,
    pub executive_summary: String,
    pub key_metrics: Vec<KeyMetric>,
    pub protagonist_decision: ProtagonistDecision,
    pub counter_arguments: Vec<CounterArgument>,
}

// What the client receives: the model's sections plus our id and timestamp
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaseAnalysis {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub analysis: ModelAnalysis,
}

impl CaseAnalysis {
    pub fn stamp(analysis: ModelAnalysis) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            analysis,
        }
    }
}

// Analysis job - validated text + channel to answer the waiting handler
pub struct AnalysisJob {
    pub case_text: String,
    pub response_tx: oneshot::Sender<Result<CaseAnalysis, AnalyzeError>>,
}

// OpenAI-compatible chat completion request
#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

#[derive(Serialize, Debug)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Deserialize, Debug)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
pub struct ChatChoice {
    pub message: ChatReply,
}

#[derive(Deserialize, Debug)]
pub struct ChatReply {
    #[serde(default)]
    pub content: Option<String>,
}
