use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use quiz_core::model::{Difficulty, Language, Question, QuestionDraft, QuestionId, SubjectId};

use crate::config::GeneratorConfig;
use crate::error::GenerationError;

/// Parameters of one batch request to the question provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub subject: SubjectId,
    pub language: Language,
    pub difficulty: Difficulty,
    pub count: usize,
}

/// External provider of question batches.
///
/// A provider may return fewer questions than requested, including none;
/// callers decide what an empty batch means.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Generate a batch for `request`.
    ///
    /// # Errors
    ///
    /// Returns `GenerationError` when the provider is unreachable or replies
    /// with something that is not a question list.
    async fn generate(&self, request: &BatchRequest) -> Result<Vec<Question>, GenerationError>;
}

/// Question provider backed by an OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct HttpQuestionGenerator {
    client: Client,
    config: Option<GeneratorConfig>,
}

impl HttpQuestionGenerator {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(GeneratorConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<GeneratorConfig>) -> Self {
        let timeout = config.as_ref().map(|c| c.timeout);
        let client = match timeout {
            Some(timeout) => Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|err| {
                    warn!(error = %err, "HTTP client setup failed, using per-request timeouts only");
                    Client::new()
                }),
            None => Client::new(),
        };
        Self { client, config }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    async fn generate(&self, request: &BatchRequest) -> Result<Vec<Question>, GenerationError> {
        let config = self.config.as_ref().ok_or(GenerationError::Disabled)?;

        let url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        let payload = ChatRequest {
            model: config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(request),
                },
            ],
            temperature: 0.7,
        };

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(url)
            .timeout(config.timeout)
            .bearer_auth(&config.api_key)
            .json(&payload)
            .send()
            .await
            .inspect_err(|err| {
                if err.is_timeout() {
                    warn!(subject = %request.subject, timeout = ?config.timeout, "question provider timed out");
                }
            })?;

        if !response.status().is_success() {
            return Err(GenerationError::HttpStatus(response.status()));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Malformed("no message content".into()))?;

        let questions = parse_questions(&content, request)?;
        info!(
            subject = %request.subject,
            difficulty = %request.difficulty,
            requested = request.count,
            received = questions.len(),
            elapsed = ?started.elapsed(),
            "question batch generated"
        );
        Ok(questions)
    }
}

const SYSTEM_PROMPT: &str = "You write multiple-choice questions for competitive exam practice. \
Respond ONLY with strict JSON.";

fn user_prompt(request: &BatchRequest) -> String {
    let topic = if request.subject.is_comprehensive() {
        "a mix of General Science, General Knowledge, Current Affairs, English, Mathematics, \
         Reasoning, History and Geography"
            .to_string()
    } else {
        request.subject.display_name()
    };
    format!(
        "Generate {count} {difficulty} multiple-choice questions about {topic}, written in {language}. \
         Return a JSON array; each item has: questionText (string), options (array of 4 strings), \
         correctAnswerIndex (0-based integer), explanation (string), explanationSummary (one short sentence).",
        count = request.count,
        difficulty = request.difficulty.as_str().to_lowercase(),
        language = request.language.name(),
    )
}

/// Item shape the model is asked to produce.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedQuestion {
    #[serde(default)]
    id: Option<String>,
    question_text: String,
    options: Vec<String>,
    correct_answer_index: usize,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    explanation_summary: Option<String>,
}

/// Turn the model's reply into validated questions.
///
/// Accepts a bare array or an object with a `questions` array, optionally
/// wrapped in a markdown code fence. Items that fail validation are dropped.
fn parse_questions(content: &str, request: &BatchRequest) -> Result<Vec<Question>, GenerationError> {
    let json = strip_code_fence(content);
    let value: Value =
        serde_json::from_str(json).map_err(|err| GenerationError::Malformed(err.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("questions") {
            Some(Value::Array(items)) => items,
            _ => return Err(GenerationError::Malformed("missing questions array".into())),
        },
        _ => return Err(GenerationError::Malformed("expected a JSON array".into())),
    };

    let mut questions = Vec::with_capacity(items.len());
    for item in items {
        let generated: GeneratedQuestion = match serde_json::from_value(item) {
            Ok(generated) => generated,
            Err(err) => {
                warn!(error = %err, "dropping unreadable generated question");
                continue;
            }
        };
        let id = generated
            .id
            .filter(|id| !id.trim().is_empty())
            .map_or_else(QuestionId::generate, QuestionId::new);
        let draft = QuestionDraft {
            id,
            question_text: generated.question_text,
            options: generated.options,
            correct_answer_index: generated.correct_answer_index,
            explanation: generated.explanation,
            explanation_summary: generated.explanation_summary,
            subject: request.subject.clone(),
            difficulty: request.difficulty,
        };
        match draft.validate() {
            Ok(question) => questions.push(question),
            Err(err) => warn!(error = %err, "dropping invalid generated question"),
        }
    }
    Ok(questions)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}
