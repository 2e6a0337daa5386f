use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::ClassificationError;

/// Which model the classifier service should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub provider: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt4_1".to_string(),
            provider: "openai".to_string(),
        }
    }
}

/// Raw reply from the classifier service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifierReply {
    pub response: String,
}

/// External text-classification service (allows mocking).
pub trait ClassifierService: Send + Sync {
    fn query(&self, model: &ModelConfig, prompt: &str) -> Result<ClassifierReply, ClassificationError>;
}

impl<T: ClassifierService + ?Sized> ClassifierService for Arc<T> {
    fn query(&self, model: &ModelConfig, prompt: &str) -> Result<ClassifierReply, ClassificationError> {
        (**self).query(model, prompt)
    }
}

// ═══════════════════════════════════════════
// REST client
// ═══════════════════════════════════════════

/// Blocking HTTP client for a REST classifier endpoint.
///
/// Sends `{"model", "provider", "query"}` as JSON with an optional bearer
/// token and expects `{"response": "..."}` back.
pub struct RestClassifierClient {
    api_url: String,
    access_token: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl RestClassifierClient {
    pub fn new(
        api_url: &str,
        access_token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ClassificationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ClassificationError::HttpClient(e.to_string()))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token: access_token.filter(|t| !t.is_empty()),
            client,
            timeout_secs,
        })
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    model: &'a str,
    provider: &'a str,
    query: &'a str,
}

impl ClassifierService for RestClassifierClient {
    fn query(&self, model: &ModelConfig, prompt: &str) -> Result<ClassifierReply, ClassificationError> {
        let body = QueryRequest {
            model: &model.name,
            provider: &model.provider,
            query: prompt,
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                ClassificationError::Connection(self.api_url.clone())
            } else if e.is_timeout() {
                ClassificationError::Timeout(self.timeout_secs)
            } else {
                ClassificationError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClassificationError::Service {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ClassifierReply>()
            .map_err(|e| ClassificationError::ResponseParsing(e.to_string()))
    }
}

// ═══════════════════════════════════════════
// Scripted client
// ═══════════════════════════════════════════

/// Mock classifier for testing — plays back a script of replies, then
/// repeats a fallback.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Result<String, ClassificationError>>>,
    fallback: Result<String, ClassificationError>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    /// Always reply with `response`.
    pub fn new(response: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(response.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail with `error`.
    pub fn failing(error: ClassificationError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replay `steps` in order before falling back.
    pub fn with_script(self, steps: Vec<Result<String, ClassificationError>>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(steps);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ClassifierService for ScriptedClassifier {
    fn query(&self, _model: &ModelConfig, _prompt: &str) -> Result<ClassifierReply, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| self.fallback.clone());
        step.map(|response| ClassifierReply { response })
    }
}
