use futures::FutureExt;
use futures::future::BoxFuture;
use snafu::Snafu;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model_id: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model_id: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into().trim().to_string();
        self.model_id = (!model_id.is_empty()).then_some(model_id);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// One prompt round-trip. The generator returns the model's raw text; shaping it into
/// typed output is the caller's job.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub flow_name: &'static str,
    pub prompt: String,
    pub preamble: Option<String>,
    pub model_id: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl GenerationRequest {
    pub fn new(flow_name: &'static str, prompt: impl Into<String>) -> Self {
        Self {
            flow_name,
            prompt: prompt.into(),
            preamble: None,
            model_id: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("generation for flow '{flow_name}' has an empty prompt"))]
    EmptyPrompt {
        stage: &'static str,
        flow_name: &'static str,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("model returned no text for flow '{flow_name}'"))]
    EmptyCompletion {
        stage: &'static str,
        flow_name: &'static str,
    },
    #[snafu(display("text generation is disabled: {reason}"))]
    Disabled { stage: &'static str, reason: String },
}

/// Provider-agnostic text generation seam. Flows only ever see this trait, so the
/// model vendor can change without touching call sites.
pub trait StructuredGenerator: Send + Sync {
    fn id(&self) -> &str;
    fn default_model(&self) -> &str;
    fn complete<'a>(&'a self, request: GenerationRequest) -> BoxFuture<'a, ProviderResult<String>>;
}

/// Stand-in used when no provider is configured; every call fails with the reason.
#[derive(Debug, Clone)]
pub struct DisabledGenerator {
    reason: String,
}

impl DisabledGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl StructuredGenerator for DisabledGenerator {
    fn id(&self) -> &str {
        "disabled"
    }

    fn default_model(&self) -> &str {
        ""
    }

    fn complete<'a>(&'a self, request: GenerationRequest) -> BoxFuture<'a, ProviderResult<String>> {
        async move {
            tracing::debug!(
                flow = request.flow_name,
                reason = %self.reason,
                "generation requested while provider is disabled"
            );
            DisabledSnafu {
                stage: "disabled-generator-complete",
                reason: self.reason.clone(),
            }
            .fail()
        }
        .boxed()
    }
}
