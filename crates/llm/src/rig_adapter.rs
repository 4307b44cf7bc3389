use futures::FutureExt;
use futures::future::BoxFuture;
use rig::completion::message::AssistantContent;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use snafu::{ResultExt, ensure};

use super::provider::{
    CompletionsFailedSnafu, DEFAULT_OPENAI_MODEL, EmptyCompletionSnafu, EmptyPromptSnafu,
    GenerationRequest, HttpClientSnafu, MissingApiKeySnafu, ProviderConfig, ProviderResult,
    StructuredGenerator,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

pub struct RigStructuredGenerator {
    config: ProviderConfig,
}

impl RigStructuredGenerator {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-generator-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn model_for(&self, request: &GenerationRequest) -> String {
        request
            .model_id
            .clone()
            .or_else(|| self.config.model_id.clone())
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string())
    }

    async fn run_completion(&self, request: GenerationRequest) -> ProviderResult<String> {
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "rig-completion-prompt",
                flow_name: request.flow_name,
            }
        );

        let client = Self::build_client(&self.config)?;
        let model_id = self.model_for(&request);
        let model = client.completion_model(model_id.clone());

        let mut builder = model.completion_request(RigMessage::user(request.prompt));

        if let Some(preamble) = request.preamble
            && !preamble.trim().is_empty()
        {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = request.temperature.or(self.config.temperature) {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens.or(self.config.max_tokens) {
            builder = builder.max_tokens(max_tokens);
        }

        tracing::debug!(
            flow = request.flow_name,
            provider_id = %self.config.provider_id,
            model_id = %model_id,
            "sending completion request"
        );

        let response = builder.send().await.context(CompletionsFailedSnafu {
            stage: "send-completion",
        })?;

        // Reasoning and tool-call parts carry nothing the flows can parse.
        let text = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            tracing::warn!(
                flow = request.flow_name,
                model_id = %model_id,
                "completion response carried no text content"
            );
            return EmptyCompletionSnafu {
                stage: "read-completion-text",
                flow_name: request.flow_name,
            }
            .fail();
        }

        Ok(text)
    }
}

impl StructuredGenerator for RigStructuredGenerator {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn default_model(&self) -> &str {
        self.config
            .model_id
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_MODEL)
    }

    fn complete<'a>(&'a self, request: GenerationRequest) -> BoxFuture<'a, ProviderResult<String>> {
        self.run_completion(request).boxed()
    }
}
