use std::sync::Arc;
use std::time::Duration;

use lucknow_llm::StructuredGenerator;
use lucknow_llm::flow::run_flow;
use lucknow_llm::flows::{TranslationFlow, TranslationInput};
use snafu::{ResultExt, ensure};

use super::error::{BlankResultSnafu, EmptyInputSnafu, GenerationSnafu, TranslationError};

pub const DEFAULT_TRANSLATION_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_TARGET_LANGUAGE: &str = "Hindi";

/// Best-effort message translation. One round trip per call, no retries and no shared
/// state, so concurrent calls for different messages are independent.
#[derive(Clone)]
pub struct TranslationService {
    generator: Arc<dyn StructuredGenerator>,
    timeout: Duration,
}

impl TranslationService {
    pub fn new(generator: Arc<dyn StructuredGenerator>) -> Self {
        Self {
            generator,
            timeout: DEFAULT_TRANSLATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn translate(
        &self,
        body: &str,
        target_language: &str,
    ) -> Result<String, TranslationError> {
        ensure!(
            !body.trim().is_empty(),
            EmptyInputSnafu {
                stage: "translate-check-input",
            }
        );

        let input = TranslationInput::new(body, target_language.trim());
        let output = tokio::time::timeout(
            self.timeout,
            run_flow::<TranslationFlow>(self.generator.as_ref(), &input),
        )
        .await
        .map_err(|_| TranslationError::TimedOut {
            stage: "translate-await-generator",
            timeout: self.timeout,
        })?
        .context(GenerationSnafu {
            stage: "translate-run-flow",
        })?;

        let translated = output.translated_message.trim().to_string();
        ensure!(
            !translated.is_empty(),
            BlankResultSnafu {
                stage: "translate-check-output",
            }
        );

        tracing::debug!(
            target_language,
            provider_id = %self.generator.id(),
            "message translated"
        );
        Ok(translated)
    }
}
