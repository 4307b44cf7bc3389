use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::flow::Flow;
use crate::schema::{OutputSchema, SchemaField};
use crate::template::PromptTemplate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TranslationInput {
    #[validate(min_length = 1)]
    pub message: String,
    #[validate(min_length = 1)]
    #[validate(max_length = 64)]
    pub target_language: String,
}

impl TranslationInput {
    pub fn new(message: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            target_language: target_language.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TranslationOutput {
    #[validate(min_length = 1)]
    pub translated_message: String,
}

pub struct TranslationFlow;

impl Flow for TranslationFlow {
    type Input = TranslationInput;
    type Output = TranslationOutput;

    const TEMPLATE: PromptTemplate = PromptTemplate::new(
        "chat-translation",
        "Translate this chat message into {{ targetLanguage }}. Keep names, numbers and \
         emoji as they are and match the tone of the original.\n\nMessage: {{ message }}",
    )
    .with_preamble("You translate short chat messages between marketplace clients and freelancers.");

    const OUTPUT_SCHEMA: OutputSchema = OutputSchema::new(&[SchemaField::text(
        "translatedMessage",
        "the translated chat message",
    )]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::ScriptedGenerator;
    use crate::flow::{FlowError, run_flow};

    #[tokio::test]
    async fn translates_into_the_requested_language() {
        let generator = ScriptedGenerator::new([r#"{"translatedMessage": "नमस्ते"}"#]);

        let output = run_flow::<TranslationFlow>(&generator, &TranslationInput::new("Hello", "Hindi"))
            .await
            .unwrap();

        assert_eq!(output.translated_message, "नमस्ते");
        let prompt = generator.last_prompt();
        assert!(prompt.contains("into Hindi"));
        assert!(prompt.contains("Message: Hello"));
        let requests = generator.prompts.lock().unwrap();
        assert_eq!(requests[0].flow_name, "chat-translation");
        assert!(requests[0].preamble.is_some());
    }

    #[tokio::test]
    async fn empty_translation_is_rejected() {
        let generator = ScriptedGenerator::new([r#"{"translatedMessage": ""}"#]);

        let error = run_flow::<TranslationFlow>(&generator, &TranslationInput::new("Hello", "Hindi"))
            .await
            .unwrap_err();

        assert!(matches!(error, FlowError::InvalidOutput { .. }));
    }

    #[tokio::test]
    async fn blank_target_language_is_invalid_input() {
        let generator = ScriptedGenerator::new(Vec::<String>::new());

        let error = run_flow::<TranslationFlow>(&generator, &TranslationInput::new("Hello", ""))
            .await
            .unwrap_err();

        assert!(matches!(error, FlowError::InvalidInput { .. }));
    }
}
