use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_valid::Validate;
use snafu::{OptionExt, ResultExt, Snafu};

use super::provider::{GenerationRequest, ProviderError, StructuredGenerator};
use super::schema::OutputSchema;
use super::template::PromptTemplate;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FlowError {
    #[snafu(display("input for flow '{flow}' is invalid: {details}"))]
    InvalidInput {
        stage: &'static str,
        flow: &'static str,
        details: String,
    },
    #[snafu(display("failed to build context for prompt template '{template}': {source}"))]
    TemplateContext {
        stage: &'static str,
        template: &'static str,
        source: tera::Error,
    },
    #[snafu(display("failed to render prompt template '{template}': {source}"))]
    TemplateRender {
        stage: &'static str,
        template: &'static str,
        source: tera::Error,
    },
    #[snafu(display("flow '{flow}' generation failed: {source}"))]
    Provider {
        stage: &'static str,
        flow: &'static str,
        source: ProviderError,
    },
    #[snafu(display("flow '{flow}' response contained no JSON object"))]
    MissingJson { stage: &'static str, flow: &'static str },
    #[snafu(display("flow '{flow}' response is not valid JSON: {source}"))]
    MalformedJson {
        stage: &'static str,
        flow: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("flow '{flow}' response violates its schema at '{field}'"))]
    SchemaViolation {
        stage: &'static str,
        flow: &'static str,
        field: String,
    },
    #[snafu(display("flow '{flow}' response could not be decoded: {source}"))]
    DecodeOutput {
        stage: &'static str,
        flow: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("flow '{flow}' output is invalid: {details}"))]
    InvalidOutput {
        stage: &'static str,
        flow: &'static str,
        details: String,
    },
}

/// A typed prompt: schema-checked input in, schema-checked output out.
pub trait Flow {
    type Input: Serialize + Validate + Sync;
    type Output: DeserializeOwned + Validate + Send;

    const TEMPLATE: PromptTemplate;
    const OUTPUT_SCHEMA: OutputSchema;
}

pub async fn run_flow<F>(
    generator: &dyn StructuredGenerator,
    input: &F::Input,
) -> FlowResult<F::Output>
where
    F: Flow,
{
    let template = F::TEMPLATE;
    let schema = F::OUTPUT_SCHEMA;
    generate(generator, &template, input, &schema).await
}

/// Structured generation: validate the input, render the template, ask the model, then
/// hold the answer to the output schema before handing back a typed value.
pub async fn generate<I, O>(
    generator: &dyn StructuredGenerator,
    template: &PromptTemplate,
    input: &I,
    schema: &OutputSchema,
) -> FlowResult<O>
where
    I: Serialize + Validate + Sync,
    O: DeserializeOwned + Validate,
{
    let flow = template.name;
    input.validate().map_err(|errors| FlowError::InvalidInput {
        stage: "structured-validate-input",
        flow,
        details: errors.to_string(),
    })?;

    let prompt = format!("{}\n\n{}", template.render(input)?, schema.instructions());
    let mut request = GenerationRequest::new(flow, prompt);
    if let Some(preamble) = template.preamble {
        request = request.with_preamble(preamble);
    }

    let raw = generator.complete(request).await.context(ProviderSnafu {
        stage: "structured-complete",
        flow,
    })?;

    let json_text = extract_json_object(&raw).context(MissingJsonSnafu {
        stage: "structured-extract-json",
        flow,
    })?;
    let value: serde_json::Value = serde_json::from_str(json_text).context(MalformedJsonSnafu {
        stage: "structured-parse-json",
        flow,
    })?;

    if let Err(field) = schema.check(&value) {
        tracing::warn!(flow, field = %field, "model response violates output schema");
        return SchemaViolationSnafu {
            stage: "structured-check-schema",
            flow,
            field,
        }
        .fail();
    }

    let output: O = serde_json::from_value(value).context(DecodeOutputSnafu {
        stage: "structured-decode-output",
        flow,
    })?;
    output.validate().map_err(|errors| FlowError::InvalidOutput {
        stage: "structured-validate-output",
        flow,
        details: errors.to_string(),
    })?;

    tracing::debug!(flow, provider_id = %generator.id(), "structured generation completed");
    Ok(output)
}

/// Slices the first JSON object out of a model reply, dropping code fences or
/// chatter around it. When no complete object parses, the span up to the last `}`
/// is returned so the caller reports it as malformed.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let candidate = &raw[start..];
    let mut values = serde_json::Deserializer::from_str(candidate).into_iter::<IgnoredAny>();
    if let Some(Ok(_)) = values.next() {
        return Some(&candidate[..values.byte_offset()]);
    }

    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures::FutureExt;
    use futures::future::BoxFuture;

    use crate::provider::{
        DisabledSnafu, GenerationRequest, ProviderResult, StructuredGenerator,
    };

    /// Replays canned replies in order and records every prompt it was sent.
    pub(crate) struct ScriptedGenerator {
        replies: Mutex<VecDeque<String>>,
        pub(crate) prompts: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        pub(crate) fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn last_prompt(&self) -> String {
            self.prompts
                .lock()
                .unwrap()
                .last()
                .map(|request| request.prompt.clone())
                .unwrap_or_default()
        }
    }

    impl StructuredGenerator for ScriptedGenerator {
        fn id(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        fn complete<'a>(
            &'a self,
            request: GenerationRequest,
        ) -> BoxFuture<'a, ProviderResult<String>> {
            async move {
                self.prompts.lock().unwrap().push(request);
                match self.replies.lock().unwrap().pop_front() {
                    Some(reply) => Ok(reply),
                    None => DisabledSnafu {
                        stage: "scripted-generator-exhausted",
                        reason: "no scripted reply left".to_string(),
                    }
                    .fail(),
                }
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_valid::Validate;

    use super::testing::ScriptedGenerator;
    use super::*;
    use crate::schema::SchemaField;

    #[derive(Serialize, Validate)]
    struct EchoInput {
        #[validate(min_length = 1)]
        word: String,
    }

    #[derive(Debug, Deserialize, Validate)]
    #[serde(rename_all = "camelCase")]
    struct EchoOutput {
        #[validate(min_length = 1)]
        echoed_word: String,
    }

    const TEMPLATE: PromptTemplate = PromptTemplate::new("echo", "Echo {{ word }}");
    const SCHEMA: OutputSchema =
        OutputSchema::new(&[SchemaField::text("echoedWord", "the echoed word")]);

    fn input(word: &str) -> EchoInput {
        EchoInput {
            word: word.to_string(),
        }
    }

    #[tokio::test]
    async fn fenced_json_reply_decodes() {
        let generator =
            ScriptedGenerator::new(["Sure!\n```json\n{\"echoedWord\": \"namaste\"}\n```"]);

        let output: EchoOutput = generate(&generator, &TEMPLATE, &input("namaste"), &SCHEMA)
            .await
            .unwrap();

        assert_eq!(output.echoed_word, "namaste");
        let prompt = generator.last_prompt();
        assert!(prompt.starts_with("Echo namaste"));
        assert!(prompt.contains("\"echoedWord\" (string)"));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_model() {
        let generator = ScriptedGenerator::new(["{\"echoedWord\": \"x\"}"]);

        let error = generate::<_, EchoOutput>(&generator, &TEMPLATE, &input(""), &SCHEMA)
            .await
            .unwrap_err();

        assert!(matches!(error, FlowError::InvalidInput { .. }));
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn schema_and_validation_failures_are_distinct() {
        let generator = ScriptedGenerator::new([
            "no json here",
            "{\"echoedWord\": 7}",
            "{\"echoedWord\": \"\"}",
            "{\"echoedWord\": \"ok\"",
        ]);

        let missing = generate::<_, EchoOutput>(&generator, &TEMPLATE, &input("a"), &SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(missing, FlowError::MissingJson { .. }));

        let wrong_type = generate::<_, EchoOutput>(&generator, &TEMPLATE, &input("a"), &SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(
            wrong_type,
            FlowError::SchemaViolation { ref field, .. } if field == "echoedWord"
        ));

        let empty = generate::<_, EchoOutput>(&generator, &TEMPLATE, &input("a"), &SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(empty, FlowError::InvalidOutput { .. }));

        let truncated = generate::<_, EchoOutput>(&generator, &TEMPLATE, &input("a"), &SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(truncated, FlowError::MissingJson { .. }));
    }

    #[tokio::test]
    async fn provider_failures_are_wrapped() {
        let generator = ScriptedGenerator::new(Vec::<String>::new());

        let error = generate::<_, EchoOutput>(&generator, &TEMPLATE, &input("a"), &SCHEMA)
            .await
            .unwrap_err();

        assert!(matches!(error, FlowError::Provider { .. }));
    }

    #[test]
    fn extract_json_object_trims_surroundings() {
        assert_eq!(extract_json_object("x {\"a\":1} y"), Some("{\"a\":1}"));
        assert_eq!(extract_json_object("}{"), None);
        assert_eq!(extract_json_object("plain"), None);
    }

    #[test]
    fn extract_json_object_ignores_braces_after_the_object() {
        assert_eq!(
            extract_json_object("{\"a\": {\"b\": \"}\"}} :}"),
            Some("{\"a\": {\"b\": \"}\"}}")
        );
        assert_eq!(extract_json_object("{\"a\": oops} }"), Some("{\"a\": oops} }"));
    }

    #[tokio::test]
    async fn trailing_brace_after_the_reply_still_decodes() {
        let generator =
            ScriptedGenerator::new(["{\"echoedWord\": \"ok\"} :}", "{\"echoedWord\": ok}"]);

        let output: EchoOutput = generate(&generator, &TEMPLATE, &input("ok"), &SCHEMA)
            .await
            .unwrap();
        assert_eq!(output.echoed_word, "ok");

        let malformed = generate::<_, EchoOutput>(&generator, &TEMPLATE, &input("ok"), &SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(malformed, FlowError::MalformedJson { .. }));
    }
}
