pub mod flow;
pub mod flows;
pub mod provider;
pub mod rig_adapter;
pub mod schema;
pub mod template;

use std::sync::Arc;

pub use flow::{Flow, FlowError, FlowResult, extract_json_object, generate, run_flow};
pub use provider::{
    DEFAULT_OPENAI_ENDPOINT, DEFAULT_OPENAI_MODEL, DisabledGenerator, GenerationRequest,
    ProviderConfig, ProviderError, ProviderResult, StructuredGenerator,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigStructuredGenerator};
pub use schema::{FieldKind, OutputSchema, SchemaField};
pub use template::PromptTemplate;

/// Builds the generator for a configured provider id. `rig-openai` is accepted as an
/// alias of `openai`.
pub fn create_generator(config: ProviderConfig) -> ProviderResult<Arc<dyn StructuredGenerator>> {
    match config.provider_id.as_str() {
        RIG_OPENAI_PROVIDER_ID | "rig-openai" => {
            tracing::debug!(
                provider_id = %config.provider_id,
                endpoint = %config.endpoint,
                "creating rig structured generator"
            );
            Ok(Arc::new(RigStructuredGenerator::new(config)?))
        }
        other => provider::UnsupportedProviderSnafu {
            stage: "create-generator",
            provider_id: other.to_string(),
        }
        .fail(),
    }
}
