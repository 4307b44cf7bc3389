use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::flow::Flow;
use crate::schema::{OutputSchema, SchemaField};
use crate::template::PromptTemplate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProposalInput {
    #[validate(min_length = 10)]
    pub job_description: String,
    #[validate(min_length = 10)]
    pub freelancer_profile_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProposalOutput {
    #[validate(min_length = 1)]
    pub proposal: String,
    #[validate(min_length = 1)]
    pub cover_message: String,
}

pub struct ProposalFlow;

impl Flow for ProposalFlow {
    type Input = ProposalInput;
    type Output = ProposalOutput;

    const TEMPLATE: PromptTemplate = PromptTemplate::new(
        "proposal-generator",
        "Job description:\n{{ jobDescription }}\n\n\
         Freelancer profile summary:\n{{ freelancerProfileSummary }}\n\n\
         Write a detailed proposal showing how this freelancer's skills and experience \
         answer the key points of the job. Then write a short cover message for the initial \
         application that makes the client want to read the full proposal.",
    )
    .with_preamble(
        "You are an expert proposal writer helping freelancers apply to client jobs. \
         Write in a professional, personal voice.",
    );

    const OUTPUT_SCHEMA: OutputSchema = OutputSchema::new(&[
        SchemaField::text(
            "proposal",
            "detailed project proposal tailored to the job and the freelancer",
        ),
        SchemaField::text("coverMessage", "concise, engaging cover message"),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::ScriptedGenerator;
    use crate::flow::{FlowError, run_flow};

    fn input() -> ProposalInput {
        ProposalInput {
            job_description: "Build a bilingual landing page for a Lucknow bakery".to_string(),
            freelancer_profile_summary: "Frontend developer, 5 years of React and Tailwind"
                .to_string(),
        }
    }

    #[tokio::test]
    async fn drafts_proposal_and_cover_message() {
        let generator = ScriptedGenerator::new([
            r#"{"proposal": "I will build...", "coverMessage": "Hi! I'd love to help."}"#,
        ]);

        let output = run_flow::<ProposalFlow>(&generator, &input()).await.unwrap();

        assert_eq!(output.cover_message, "Hi! I'd love to help.");
        let prompt = generator.last_prompt();
        assert!(prompt.contains("Lucknow bakery"));
        assert!(prompt.contains("\"coverMessage\" (string)"));
    }

    #[tokio::test]
    async fn missing_cover_message_is_a_schema_violation() {
        let generator = ScriptedGenerator::new([r#"{"proposal": "I will build..."}"#]);

        let error = run_flow::<ProposalFlow>(&generator, &input()).await.unwrap_err();

        assert!(matches!(
            error,
            FlowError::SchemaViolation { ref field, .. } if field == "coverMessage"
        ));
    }
}
