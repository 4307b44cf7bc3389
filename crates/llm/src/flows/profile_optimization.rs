use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::flow::Flow;
use crate::schema::{OutputSchema, SchemaField};
use crate::template::PromptTemplate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileOptimizationInput {
    #[validate(min_length = 1)]
    pub current_profile_description: String,
    pub skills: Vec<String>,
    pub portfolio_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_job_types: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_feedback_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileOptimizationOutput {
    pub overall_recommendations: Vec<String>,
    pub profile_description_suggestions: Vec<String>,
    pub skill_suggestions: Vec<String>,
    pub portfolio_suggestions: Vec<String>,
    #[validate(min_length = 1)]
    pub call_to_action: String,
}

pub struct ProfileOptimizationFlow;

impl Flow for ProfileOptimizationFlow {
    type Input = ProfileOptimizationInput;
    type Output = ProfileOptimizationOutput;

    const TEMPLATE: PromptTemplate = PromptTemplate::new(
        "profile-optimization",
        "Review this freelancer profile and give concrete, actionable tips that will \
         attract more relevant clients and jobs.\n\n\
         Current profile description:\n{{ currentProfileDescription }}\n\n\
         Skills:\n{% for skill in skills %}- {{ skill }}\n{% endfor %}\n\
         Portfolio summary:\n{{ portfolioSummary }}\n\
         {% if targetJobTypes %}\nTarget job types:\n{{ targetJobTypes }}\n{% endif %}\
         {% if clientFeedbackSummary %}\nClient feedback summary:\n{{ clientFeedbackSummary }}\n{% endif %}\
         \nFocus on clarity, impact and the clients this freelancer wants.",
    )
    .with_preamble("You are a career coach who optimizes freelancer marketplace profiles.");

    const OUTPUT_SCHEMA: OutputSchema = OutputSchema::new(&[
        SchemaField::text_list("overallRecommendations", "high-level recommendations"),
        SchemaField::text_list(
            "profileDescriptionSuggestions",
            "specific improvements to the profile description",
        ),
        SchemaField::text_list("skillSuggestions", "how to optimize the listed skills"),
        SchemaField::text_list(
            "portfolioSuggestions",
            "how to present the portfolio better",
        ),
        SchemaField::text("callToAction", "short encouraging closing message"),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::ScriptedGenerator;
    use crate::flow::{FlowError, run_flow};

    const REPLY: &str = r#"{
        "overallRecommendations": ["Lead with outcomes"],
        "profileDescriptionSuggestions": ["Mention Lucknow clients"],
        "skillSuggestions": ["Add Next.js"],
        "portfolioSuggestions": ["Show before/after shots"],
        "callToAction": "Update today!"
    }"#;

    fn input() -> ProfileOptimizationInput {
        ProfileOptimizationInput {
            current_profile_description: "I build websites.".to_string(),
            skills: vec!["React".to_string(), "CSS".to_string()],
            portfolio_summary: "Three shop sites".to_string(),
            target_job_types: None,
            client_feedback_summary: Some("Fast and friendly".to_string()),
        }
    }

    #[tokio::test]
    async fn optional_sections_follow_the_input() {
        let generator = ScriptedGenerator::new([REPLY]);

        let output = run_flow::<ProfileOptimizationFlow>(&generator, &input())
            .await
            .unwrap();

        assert_eq!(output.skill_suggestions, vec!["Add Next.js"]);
        let prompt = generator.last_prompt();
        assert!(prompt.contains("- React\n- CSS\n"));
        assert!(prompt.contains("Client feedback summary:\nFast and friendly"));
        assert!(!prompt.contains("Target job types"));
    }

    #[tokio::test]
    async fn list_fields_must_hold_strings() {
        let generator = ScriptedGenerator::new([r#"{
            "overallRecommendations": [1, 2],
            "profileDescriptionSuggestions": [],
            "skillSuggestions": [],
            "portfolioSuggestions": [],
            "callToAction": "Go"
        }"#]);

        let error = run_flow::<ProfileOptimizationFlow>(&generator, &input())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            FlowError::SchemaViolation { ref field, .. } if field == "overallRecommendations"
        ));
    }
}
