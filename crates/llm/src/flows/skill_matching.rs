use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::flow::{Flow, FlowError, FlowResult, run_flow};
use crate::provider::StructuredGenerator;
use crate::schema::{OutputSchema, SchemaField};
use crate::template::PromptTemplate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FreelancerSummary {
    #[validate(min_length = 1)]
    pub id: String,
    pub skills: Vec<String>,
    pub bio: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SkillMatchingInput {
    #[validate(min_length = 10)]
    pub job_requirements: String,
    #[validate(min_items = 1)]
    #[validate(max_items = 50)]
    pub freelancer_profiles: Vec<FreelancerSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FreelancerMatch {
    #[validate(min_length = 1)]
    pub freelancer_id: String,
    #[validate(minimum = 0.0)]
    #[validate(maximum = 100.0)]
    pub match_score: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SkillMatchingOutput {
    pub suggested_matches: Vec<FreelancerMatch>,
}

pub struct SkillMatchingFlow;

const MATCH_FIELDS: &[SchemaField] = &[
    SchemaField::text("freelancerId", "id of the matched freelancer, copied from the input"),
    SchemaField::number(
        "matchScore",
        "relevance from 0 to 100 where 100 is a perfect match",
    ),
    SchemaField::text(
        "reasoning",
        "why this freelancer fits, covering skills, bio and location",
    ),
];

impl Flow for SkillMatchingFlow {
    type Input = SkillMatchingInput;
    type Output = SkillMatchingOutput;

    const TEMPLATE: PromptTemplate = PromptTemplate::new(
        "skill-matching",
        "Job requirements:\n{{ jobRequirements }}\n\n\
         Score each of these freelancers against the job:\n\
         {% for profile in freelancerProfiles %}\
         Freelancer ID: {{ profile.id }}\n\
         Skills: {{ profile.skills | join(sep=\", \") }}\n\
         Bio: {{ profile.bio }}\n\
         Location: {{ profile.location }}\n\
         ---\n\
         {% endfor %}\
         Return a match for every freelancer with a score and reasoning, highest score first.",
    )
    .with_preamble(
        "You match freelancers to jobs using their skills, location and overall profile.",
    );

    const OUTPUT_SCHEMA: OutputSchema = OutputSchema::new(&[SchemaField::object_list(
        "suggestedMatches",
        MATCH_FIELDS,
        "one entry per freelancer, ordered by matchScore descending",
    )]);
}

/// Runs the flow, then enforces what the model is only asked to do: scores in range,
/// one match per known freelancer, highest score first.
pub async fn match_freelancers(
    generator: &dyn StructuredGenerator,
    input: &SkillMatchingInput,
) -> FlowResult<SkillMatchingOutput> {
    let output = run_flow::<SkillMatchingFlow>(generator, input).await?;

    for candidate in &output.suggested_matches {
        candidate
            .validate()
            .map_err(|errors| FlowError::InvalidOutput {
                stage: "skill-matching-validate-match",
                flow: SkillMatchingFlow::TEMPLATE.name,
                details: format!("match for '{}': {errors}", candidate.freelancer_id),
            })?;
    }

    let known: HashSet<&str> = input
        .freelancer_profiles
        .iter()
        .map(|profile| profile.id.as_str())
        .collect();
    let suggested_matches = rank_matches(&known, output.suggested_matches);

    tracing::debug!(
        candidates = input.freelancer_profiles.len(),
        matches = suggested_matches.len(),
        "skill matching ranked"
    );
    Ok(SkillMatchingOutput { suggested_matches })
}

fn rank_matches(known: &HashSet<&str>, matches: Vec<FreelancerMatch>) -> Vec<FreelancerMatch> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<FreelancerMatch> = matches
        .into_iter()
        .filter(|candidate| {
            let id = candidate.freelancer_id.as_str();
            if !known.contains(id) {
                tracing::warn!(freelancer_id = %id, "model matched an unknown freelancer");
                return false;
            }
            seen.insert(candidate.freelancer_id.clone())
        })
        .collect();
    ranked.sort_by(|left, right| right.match_score.total_cmp(&left.match_score));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testing::ScriptedGenerator;

    fn profile(id: &str, skills: &[&str]) -> FreelancerSummary {
        FreelancerSummary {
            id: id.to_string(),
            skills: skills.iter().map(|skill| skill.to_string()).collect(),
            bio: format!("{id} bio"),
            location: "Lucknow".to_string(),
        }
    }

    fn input() -> SkillMatchingInput {
        SkillMatchingInput {
            job_requirements: "Need a React developer for a dashboard".to_string(),
            freelancer_profiles: vec![
                profile("f1", &["React", "Node.js"]),
                profile("f2", &["Figma", "Illustrator"]),
            ],
        }
    }

    #[tokio::test]
    async fn matches_are_ranked_and_filtered() {
        let generator = ScriptedGenerator::new([r#"{"suggestedMatches": [
            {"freelancerId": "f2", "matchScore": 20, "reasoning": "design only"},
            {"freelancerId": "ghost", "matchScore": 99, "reasoning": "invented"},
            {"freelancerId": "f1", "matchScore": 92.5, "reasoning": "React expert"},
            {"freelancerId": "f1", "matchScore": 10, "reasoning": "repeat"}
        ]}"#]);

        let output = match_freelancers(&generator, &input()).await.unwrap();

        let ranked: Vec<(&str, f64)> = output
            .suggested_matches
            .iter()
            .map(|candidate| (candidate.freelancer_id.as_str(), candidate.match_score))
            .collect();
        assert_eq!(ranked, vec![("f1", 92.5), ("f2", 20.0)]);

        let prompt = generator.last_prompt();
        assert!(prompt.contains("Freelancer ID: f1\nSkills: React, Node.js\n"));
        assert!(prompt.contains("Freelancer ID: f2"));
    }

    #[tokio::test]
    async fn out_of_range_scores_are_rejected() {
        let generator = ScriptedGenerator::new([
            r#"{"suggestedMatches": [{"freelancerId": "f1", "matchScore": 140, "reasoning": "x"}]}"#,
        ]);

        let error = match_freelancers(&generator, &input()).await.unwrap_err();

        assert!(matches!(error, FlowError::InvalidOutput { .. }));
    }

    #[tokio::test]
    async fn empty_candidate_list_is_invalid_input() {
        let generator = ScriptedGenerator::new(Vec::<String>::new());
        let input = SkillMatchingInput {
            job_requirements: "Need a React developer for a dashboard".to_string(),
            freelancer_profiles: Vec::new(),
        };

        let error = match_freelancers(&generator, &input).await.unwrap_err();

        assert!(matches!(error, FlowError::InvalidInput { .. }));
    }
}
