use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::flow::{Flow, FlowResult, run_flow};
use crate::provider::StructuredGenerator;
use crate::schema::{OutputSchema, SchemaField};
use crate::template::PromptTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Job,
    Freelancer,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Job => "job",
            Self::Freelancer => "freelancer",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SearchAlternativesInput {
    #[validate(min_length = 1)]
    #[validate(max_length = 200)]
    pub original_query: String,
    pub search_type: SearchType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SearchAlternativesOutput {
    #[validate(max_items = 10)]
    pub suggestions: Vec<String>,
}

pub struct SearchAlternativesFlow;

impl Flow for SearchAlternativesFlow {
    type Input = SearchAlternativesInput;
    type Output = SearchAlternativesOutput;

    const TEMPLATE: PromptTemplate = PromptTemplate::new(
        "search-alternatives",
        "A user of a marketplace connecting clients and freelancers searched for a \
         {{ searchType }} with the query \"{{ originalQuery }}\" and got no results.\n\
         Offer 3 to 5 alternative search terms or broader categories likely to surface \
         relevant {{ searchType }} listings. Prefer broader categories, synonyms and more \
         general phrasings of the keywords. Never repeat the original query and keep every \
         suggestion distinct.",
    );

    const OUTPUT_SCHEMA: OutputSchema = OutputSchema::new(&[SchemaField::text_list(
        "suggestions",
        "alternative search terms or broader categories",
    )]);
}

/// Runs the flow and drops blank suggestions, echoes of the original query and
/// case-insensitive duplicates.
pub async fn suggest_search_alternatives(
    generator: &dyn StructuredGenerator,
    input: &SearchAlternativesInput,
) -> FlowResult<SearchAlternativesOutput> {
    let output = run_flow::<SearchAlternativesFlow>(generator, input).await?;
    Ok(SearchAlternativesOutput {
        suggestions: clean_suggestions(&input.original_query, output.suggestions),
    })
}

fn clean_suggestions(original_query: &str, suggestions: Vec<String>) -> Vec<String> {
    let original = original_query.trim().to_lowercase();
    let mut seen = HashSet::new();
    suggestions
        .into_iter()
        .map(|suggestion| suggestion.trim().to_string())
        .filter(|suggestion| {
            let key = suggestion.to_lowercase();
            !key.is_empty() && key != original && seen.insert(key)
        })
        .collect()
}
