pub mod profile_optimization;
pub mod proposal;
pub mod search_alternatives;
pub mod skill_matching;
pub mod translation;

pub use profile_optimization::{
    ProfileOptimizationFlow, ProfileOptimizationInput, ProfileOptimizationOutput,
};
pub use proposal::{ProposalFlow, ProposalInput, ProposalOutput};
pub use search_alternatives::{
    SearchAlternativesFlow, SearchAlternativesInput, SearchAlternativesOutput, SearchType,
    suggest_search_alternatives,
};
pub use skill_matching::{
    FreelancerMatch, FreelancerSummary, SkillMatchingFlow, SkillMatchingInput,
    SkillMatchingOutput, match_freelancers,
};
pub use translation::{TranslationFlow, TranslationInput, TranslationOutput};
