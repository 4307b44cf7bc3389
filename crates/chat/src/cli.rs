use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use lucknow_llm::flows::{
    FreelancerSummary, ProfileOptimizationFlow, ProfileOptimizationInput, ProposalFlow,
    ProposalInput, SearchAlternativesInput, SearchType, SkillMatchingInput,
    match_freelancers, suggest_search_alternatives,
};
use lucknow_llm::{
    DisabledGenerator, FlowError, ProviderError, StructuredGenerator, create_generator, run_flow,
};
use lucknow_storage::{ConversationId, SqliteStorage, StorageError};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::error::{ChatError, TranslationError};
use super::events::ChannelErrorSink;
use super::profile::{ProfileDirectory, ProfileError, UserProfile, UserRole};
use super::session::{ChatSession, DisplayMessage, MessageKey, SessionEvent};
use super::settings::{ChatSettings, SettingsStore};
use super::store::{MessageStoreAdapter, SubscriptionItem};
use super::translation::TranslationService;

#[derive(Debug, Parser)]
#[command(name = "lucknow-chat", version, about = "LucknowConnect chat and AI helpers")]
pub struct Cli {
    /// Settings file (defaults to the user config directory).
    #[arg(long, global = true, env = "LUCKNOW_CONFIG")]
    pub config: Option<PathBuf>,
    /// SQLite database file or URL, overriding the settings file.
    #[arg(long, global = true)]
    pub database: Option<String>,
    /// Acting user id, overriding the settings file.
    #[arg(long = "as", global = true, value_name = "USER_ID")]
    pub acting_user: Option<String>,
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List everyone the acting user can chat with, plus their inbox.
    Contacts,
    /// Print the most recent messages with a contact.
    History {
        recipient: String,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Send one message to a contact.
    Send {
        recipient: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Open an interactive conversation.
    Chat { recipient: String },
    /// Translate a piece of text.
    Translate {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Target language; the configured one when omitted.
        #[arg(long)]
        to: Option<String>,
    },
    /// Suggest alternative queries for a search with no results.
    SuggestSearch {
        query: String,
        #[arg(long, value_enum, default_value_t = SearchKind::Job)]
        kind: SearchKind,
    },
    /// Draft a proposal and cover message for a job.
    Proposal {
        #[arg(long)]
        job: String,
        #[arg(long)]
        profile: String,
    },
    /// Rank the known freelancers against job requirements.
    MatchSkills {
        requirements: String,
        /// Restrict matching to these freelancer ids.
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<String>,
    },
    /// Tips for improving a freelancer's profile.
    OptimizeProfile {
        freelancer: String,
        #[arg(long, default_value = "")]
        portfolio: String,
        #[arg(long)]
        target_jobs: Option<String>,
        #[arg(long)]
        feedback: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchKind {
    Job,
    Freelancer,
}

impl From<SearchKind> for SearchType {
    fn from(kind: SearchKind) -> Self {
        match kind {
            SearchKind::Job => SearchType::Job,
            SearchKind::Freelancer => SearchType::Freelancer,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("failed to load profiles: {source}"))]
    LoadProfiles {
        stage: &'static str,
        source: ProfileError,
    },
    #[snafu(display("failed to open chat database '{location}': {source}"))]
    OpenStorage {
        stage: &'static str,
        location: String,
        source: StorageError,
    },
    #[snafu(display("failed to set up text generation: {source}"))]
    SetupGenerator {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("'{id}' is not a known contact"))]
    UnknownContact { stage: &'static str, id: String },
    #[snafu(display("'{id}' is not a known freelancer"))]
    UnknownFreelancer { stage: &'static str, id: String },
    #[snafu(display("invalid conversation: {source}"))]
    Conversation {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("message to '{recipient}' was not delivered"))]
    SendFailed {
        stage: &'static str,
        recipient: String,
    },
    #[snafu(display("history is unavailable: {reason}"))]
    HistoryUnavailable { stage: &'static str, reason: String },
    #[snafu(display("{source}"))]
    Chat {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("{source}"))]
    Translate {
        stage: &'static str,
        source: TranslationError,
    },
    #[snafu(display("{source}"))]
    Generate {
        stage: &'static str,
        source: FlowError,
    },
    #[snafu(display("failed to render output: {source}"))]
    RenderOutput {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to read input: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// Resolved settings, contacts and generator shared by every command.
struct Context {
    settings: ChatSettings,
    profiles: ProfileDirectory,
    generator: Arc<dyn StructuredGenerator>,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, CliError> {
        let store = match &cli.config {
            Some(path) => SettingsStore::new(path.clone()),
            None => SettingsStore::load(),
        };
        let mut settings = (*store.settings()).clone();
        if let Some(database) = &cli.database {
            settings.database = database.clone();
        }
        if let Some(user) = &cli.acting_user {
            settings.chat.local_user = user.clone();
        }
        let settings = settings.normalized();

        let profiles = match &settings.profiles_path {
            Some(path) => ProfileDirectory::from_json_file(path).context(LoadProfilesSnafu {
                stage: "load-profiles",
            })?,
            None => ProfileDirectory::fixtures(),
        };

        let generator: Arc<dyn StructuredGenerator> = match settings.provider.to_provider_config()
        {
            Some(config) => create_generator(config).context(SetupGeneratorSnafu {
                stage: "create-generator",
            })?,
            None => Arc::new(DisabledGenerator::new(
                "no API key configured, set LUCKNOW_PROVIDER__API_KEY",
            )),
        };

        Ok(Self {
            settings,
            profiles,
            generator,
        })
    }

    fn local_user(&self) -> &str {
        &self.settings.chat.local_user
    }

    fn contact(&self, id: &str) -> Result<&UserProfile, CliError> {
        self.profiles
            .contacts_for(self.local_user())
            .find(|profile| profile.id == id)
            .context(UnknownContactSnafu {
                stage: "resolve-contact",
                id,
            })
    }

    fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.profiles
            .find(id)
            .map(|profile| profile.name.as_str())
            .unwrap_or(id)
    }

    fn translator(&self) -> TranslationService {
        TranslationService::new(Arc::clone(&self.generator))
            .with_timeout(self.settings.chat.translation_timeout())
    }

    async fn open_adapter(&self, sink: &ChannelErrorSink) -> Result<MessageStoreAdapter, CliError> {
        let location = self.settings.database_location();
        let storage = SqliteStorage::open(&location)
            .await
            .context(OpenStorageSnafu {
                stage: "open-storage",
                location: location.clone(),
            })?;
        Ok(MessageStoreAdapter::new(
            Arc::new(storage),
            Arc::new(sink.clone()),
        ))
    }
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let context = Context::load(&cli)?;
    tracing::debug!(
        local_user = %context.local_user(),
        provider_id = %context.generator.id(),
        "lucknow-chat starting"
    );

    match cli.command {
        Command::Contacts => contacts(&context).await,
        Command::History { recipient, limit } => history(&context, &recipient, limit).await,
        Command::Send { recipient, text } => send(&context, &recipient, &text.join(" ")).await,
        Command::Chat { recipient } => chat(&context, &recipient).await,
        Command::Translate { text, to } => {
            let target = to.unwrap_or_else(|| context.settings.chat.target_language.clone());
            let translated = context
                .translator()
                .translate(&text.join(" "), &target)
                .await
                .context(TranslateSnafu {
                    stage: "translate-command",
                })?;
            println!("{translated}");
            Ok(())
        }
        Command::SuggestSearch { query, kind } => {
            let input = SearchAlternativesInput {
                original_query: query,
                search_type: kind.into(),
            };
            let output = suggest_search_alternatives(context.generator.as_ref(), &input)
                .await
                .context(GenerateSnafu {
                    stage: "suggest-search-command",
                })?;
            print_json(&output)
        }
        Command::Proposal { job, profile } => {
            let input = ProposalInput {
                job_description: job,
                freelancer_profile_summary: profile,
            };
            let output = run_flow::<ProposalFlow>(context.generator.as_ref(), &input)
                .await
                .context(GenerateSnafu {
                    stage: "proposal-command",
                })?;
            print_json(&output)
        }
        Command::MatchSkills {
            requirements,
            candidates,
        } => {
            let input = SkillMatchingInput {
                job_requirements: requirements,
                freelancer_profiles: freelancer_summaries(&context.profiles, &candidates)?,
            };
            let output = match_freelancers(context.generator.as_ref(), &input)
                .await
                .context(GenerateSnafu {
                    stage: "match-skills-command",
                })?;
            print_json(&output)
        }
        Command::OptimizeProfile {
            freelancer,
            portfolio,
            target_jobs,
            feedback,
        } => {
            let profile = context
                .profiles
                .find(&freelancer)
                .filter(|profile| profile.role == UserRole::Freelancer)
                .context(UnknownFreelancerSnafu {
                    stage: "optimize-profile-command",
                    id: freelancer.as_str(),
                })?;
            let input = ProfileOptimizationInput {
                current_profile_description: profile.bio.clone(),
                skills: profile.skills.clone(),
                portfolio_summary: portfolio,
                target_job_types: target_jobs,
                client_feedback_summary: feedback,
            };
            let output = run_flow::<ProfileOptimizationFlow>(context.generator.as_ref(), &input)
                .await
                .context(GenerateSnafu {
                    stage: "optimize-profile-command",
                })?;
            print_json(&output)
        }
    }
}

async fn contacts(context: &Context) -> Result<(), CliError> {
    for profile in context.profiles.contacts_for(context.local_user()) {
        println!(
            "{:<6} {:<20} {:<10} {}{}",
            profile.id,
            profile.name,
            profile.role,
            profile.location,
            if profile.verified { " (verified)" } else { "" }
        );
    }

    let sink = ChannelErrorSink::default();
    let adapter = context.open_adapter(&sink).await?;
    let inbox = adapter.conversations(context.local_user()).await;
    if !inbox.is_empty() {
        println!();
        for conversation in inbox {
            let other = conversation
                .id
                .counterpart(context.local_user())
                .unwrap_or_default();
            println!(
                "{:<20} {}",
                context.display_name(other),
                conversation.last_message.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

async fn history(context: &Context, recipient: &str, limit: u32) -> Result<(), CliError> {
    context.contact(recipient)?;
    let conversation_id = ConversationId::from_participants(context.local_user(), recipient)
        .context(ConversationSnafu {
            stage: "history-conversation-id",
        })?;
    let sink = ChannelErrorSink::default();
    let adapter = context.open_adapter(&sink).await?;

    let mut subscription = adapter.subscribe(context.local_user(), conversation_id, limit);
    match subscription.next().await {
        Some(SubscriptionItem::Snapshot(snapshot)) => {
            for message in snapshot.messages {
                println!(
                    "{}: {}{}",
                    context.display_name(&message.sender_id),
                    message.text,
                    message
                        .translated_text
                        .map(|translated| format!("  [{translated}]"))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        Some(SubscriptionItem::Failed { reason, .. }) => HistoryUnavailableSnafu {
            stage: "history-snapshot",
            reason,
        }
        .fail(),
        None => HistoryUnavailableSnafu {
            stage: "history-snapshot",
            reason: "subscription closed",
        }
        .fail(),
    }
}

async fn send(context: &Context, recipient: &str, text: &str) -> Result<(), CliError> {
    context.contact(recipient)?;
    let conversation_id = ConversationId::from_participants(context.local_user(), recipient)
        .context(ConversationSnafu {
            stage: "send-conversation-id",
        })?;
    let sink = ChannelErrorSink::default();
    let adapter = context.open_adapter(&sink).await?;

    let message_id = adapter
        .append(&conversation_id, context.local_user(), text)
        .await
        .context(SendFailedSnafu {
            stage: "send-append",
            recipient,
        })?;
    println!("sent {message_id}");
    Ok(())
}

async fn chat(context: &Context, recipient: &str) -> Result<(), CliError> {
    let contact = context.contact(recipient)?;
    let sink = ChannelErrorSink::default();
    let adapter = context.open_adapter(&sink).await?;
    let mut session = ChatSession::new(
        context.settings.chat.session_config(),
        adapter,
        context.translator(),
    );
    session
        .select_recipient(&contact.id)
        .context(ChatSnafu {
            stage: "chat-select-recipient",
        })?;

    let mut errors = sink.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = errors.recv().await {
            eprintln!("! {event}");
        }
    });

    println!(
        "chatting with {} ({}). /t <n> translates message n, /to <language> changes the target, /quit leaves.",
        contact.name, contact.role
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.context(ReadInputSnafu { stage: "chat-read-line" })?;
                let Some(line) = line else { break };
                if !handle_line(&mut session, line.trim()) {
                    break;
                }
            }
            Some(event) = session.next_event() => {
                match event {
                    SessionEvent::Snapshot { .. } => print_conversation(context, &session.messages()),
                    SessionEvent::SubscriptionEnded { reason } => {
                        eprintln!("! conversation closed: {reason}");
                    }
                    SessionEvent::SendFailed { text } => eprintln!("! not delivered: {text}"),
                    SessionEvent::TranslationFailed { reason, .. } => eprintln!("! {reason}"),
                    SessionEvent::TranslationReady { .. } => {
                        print_conversation(context, &session.messages());
                    }
                    SessionEvent::MessageSent { .. } => {}
                }
            }
        }
    }

    session.clear_recipient();
    Ok(())
}

/// Applies one line of chat input. Returns false when the user asked to leave.
fn handle_line(session: &mut ChatSession, line: &str) -> bool {
    if line == "/quit" {
        return false;
    }
    if let Some(language) = line.strip_prefix("/to ") {
        session.set_target_language(language.trim());
        println!("translating into {}", session.target_language());
        return true;
    }
    if let Some(index) = line.strip_prefix("/t ") {
        let target = index
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|index| session.messages().get(index.checked_sub(1)?).cloned());
        match target.map(|message| message.key) {
            Some(MessageKey::Confirmed(message_id)) => {
                if let Err(error) = session.request_translation(message_id) {
                    eprintln!("! {error}");
                }
            }
            _ => eprintln!("! no such message"),
        }
        return true;
    }

    session.set_draft(line);
    match session.submit() {
        Ok(_) | Err(ChatError::EmptyMessage { .. }) => {}
        Err(error) => eprintln!("! {error}"),
    }
    true
}

fn print_conversation(context: &Context, messages: &[DisplayMessage]) {
    println!("----");
    for (index, message) in messages.iter().enumerate() {
        let marker = if message.is_pending() { "…" } else { " " };
        println!(
            "{:>3}{marker} {}: {}",
            index + 1,
            context.display_name(&message.sender_id),
            message.text
        );
        if let Some(translated) = &message.translated_text {
            println!("      [{translated}]");
        }
    }
}

fn freelancer_summaries(
    profiles: &ProfileDirectory,
    candidates: &[String],
) -> Result<Vec<FreelancerSummary>, CliError> {
    if !candidates.is_empty() {
        return candidates
            .iter()
            .map(|id| {
                profiles
                    .find(id)
                    .filter(|profile| profile.role == UserRole::Freelancer)
                    .map(freelancer_summary)
                    .context(UnknownFreelancerSnafu {
                        stage: "match-skills-candidates",
                        id: id.as_str(),
                    })
            })
            .collect();
    }

    Ok(profiles
        .all()
        .iter()
        .filter(|profile| profile.role == UserRole::Freelancer)
        .map(freelancer_summary)
        .collect())
}

fn freelancer_summary(profile: &UserProfile) -> FreelancerSummary {
    FreelancerSummary {
        id: profile.id.clone(),
        skills: profile.skills.clone(),
        bio: profile.bio.clone(),
        location: profile.location.clone(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).context(RenderOutputSnafu {
        stage: "render-json-output",
    })?;
    println!("{rendered}");
    Ok(())
}
