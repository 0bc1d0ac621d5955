use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::EnvFilter;

use deliberate::config::{CoordinationMode, PipelineConfig};
use deliberate::llm::ChatClient;
use deliberate::memory::MemoryStore;
use deliberate::pipeline::{FeedbackOutcome, Orchestrator, Session};
use deliberate::profile::{build_profiles, default_records, load_records};

#[derive(Debug, Parser)]
#[command(
    name = "deliberate",
    version,
    about = "Ask several agents, let them check and critique each other, get one answer"
)]
struct Cli {
    /// Pipeline config (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Agent profiles (JSON or YAML)
    #[arg(long, global = true)]
    profiles: Option<PathBuf>,

    /// standard | coordinated
    #[arg(long, global = true)]
    mode: Option<CoordinationMode>,

    /// Model id or alias (o1, 4o, mini)
    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run the pipeline for a prompt, or interactively from stdin")]
    Run { prompt: Option<String> },
    #[command(about = "Chat with a single agent")]
    Chat {
        #[arg(long)]
        agent: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = load_config(&cli)?;
    let (mut orchestrator, model) = build_orchestrator(&config)?;
    info!(
        model = %model,
        mode = %orchestrator.mode(),
        agents = orchestrator.agents().len(),
        "ready"
    );

    let mut input = Input::new();
    match cli.command {
        Command::Run { prompt: Some(prompt) } => {
            run_prompt(&mut orchestrator, &mut input, &prompt).await
        }
        Command::Run { prompt: None } => run_loop(&mut orchestrator, &mut input).await,
        Command::Chat { agent } => chat_loop(&mut orchestrator, &mut input, agent).await,
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(ref path) = cli.profiles {
        config.profiles_path = Some(path.clone());
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(ref model) = cli.model {
        config.model = model.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// The orchestrator plus the resolved model id it will call.
fn build_orchestrator(config: &PipelineConfig) -> Result<(Orchestrator, String)> {
    let records = match &config.profiles_path {
        Some(path) => load_records(path)
            .with_context(|| format!("loading profiles {}", path.display()))?,
        None => default_records(),
    };
    let profiles = build_profiles(&records).context("building agent profiles")?;

    let client = ChatClient::from_env(&config.model, config.api_base_url.as_deref())
        .context("creating completion client")?;

    let memory = match &config.memory_dir {
        Some(dir) => MemoryStore::open_log(dir, config.mode.memory_log(), config.min_keyword_overlap)
            .with_context(|| format!("opening memory in {}", dir.display()))?,
        None => MemoryStore::in_memory(config.min_keyword_overlap),
    };

    let model = client.default_model().to_string();
    Ok((
        Orchestrator::new(config, profiles, Arc::new(client), memory),
        model,
    ))
}

async fn run_loop(orchestrator: &mut Orchestrator, input: &mut Input) -> Result<()> {
    let mut history: Vec<String> = Vec::new();
    loop {
        let Some(line) = input.ask("\nPrompt (exit, history, clear): ").await? else {
            break;
        };
        match line.as_str() {
            "" => continue,
            "exit" | "quit" => break,
            "history" => {
                if history.is_empty() {
                    println!("No prompts yet.");
                }
                for (i, prompt) in history.iter().enumerate() {
                    println!("{}. {prompt}", i + 1);
                }
            }
            "clear" => {
                orchestrator.reset_conversations();
                history.clear();
                println!("Conversation context cleared.");
            }
            prompt => {
                run_prompt(orchestrator, input, prompt).await?;
                history.push(prompt.to_string());
                if !input.confirm("Retain context for the next prompt? [Y/n] ", true).await? {
                    orchestrator.reset_conversations();
                }
            }
        }
    }
    Ok(())
}

async fn run_prompt(orchestrator: &mut Orchestrator, input: &mut Input, prompt: &str) -> Result<()> {
    let mut session = orchestrator.run(prompt).await;
    if !print_outcome(&session) {
        return Ok(());
    }

    while !input.confirm("Are you satisfied with this answer? [Y/n] ", true).await? {
        let Some(feedback) = input.ask("What should be improved? ").await? else {
            break;
        };
        let more_time = input.confirm("Take more time on it? [y/N] ", false).await?;
        match orchestrator
            .submit_feedback(&mut session, &feedback, more_time)
            .await?
        {
            FeedbackOutcome::Refined => {
                print_outcome(&session);
            }
            FeedbackOutcome::Rejected => {
                println!("Refinement limit reached; keeping the last answer.");
                break;
            }
            FeedbackOutcome::Failed => {
                print_outcome(&session);
                break;
            }
        }
    }
    Ok(())
}

/// Print the blended answer or the failure. Returns whether the session is done.
fn print_outcome(session: &Session) -> bool {
    if let Some(ref failure) = session.failure {
        eprintln!("\n{failure}");
        return false;
    }
    for exclusion in &session.excluded {
        eprintln!(
            "note: {} dropped during {} ({})",
            exclusion.agent, exclusion.stage, exclusion.reason
        );
    }
    println!("\n{}\n", session.blended.as_deref().unwrap_or_default());
    let usage = &session.usage;
    println!(
        "[tokens: {} prompt ({} cached), {} completion ({} reasoning)]",
        usage.prompt_tokens, usage.cached_tokens, usage.completion_tokens, usage.reasoning_tokens
    );
    for (stage, timing) in &session.timings {
        let agents: Vec<String> = timing
            .agents
            .iter()
            .map(|(name, ms)| format!("{name} {}", seconds(*ms)))
            .collect();
        if agents.is_empty() {
            println!("[{stage}: {}]", seconds(timing.total_ms));
        } else {
            println!("[{stage}: {} ({})]", seconds(timing.total_ms), agents.join(", "));
        }
    }
    true
}

fn seconds(ms: u64) -> String {
    format!("{:.2}s", ms as f64 / 1000.0)
}

async fn chat_loop(
    orchestrator: &mut Orchestrator,
    input: &mut Input,
    agent: Option<String>,
) -> Result<()> {
    let name = match agent {
        Some(name) => name,
        None => orchestrator
            .agents()
            .first()
            .map(|a| a.name().to_string())
            .context("no agents configured")?,
    };
    if orchestrator.agent(&name).is_none() {
        anyhow::bail!("unknown agent: '{name}'");
    }

    println!("Chatting with {name}. Type 'exit' to stop.");
    loop {
        let Some(line) = input.ask("\nYou: ").await? else {
            break;
        };
        match line.as_str() {
            "" => continue,
            "exit" | "quit" => break,
            message => match orchestrator.chat(&name, message).await {
                Ok(reply) => println!("\n{name}: {}", reply.text),
                Err(e) => eprintln!("error: {e}"),
            },
        }
    }
    Ok(())
}

/// Line-oriented stdin reader.
struct Input {
    lines: Lines<BufReader<Stdin>>,
}

impl Input {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Show `prompt` and read one trimmed line. `None` on end of input.
    async fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        let mut out = tokio::io::stdout();
        out.write_all(prompt.as_bytes()).await?;
        out.flush().await?;
        let line = self.lines.next_line().await.context("reading stdin")?;
        Ok(line.map(|l| l.trim().to_string()))
    }

    async fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        Ok(match self.ask(prompt).await?.as_deref() {
            None | Some("") => default,
            Some(answer) => matches!(answer.to_lowercase().as_str(), "y" | "yes"),
        })
    }
}
