//! Pipeline orchestrator: drives every agent through
//! discuss → verify → critique → refine, then blends.
//!
//! ## Stage discipline
//!
//! - Per-agent calls inside a stage run concurrently, bounded by a
//!   semaphore; the stage ends only when every call has returned.
//! - Results are filed by agent name, never by arrival order.
//! - An agent whose call fails is dropped for the rest of the session.
//!   Zero survivors, or a failed blend, moves the session to `Failed`.
//! - Critique text is copied into the critic's own conversation; no agent
//!   ever touches another agent's state.

pub mod blend;
pub mod pairing;
pub mod session;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::agent::{prompts, Agent};
use crate::budget::TokenBudget;
use crate::config::{CoordinationMode, PipelineConfig};
use crate::gateway::{CompletionGateway, GatewayError};
use crate::llm::{Completion, CompletionService};
use crate::memory::{MemoryError, MemoryStore};
use crate::profile::AgentProfile;

pub use blend::{BlendError, Blender, Contribution};
pub use pairing::critique_pairs;
pub use session::{Exclusion, Session, SessionFailure, Stage, StageTiming};

/// Errors a caller can trigger. Stage failures are reported on the
/// `Session` instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unknown agent: '{0}'")]
    UnknownAgent(String),

    #[error("session is {0}; feedback needs a DONE session")]
    NotAwaitingFeedback(Stage),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("failed to write session {path}: {source}")]
    SessionWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode session: {0}")]
    SessionEncode(#[from] serde_json::Error),
}

/// What a feedback submission did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// Agents refined again and a new blended answer is on the session.
    Refined,
    /// Refinement cap reached; the session is untouched.
    Rejected,
    /// The extra round failed; see `Session::failure`.
    Failed,
}

/// One per-agent call within a stage.
struct Job {
    agent: String,
    prompt: String,
    /// Whose session entry receives the output (differs for critiques).
    deliver_to: String,
}

impl Job {
    fn own(agent: &str, prompt: String) -> Self {
        Self {
            agent: agent.to_string(),
            prompt,
            deliver_to: agent.to_string(),
        }
    }
}

pub struct Orchestrator {
    agents: Vec<Agent>,
    budget: TokenBudget,
    gateway: CompletionGateway,
    blender: Blender,
    memory: MemoryStore,
    mode: CoordinationMode,
    max_concurrency: usize,
    max_memory_records: usize,
    max_refinement_attempts: u32,
    session_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        config: &PipelineConfig,
        profiles: Vec<AgentProfile>,
        service: Arc<dyn CompletionService>,
        memory: MemoryStore,
    ) -> Self {
        let gateway = CompletionGateway::new(
            service,
            config.retry_policy(),
            config.call_timeout(),
            config.model_params(),
        );
        Self {
            agents: profiles
                .into_iter()
                .map(|p| Agent::new(Arc::new(p)))
                .collect(),
            budget: config.budget(),
            gateway,
            blender: Blender::new(config.mode),
            memory,
            mode: config.mode,
            max_concurrency: config.max_concurrency,
            max_memory_records: config.max_memory_records,
            max_refinement_attempts: config.max_refinement_attempts,
            session_dir: config.session_dir.clone(),
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name() == name)
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn mode(&self) -> CoordinationMode {
        self.mode
    }

    /// Drop every agent's conversation back to its persona turn.
    pub fn reset_conversations(&mut self) {
        for agent in &mut self.agents {
            agent.reset();
        }
        info!("agent conversations reset");
    }

    /// A single turn with one agent, outside the pipeline.
    pub async fn chat(&mut self, name: &str, message: &str) -> Result<Completion, PipelineError> {
        let agent = self
            .agents
            .iter_mut()
            .find(|a| a.name() == name)
            .ok_or_else(|| PipelineError::UnknownAgent(name.to_string()))?;
        Ok(agent
            .turn(&self.budget, &self.gateway, message.to_string())
            .await?)
    }

    /// Run one prompt through every stage. Always returns the session;
    /// check `Session::stage` for `Done` or `Failed`.
    pub async fn run(&mut self, prompt: &str) -> Session {
        let roster = self.agents.iter().map(|a| a.name().to_string()).collect();
        let mut session = Session::new(prompt, self.mode, roster);
        session.memory_context = self.memory.retrieve(prompt, self.max_memory_records);
        if !session.memory_context.is_empty() {
            debug!(session = %session.id, "injecting memory context");
        }
        session.complete(Stage::Init);
        info!(session = %session.id, agents = session.active.len(), mode = %self.mode, "session started");

        // Discussion
        let jobs = session
            .active
            .iter()
            .map(|name| {
                Job::own(
                    name,
                    prompts::discussion(&self.budget, &session.memory_context, prompt),
                )
            })
            .collect();
        if !self.run_stage(&mut session, Stage::Discussing, jobs).await {
            return self.finish_failed(session);
        }

        // Verification
        let jobs = session
            .active
            .iter()
            .map(|name| {
                let initial = session.initial.get(name).map(String::as_str).unwrap_or_default();
                Job::own(name, prompts::verification(&self.budget, initial))
            })
            .collect();
        if !self.run_stage(&mut session, Stage::Verifying, jobs).await {
            return self.finish_failed(session);
        }

        // Critique
        if !self.critique(&mut session).await {
            return self.finish_failed(session);
        }

        // Refinement
        let names_partners = self.mode.names_partners();
        let jobs = session
            .active
            .iter()
            .map(|name| {
                let verified = session.verified.get(name).map(String::as_str).unwrap_or_default();
                // A lone agent's "critique" is its own verified answer; it
                // refines alone rather than against itself.
                let critique = session
                    .critique_received
                    .get(name)
                    .filter(|_| session.critic_of.contains_key(name))
                    .map(String::as_str);
                let critic = session
                    .critic_of
                    .get(name)
                    .map(String::as_str)
                    .filter(|_| names_partners);
                Job::own(
                    name,
                    prompts::refinement(&self.budget, verified, critique, critic),
                )
            })
            .collect();
        if !self.run_stage(&mut session, Stage::Refining, jobs).await {
            return self.finish_failed(session);
        }

        if !self.blend(&mut session).await {
            return self.finish_failed(session);
        }
        self.finish_done(&mut session);
        session
    }

    /// Re-enter refinement with user feedback, then blend again.
    ///
    /// After `max_refinement_attempts` rounds further feedback is rejected
    /// and the session (including its blended answer) is left as it was.
    pub async fn submit_feedback(
        &mut self,
        session: &mut Session,
        feedback: &str,
        more_time: bool,
    ) -> Result<FeedbackOutcome, PipelineError> {
        if session.stage != Stage::Done {
            return Err(PipelineError::NotAwaitingFeedback(session.stage));
        }
        if session.feedback_rounds >= self.max_refinement_attempts {
            info!(
                session = %session.id,
                rounds = session.feedback_rounds,
                "refinement attempts exhausted; keeping last answer"
            );
            return Ok(FeedbackOutcome::Rejected);
        }

        session.enter(Stage::AwaitingFeedback);
        session.feedback_rounds += 1;
        info!(session = %session.id, round = session.feedback_rounds, "refining on feedback");

        let jobs = session
            .active
            .iter()
            .map(|name| {
                let refined = session.refined.get(name).map(String::as_str).unwrap_or_default();
                Job::own(
                    name,
                    prompts::feedback(&self.budget, refined, feedback, more_time),
                )
            })
            .collect();
        let survived = self.run_stage(session, Stage::Refining, jobs).await;
        let active = &session.active;
        session.refined.retain(|name, _| active.contains(name));

        if !survived || !self.blend(session).await {
            self.persist_logged(session);
            return Ok(FeedbackOutcome::Failed);
        }
        self.finish_done(session);
        Ok(FeedbackOutcome::Refined)
    }

    /// Round-robin critique. A lone agent skips the stage and keeps its
    /// verified answer as the critique it "received".
    async fn critique(&mut self, session: &mut Session) -> bool {
        let active = session.active.clone();
        if active.len() < 2 {
            session.enter(Stage::Critiquing);
            for name in &active {
                if let Some(verified) = session.verified.get(name).cloned() {
                    session.critique_received.insert(name.clone(), verified);
                }
            }
            session.timings.insert(Stage::Critiquing, StageTiming::default());
            session.complete(Stage::Critiquing);
            info!(session = %session.id, "single agent; critique skipped");
            return true;
        }

        let names_partners = self.mode.names_partners();
        let mut jobs = Vec::with_capacity(active.len());
        for (critic, target) in critique_pairs(active.len()) {
            let (critic, target) = (&active[critic], &active[target]);
            let verified = session.verified.get(target).map(String::as_str).unwrap_or_default();
            let shown_target = names_partners.then_some(target.as_str());
            jobs.push(Job {
                agent: critic.clone(),
                prompt: prompts::critique(&self.budget, shown_target, verified),
                deliver_to: target.clone(),
            });
            session.critic_of.insert(target.clone(), critic.clone());
        }

        let survived = self.run_stage(session, Stage::Critiquing, jobs).await;
        let received = &session.critique_received;
        session
            .critic_of
            .retain(|target, _| received.contains_key(target));
        survived
    }

    /// Single synthesis call over the refined answers.
    async fn blend(&mut self, session: &mut Session) -> bool {
        session.enter(Stage::Blending);
        let contributions: Vec<Contribution> = session
            .refined_in_order()
            .into_iter()
            .map(|(agent, text)| Contribution { agent, text })
            .collect();

        let started = Instant::now();
        let result = self
            .blender
            .blend(&self.budget, &self.gateway, &session.prompt, &contributions)
            .await;
        let elapsed = started.elapsed();
        session.timings.insert(
            Stage::Blending,
            StageTiming {
                total_ms: millis(elapsed),
                agents: Default::default(),
            },
        );
        info!(session = %session.id, elapsed_ms = millis(elapsed), "blend finished");

        match result {
            Ok(completion) => {
                if let Some(usage) = completion.usage {
                    session.usage += usage;
                }
                session.blended = Some(completion.text);
                session.complete(Stage::Blending);
                true
            }
            Err(e) => {
                error!(session = %session.id, error = %e, "blend failed");
                session.fail(e.to_string());
                false
            }
        }
    }

    /// Dispatch a stage's jobs, wait for all of them, file the results.
    /// Returns false (and fails the session) when nobody survives.
    async fn run_stage(&mut self, session: &mut Session, stage: Stage, jobs: Vec<Job>) -> bool {
        session.enter(stage);
        info!(session = %session.id, stage = %stage, agents = jobs.len(), "stage started");

        let mut prompts = HashMap::with_capacity(jobs.len());
        let mut routes = HashMap::with_capacity(jobs.len());
        for job in jobs {
            routes.insert(job.agent.clone(), job.deliver_to);
            prompts.insert(job.agent, job.prompt);
        }

        let work: Vec<(&mut Agent, String)> = self
            .agents
            .iter_mut()
            .filter_map(|agent| prompts.remove(agent.name()).map(|p| (agent, p)))
            .collect();
        let started = Instant::now();
        let results = fan_out(work, self.max_concurrency, &self.budget, &self.gateway).await;
        let mut timing = StageTiming {
            total_ms: millis(started.elapsed()),
            agents: Default::default(),
        };

        for (name, elapsed, result) in results {
            timing.agents.insert(name.clone(), millis(elapsed));
            match result {
                Ok(completion) => {
                    if let Some(usage) = completion.usage {
                        session.usage += usage;
                    }
                    let key = routes.remove(&name).unwrap_or_else(|| name.clone());
                    if let Some(outputs) = session.outputs_mut(stage) {
                        outputs.insert(key, completion.text);
                    }
                }
                Err(e) => {
                    warn!(
                        session = %session.id,
                        agent = %name,
                        stage = %stage,
                        error = %e,
                        "agent produced no output; excluding it from the session"
                    );
                    session.exclude(&name, e.to_string());
                }
            }
        }

        let total_ms = timing.total_ms;
        session.timings.insert(stage, timing);

        if session.active.is_empty() {
            error!(session = %session.id, stage = %stage, "no agent produced output");
            session.fail(format!("no agent produced output during {stage}"));
            return false;
        }

        session.complete(stage);
        info!(
            session = %session.id,
            stage = %stage,
            survivors = session.active.len(),
            elapsed_ms = total_ms,
            "stage complete"
        );
        true
    }

    fn finish_done(&mut self, session: &mut Session) {
        if let Some(ref answer) = session.blended {
            if let Err(e) = self.memory.append(&session.prompt, answer) {
                warn!(session = %session.id, error = %e, "failed to record session in memory");
            }
        }
        session.enter(Stage::Done);
        self.persist_logged(session);
        info!(session = %session.id, "session done");
    }

    fn finish_failed(&self, session: Session) -> Session {
        self.persist_logged(&session);
        session
    }

    fn persist_logged(&self, session: &Session) {
        if let Err(e) = self.persist(session) {
            warn!(session = %session.id, error = %e, "failed to persist session");
        }
    }

    /// Write the session as `<session_dir>/<id>.json` when configured.
    pub fn persist(&self, session: &Session) -> Result<(), PipelineError> {
        let Some(ref dir) = self.session_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir).map_err(|source| PipelineError::SessionWrite {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{}.json", session.id));
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&path, json).map_err(|source| PipelineError::SessionWrite { path, source })
    }
}

/// Run each agent's turn concurrently, at most `max_concurrency` at a time.
/// Each result carries the time the turn took once it held a permit.
async fn fan_out(
    work: Vec<(&mut Agent, String)>,
    max_concurrency: usize,
    budget: &TokenBudget,
    gateway: &CompletionGateway,
) -> Vec<(String, Duration, Result<Completion, GatewayError>)> {
    let permits = Semaphore::new(max_concurrency.max(1));
    let permits = &permits;
    join_all(work.into_iter().map(|(agent, prompt)| async move {
        let _permit = permits.acquire().await.ok();
        let started = Instant::now();
        let result = agent.turn(budget, gateway, prompt).await;
        (agent.name().to_string(), started.elapsed(), result)
    }))
    .await
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
