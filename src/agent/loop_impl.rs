//! Agent loop - core message processing
//!
//! One inbound message becomes one reply string. In between, the model may
//! call tools over several iterations; every step except the reflection nudge
//! is mirrored into the caller's session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{InboundHandler, InboundMessage, MessageBus, OutboundMessage, Subscription};
use crate::config::Config;
use crate::error::Error;
use crate::memory::MemoryLoader;
use crate::session::{Session, SessionManager, SessionMessage};
use crate::skills::SkillsLoader;
use crate::tools::ToolExecutor;
use crate::Result;

use super::compaction::Compressor;
use super::context::PromptBuilder;
use super::llm::{ChatRequest, LlmClient};
use super::message::{Message, Retention, Role, ToolCallRequest};
use super::tokens::{estimate_tokens, BudgetManager};

pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Prefix of the single message that replaces an over-budget history.
pub const SUMMARY_TAG: &str = "<conversation_summary>";

const REFLECT_PROMPT: &str = "[System: Reflect on the tool results and decide your next action. \
If you have enough information to respond to the user, do so. Otherwise, use more tools.]";

const EMPTY_RESPONSE_REPLY: &str = "I didn't get a response. Please try again.";
const EMPTY_CONTENT_REPLY: &str = "I've processed your request.";
const MAX_ITERATIONS_REPLY: &str = "I've been working on this for a while. Here's what I found so far - let me know if you'd like me to continue.";
const TIMEOUT_REPLY: &str = "I'm sorry, but processing your request took too long. Please try again or simplify your request.";
const CANCELLED_REPLY: &str = "Request cancelled.";

const START_REPLY: &str = "Hello! I'm Leo, your personal AI assistant. How can I help you today?";
const NEW_REPLY: &str = "Started a new conversation. Previous context has been saved to memory.";
const HELP_REPLY: &str = "Available commands:
/start - Start a conversation
/new - Start fresh (saves memory first)
/help - Show this help
/status - Show system status

Just type normally to chat with me!";

/// The ReAct agent
pub struct Agent {
    config: Config,
    provider: Arc<dyn LlmClient>,
    sessions: Arc<dyn SessionManager>,
    tools: Option<Arc<dyn ToolExecutor>>,
    prompt: PromptBuilder,
    budget: Option<BudgetManager>,
    compressor: Option<Compressor>,
    max_iterations: usize,
    timeout: Duration,
}

/// Messages of one turn: what goes to the model, and the session they are
/// mirrored into.
struct Turn {
    session: Session,
    messages: Vec<Message>,
}

impl Turn {
    fn record(&mut self, msg: Message, retention: Retention) {
        if retention == Retention::Persisted {
            self.session.add_message(SessionMessage::from(&msg));
        }
        self.messages.push(msg);
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tool_count(&self) -> usize {
        self.tools.as_ref().map_or(0, |t| t.schemas().len())
    }

    /// Process one inbound message and produce the reply text.
    ///
    /// Operational failures (session load, provider errors, timeouts,
    /// cancellation) come back as reply text. `Err` is only returned when the
    /// agent is missing a collaborator it needs for this turn.
    pub async fn process(&self, cancel: &CancellationToken, msg: &InboundMessage) -> Result<String> {
        let started = Instant::now();
        info!(
            channel = %msg.channel,
            sender = %msg.sender_id,
            content_len = msg.content.len(),
            "Processing message"
        );

        if let Some(reply) = self.handle_command(msg).await {
            return Ok(reply);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(self.timeout, self.run_turn(msg)) => {
                res.unwrap_or(Err(Error::Timeout))
            }
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e @ Error::MissingCollaborator(_)) => {
                error!(error = %e, "Agent is misconfigured");
                return Err(e);
            }
            Err(e) if e.is_timeout() => {
                warn!(timeout = ?self.timeout, "Turn timed out");
                TIMEOUT_REPLY.to_string()
            }
            Err(Error::Cancelled) => {
                info!("Turn cancelled");
                CANCELLED_REPLY.to_string()
            }
            Err(e) => {
                error!(error = %e, "ReAct loop error");
                format!("Error processing request: {e}")
            }
        };

        info!(
            elapsed = ?started.elapsed(),
            response_len = reply.len(),
            "Message processed"
        );
        Ok(reply)
    }

    async fn run_turn(&self, msg: &InboundMessage) -> Result<String> {
        let key = msg.session_key();
        let mut session = match self.sessions.get_or_create(&key).await {
            Ok(session) => session,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to get session");
                return Ok(format!("Error: Failed to load session: {e}"));
            }
        };

        let system_prompt = self.prompt.build();
        session.add_message(SessionMessage::new(Role::User, msg.content.as_str()));

        let messages = self.build_messages(system_prompt, &session).await;
        let mut turn = Turn { session, messages };

        let reply = self.react_loop(&mut turn).await?;

        if let Err(e) = self.sessions.save(&turn.session).await {
            warn!(key = %key, error = %e, "Failed to save session");
        }
        Ok(reply)
    }

    /// System prompt plus either the full history or one summary message.
    async fn build_messages(&self, system_prompt: String, session: &Session) -> Vec<Message> {
        let history = session.history();
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(system_prompt));

        if let (Some(budget), Some(compressor)) = (&self.budget, &self.compressor) {
            let model = &self.config.model;
            let limit = budget.compute_budget(model, self.config.max_tokens);
            let total: usize = history.iter().map(|m| estimate_tokens(&m.content)).sum();

            if total > limit {
                let compressed = compressor.compress_messages(model, &history, limit).await;
                if !compressed.is_empty() {
                    info!(total, limit, messages = history.len(), "History over budget, sending summary");
                    messages.push(Message::user(format!("{SUMMARY_TAG}\n{compressed}")));
                    return messages;
                }
            }
        }

        messages.extend(history);
        messages
    }

    async fn react_loop(&self, turn: &mut Turn) -> Result<String> {
        for iteration in 0..self.max_iterations {
            debug!(iteration = iteration + 1, max = self.max_iterations, "ReAct iteration");

            let schemas = self.tools.as_ref().map(|t| t.schemas()).unwrap_or_default();
            let request = ChatRequest::new(&self.config.model, turn.messages.clone())
                .with_temperature(self.config.temperature)
                .with_max_tokens(self.config.max_tokens)
                .with_tools(schemas);

            let response = self.provider.chat(&request).await?;

            let Some(choice) = response.choices.into_iter().next() else {
                warn!("Empty response from LLM");
                return Ok(EMPTY_RESPONSE_REPLY.to_string());
            };
            let reply = choice.message;

            if reply.tool_calls().is_empty() {
                let content = if reply.content.is_empty() {
                    EMPTY_CONTENT_REPLY.to_string()
                } else {
                    reply.content
                };
                turn.record(Message::assistant(content.as_str()), Retention::Persisted);
                return Ok(content);
            }

            let tools = self
                .tools
                .clone()
                .ok_or(Error::MissingCollaborator("tool executor"))?;

            let calls = reply.tool_calls().to_vec();
            turn.record(
                Message::assistant_with_tools(reply.content, calls.clone()),
                Retention::Persisted,
            );

            for call in &calls {
                let result = self.run_tool(tools.as_ref(), call).await;
                turn.record(
                    Message::tool_result(call.id.as_str(), call.name.as_str(), result),
                    Retention::Persisted,
                );
            }

            if iteration + 1 < self.max_iterations {
                turn.record(Message::user(REFLECT_PROMPT), Retention::Ephemeral);
            }
        }

        warn!(max = self.max_iterations, "Hit max iterations");
        Ok(MAX_ITERATIONS_REPLY.to_string())
    }

    async fn run_tool(&self, tools: &dyn ToolExecutor, call: &ToolCallRequest) -> String {
        info!(tool = %call.name, args = %preview(&call.arguments, 100), "Executing tool");

        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Failed to parse tool arguments");
                return format!("Error: Invalid arguments: {e}");
            }
        };

        match tools.execute(&call.name, args).await {
            Ok(result) => {
                debug!(tool = %call.name, len = result.len(), "Tool succeeded");
                result
            }
            Err(e) => {
                error!(tool = %call.name, error = %e, "Tool execution failed");
                format!("Error executing {}: {e}", call.name)
            }
        }
    }

    /// Answer a known slash command locally. Unknown commands return `None`
    /// and go to the model like any other text.
    async fn handle_command(&self, msg: &InboundMessage) -> Option<String> {
        let command = msg.content.strip_prefix('/')?;

        match command.trim_end_matches([' ', '\n']) {
            "start" => Some(START_REPLY.to_string()),
            "help" => Some(HELP_REPLY.to_string()),
            "new" => {
                let key = msg.session_key();
                match self.sessions.delete(&key).await {
                    Ok(()) => info!(key = %key, "Session cleared"),
                    Err(e) => debug!(key = %key, error = %e, "Nothing to clear"),
                }
                Some(NEW_REPLY.to_string())
            }
            "status" => Some(format!(
                "Status:\n  Model: {}\n  Tools: {} registered\n  Memory window: {}\n  Max iterations: {}",
                self.config.model,
                self.tool_count(),
                self.config.memory_window,
                self.max_iterations,
            )),
            _ => None,
        }
    }

    /// Answer inbound messages on `topic`, publishing each reply back on the bus.
    pub fn serve(self: &Arc<Self>, bus: &MessageBus, topic: &str, cancel: CancellationToken) -> Subscription {
        bus.subscribe(
            topic,
            AgentHandler {
                agent: Arc::clone(self),
                bus: bus.clone(),
                cancel,
            },
        )
    }
}

struct AgentHandler {
    agent: Arc<Agent>,
    bus: MessageBus,
    cancel: CancellationToken,
}

#[async_trait]
impl InboundHandler for AgentHandler {
    async fn handle(&self, msg: InboundMessage) -> Result<()> {
        let reply = self.agent.process(&self.cancel, &msg).await?;
        let out = OutboundMessage::reply_to(&msg, &reply);

        if !self.bus.publish(out.clone()) {
            debug!(channel = %msg.channel, "Outbound queue full, waiting");
            self.bus.publish_blocking(&self.cancel, out).await?;
        }
        Ok(())
    }
}

/// Builds an [`Agent`]. Config, provider and session manager are required.
#[derive(Default)]
pub struct AgentBuilder {
    config: Option<Config>,
    provider: Option<Arc<dyn LlmClient>>,
    sessions: Option<Arc<dyn SessionManager>>,
    tools: Option<Arc<dyn ToolExecutor>>,
    memory: Option<Arc<dyn MemoryLoader>>,
    skills: Option<Arc<dyn SkillsLoader>>,
    budget: Option<BudgetManager>,
    compressor: Option<Compressor>,
    max_iterations: Option<usize>,
    timeout: Option<Duration>,
}

impl AgentBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LlmClient>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryLoader>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn skills(mut self, skills: Arc<dyn SkillsLoader>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn budget_manager(mut self, budget: BudgetManager) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Overrides `config.max_iterations`. Zero keeps the configured value.
    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Overrides `config.timeout_secs`. Zero keeps the configured value.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let config = self.config.ok_or(Error::MissingCollaborator("config"))?;
        let provider = self.provider.ok_or(Error::MissingCollaborator("LLM provider"))?;
        let sessions = self.sessions.ok_or(Error::MissingCollaborator("session manager"))?;

        let max_iterations = [self.max_iterations.unwrap_or(0), config.max_iterations]
            .into_iter()
            .find(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_ITERATIONS);

        let timeout = [
            self.timeout.unwrap_or(Duration::ZERO),
            Duration::from_secs(config.timeout_secs),
        ]
        .into_iter()
        .find(|t| !t.is_zero())
        .unwrap_or(DEFAULT_TIMEOUT);

        let mut prompt = PromptBuilder::new(config.workspace.clone());
        if let Some(memory) = self.memory {
            prompt = prompt.with_memory(memory);
        }
        if let Some(skills) = self.skills {
            prompt = prompt.with_skills(skills);
        }

        Ok(Agent {
            config,
            provider,
            sessions,
            tools: self.tools,
            prompt,
            budget: self.budget,
            compressor: self.compressor,
            max_iterations,
            timeout,
        })
    }
}

fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::fake::{FakeLlmClient, Step};
    use crate::agent::llm::ChatResponse;
    use crate::bus::topics;
    use crate::session::InMemorySessionManager;
    use crate::tools::ToolDefinition;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Echoes its arguments; the tool named "fail" always errors.
    #[derive(Default)]
    struct CountingTools {
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    #[async_trait]
    impl ToolExecutor for CountingTools {
        async fn execute(&self, name: &str, args: Map<String, Value>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((name.to_string(), args.clone()));
            if name == "fail" {
                return Err(Error::Tool("disk on fire".into()));
            }
            Ok(format!("{name} ok: {}", Value::Object(args)))
        }

        fn schemas(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "read_file".into(),
                description: "Read a file".into(),
                parameters: json!({"type": "object"}),
            }]
        }
    }

    struct FailingSessions;

    #[async_trait]
    impl SessionManager for FailingSessions {
        async fn get_or_create(&self, _key: &str) -> Result<Session> {
            Err(Error::Session("disk unreadable".into()))
        }
        async fn save(&self, _session: &Session) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ChatResponse::text("too late"))
        }
        fn name(&self) -> &str {
            "slow"
        }
    }

    struct Harness {
        _dir: TempDir,
        agent: Agent,
        llm: Arc<FakeLlmClient>,
        sessions: Arc<InMemorySessionManager>,
        tools: Arc<CountingTools>,
    }

    fn config(dir: &TempDir) -> Config {
        Config {
            workspace: dir.path().to_path_buf(),
            sessions_dir: dir.path().join("sessions"),
            ..Config::default()
        }
    }

    fn harness_with(llm: FakeLlmClient, tweak: impl FnOnce(AgentBuilder) -> AgentBuilder) -> Harness {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(llm);
        let sessions = Arc::new(InMemorySessionManager::new());
        let tools = Arc::new(CountingTools::default());

        let builder = Agent::builder()
            .config(config(&dir))
            .provider(llm.clone())
            .sessions(sessions.clone())
            .tools(tools.clone());
        let agent = tweak(builder).build().unwrap();

        Harness { _dir: dir, agent, llm, sessions, tools }
    }

    fn harness(llm: FakeLlmClient) -> Harness {
        harness_with(llm, |b| b)
    }

    fn user(content: &str) -> InboundMessage {
        InboundMessage::new("cli", "tester", content)
    }

    async fn ask(h: &Harness, content: &str) -> String {
        h.agent.process(&CancellationToken::new(), &user(content)).await.unwrap()
    }

    #[tokio::test]
    async fn test_help_is_answered_locally() {
        let h = harness(FakeLlmClient::new(vec![]));
        let reply = ask(&h, "/help").await;
        assert!(reply.starts_with("Available commands:"));
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_status_and_start() {
        let h = harness_with(FakeLlmClient::new(vec![]), |b| b.max_iterations(7));

        let status = ask(&h, "/status\n").await;
        assert!(status.contains("Model: z-ai/glm-4.5-air:free"));
        assert!(status.contains("Tools: 1 registered"));
        assert!(status.contains("Memory window: 50"));
        assert!(status.contains("Max iterations: 7"));

        assert!(ask(&h, "/start").await.starts_with("Hello! I'm Leo"));
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command_goes_to_model() {
        let h = harness(FakeLlmClient::new(vec!["no such command, but hi"]));
        assert_eq!(ask(&h, "/dance").await, "no such command, but hi");
        assert_eq!(h.llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_new_clears_session() {
        let h = harness(FakeLlmClient::new(vec!["first answer"]));
        ask(&h, "remember this").await;
        assert!(h.sessions.get("cli:tester").await.is_some());

        let reply = ask(&h, "/new").await;
        assert!(reply.starts_with("Started a new conversation"));
        assert!(h.sessions.get("cli:tester").await.is_none());

        // nothing stored is fine too
        assert!(ask(&h, "/new").await.starts_with("Started a new conversation"));
    }

    #[tokio::test]
    async fn test_plain_reply_is_persisted() {
        let h = harness(FakeLlmClient::new(vec!["Hello, human!"]));
        assert_eq!(ask(&h, "Hi there").await, "Hello, human!");

        let session = h.sessions.get("cli:tester").await.unwrap();
        let roles: Vec<_> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);

        let request = &h.llm.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "Hi there");
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.max_tokens, 8192);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let h = harness(FakeLlmClient::with_tool_call(
            "read_file",
            r#"{"path": "test.txt"}"#,
            "The file contains: test content",
        ));

        let reply = ask(&h, "Read test.txt").await;
        assert_eq!(reply, "The file contains: test content");
        assert_eq!(h.tools.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.tools.seen.lock().unwrap()[0].1["path"], "test.txt");

        let session = h.sessions.get("cli:tester").await.unwrap();
        let roles: Vec<_> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(session.messages[1].tool_calls[0].id, "tc_1");
        assert_eq!(session.messages[2].tool_call_id.as_deref(), Some("tc_1"));
        assert!(session.messages.iter().all(|m| m.content != REFLECT_PROMPT));

        // second call sees the tool result followed by the reflection nudge
        let second = &h.llm.requests()[1];
        let n = second.messages.len();
        assert_eq!(second.messages[n - 2].role, Role::Tool);
        assert_eq!(second.messages[n - 2].tool_call_id.as_deref(), Some("tc_1"));
        assert_eq!(second.messages[n - 1].content, REFLECT_PROMPT);
    }

    #[tokio::test]
    async fn test_max_iterations() {
        let looping = ChatResponse::with_tool_calls(
            "",
            vec![ToolCallRequest::new("c", "read_file", "{}")],
        );
        let h = harness_with(FakeLlmClient::always(looping), |b| b.max_iterations(2));

        assert_eq!(ask(&h, "loop forever").await, MAX_ITERATIONS_REPLY);
        assert_eq!(h.llm.calls(), 2);

        // one nudge after the first round, none after the last
        let last = h.llm.requests().pop().unwrap();
        let nudges = last.messages.iter().filter(|m| m.content == REFLECT_PROMPT).count();
        assert_eq!(nudges, 1);

        let session = h.sessions.get("cli:tester").await.unwrap();
        assert_eq!(session.len(), 5);
    }

    #[tokio::test]
    async fn test_over_budget_history_is_summarized() {
        let h = harness_with(FakeLlmClient::new(vec!["ok"]), |b| {
            b.budget_manager(BudgetManager::new(100)).compressor(Compressor::new())
        });

        let mut session = Session::new("cli:tester");
        for i in 0..10 {
            session.add_message(SessionMessage::new(Role::User, format!("{i}{}", "x".repeat(2000))));
        }
        h.sessions.save(&session).await.unwrap();

        // default max_tokens leaves the 256 token floor for this model
        ask(&h, "and now?").await;

        let request = &h.llm.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].role, Role::User);
        assert!(request.messages[1].content.starts_with(SUMMARY_TAG));
        assert!(request.messages[1].content.ends_with("and now?"));

        // the session itself keeps everything
        assert_eq!(h.sessions.get("cli:tester").await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_small_model_budget_scenario() {
        let h = harness_with(FakeLlmClient::new(vec!["ok"]), |b| {
            let mut config = Config::default();
            config.model = "small-model".to_string();
            config.max_tokens = 100;
            config.workspace = std::env::temp_dir();
            b.config(config)
                .budget_manager(BudgetManager::new(100))
                .compressor(Compressor::new())
        });

        // 3896 token budget; 4000 chars per message is 1000 tokens
        let mut session = Session::new("cli:tester");
        for _ in 0..4 {
            session.add_message(SessionMessage::new(Role::Assistant, "y".repeat(4000)));
        }
        h.sessions.save(&session).await.unwrap();

        ask(&h, "hi").await;
        let request = &h.llm.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[1].content.starts_with("<conversation_summary>\n"));
    }

    #[tokio::test]
    async fn test_under_budget_sends_full_history() {
        let h = harness_with(FakeLlmClient::new(vec!["a", "b"]), |b| {
            b.budget_manager(BudgetManager::default()).compressor(Compressor::new())
        });

        ask(&h, "one").await;
        ask(&h, "two").await;

        let request = &h.llm.requests()[1];
        let contents: Vec<_> = request.messages[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "a", "two"]);
    }

    #[tokio::test]
    async fn test_empty_choices_and_empty_content() {
        let h = harness(FakeLlmClient::always(ChatResponse::default()));
        assert_eq!(ask(&h, "hello?").await, EMPTY_RESPONSE_REPLY);

        let h = harness(FakeLlmClient::new(vec![""]));
        assert_eq!(ask(&h, "hello?").await, EMPTY_CONTENT_REPLY);
        let session = h.sessions.get("cli:tester").await.unwrap();
        assert_eq!(session.messages[1].content, EMPTY_CONTENT_REPLY);
    }

    #[tokio::test]
    async fn test_provider_errors_become_text() {
        let h = harness(FakeLlmClient::scripted(vec![Step::Fail(|| Error::Llm("down".into()))]));
        assert_eq!(ask(&h, "hi").await, "Error processing request: LLM error: down");

        let h = harness(FakeLlmClient::scripted(vec![Step::Fail(|| Error::Timeout)]));
        assert_eq!(ask(&h, "hi").await, TIMEOUT_REPLY);
    }

    #[tokio::test]
    async fn test_turn_timeout() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::builder()
            .config(config(&dir))
            .provider(Arc::new(SlowLlm))
            .sessions(Arc::new(InMemorySessionManager::new()))
            .timeout(Duration::from_millis(20))
            .build()
            .unwrap();

        let reply = agent.process(&CancellationToken::new(), &user("hi")).await.unwrap();
        assert_eq!(reply, TIMEOUT_REPLY);
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let h = harness(FakeLlmClient::new(vec!["never sent"]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reply = h.agent.process(&cancel, &user("hi")).await.unwrap();
        assert_eq!(reply, CANCELLED_REPLY);
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_session_load_failure() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(FakeLlmClient::new(vec!["unused"]));
        let agent = Agent::builder()
            .config(config(&dir))
            .provider(llm.clone())
            .sessions(Arc::new(FailingSessions))
            .build()
            .unwrap();

        let reply = agent.process(&CancellationToken::new(), &user("hi")).await.unwrap();
        assert_eq!(reply, "Error: Failed to load session: Session error: disk unreadable");
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_arguments_and_tool_errors_are_fed_back() {
        let h = harness(FakeLlmClient::scripted(vec![
            Step::Reply(ChatResponse::with_tool_calls(
                "",
                vec![
                    ToolCallRequest::new("a", "read_file", "{not json"),
                    ToolCallRequest::new("b", "fail", "{}"),
                ],
            )),
            Step::Reply(ChatResponse::text("sorry about that")),
        ]));

        assert_eq!(ask(&h, "try").await, "sorry about that");
        assert_eq!(h.tools.calls.load(Ordering::SeqCst), 1);

        let session = h.sessions.get("cli:tester").await.unwrap();
        assert!(session.messages[2].content.starts_with("Error: Invalid arguments:"));
        assert_eq!(
            session.messages[3].content,
            "Error executing fail: Tool error: disk on fire"
        );
    }

    #[tokio::test]
    async fn test_tool_call_without_executor_is_an_error() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::builder()
            .config(config(&dir))
            .provider(Arc::new(FakeLlmClient::with_tool_call("read_file", "{}", "done")))
            .sessions(Arc::new(InMemorySessionManager::new()))
            .build()
            .unwrap();

        let err = agent.process(&CancellationToken::new(), &user("hi")).await.unwrap_err();
        assert!(matches!(err, Error::MissingCollaborator("tool executor")));
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = Agent::builder().config(Config::default()).build().err().unwrap();
        assert!(matches!(err, Error::MissingCollaborator("LLM provider")));

        let err = Agent::builder()
            .config(Config::default())
            .provider(Arc::new(FakeLlmClient::new(vec![])))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingCollaborator("session manager")));
    }

    #[test]
    fn test_builder_defaults() {
        let mut config = Config::default();
        config.max_iterations = 0;
        config.timeout_secs = 0;

        let agent = Agent::builder()
            .config(config)
            .provider(Arc::new(FakeLlmClient::new(vec![])))
            .sessions(Arc::new(InMemorySessionManager::new()))
            .build()
            .unwrap();
        assert_eq!(agent.max_iterations(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(agent.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(agent.tool_count(), 0);
    }

    #[tokio::test]
    async fn test_serve_replies_over_bus() {
        let h = harness(FakeLlmClient::new(vec!["pong"]));
        let agent = Arc::new(h.agent);
        let bus = MessageBus::new(8);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        agent.serve(&bus, topics::CLI, CancellationToken::new());
        bus.subscribe_outbound(topics::CLI, move |msg: OutboundMessage| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
                Ok::<(), Error>(())
            }
        });

        bus.start().await;
        assert!(bus.send(user("ping").with_metadata("chat_id", 42)));

        let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "pong");
        assert_eq!(reply.channel, "cli");
        assert_eq!(reply.channel_id, "42");

        bus.stop().await;
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 2), "éé...");
    }
}
