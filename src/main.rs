//! Leo CLI entry point

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use leo_relay::adapters::{Channel, CliChannel};
use leo_relay::agent::{Agent, BudgetManager, Compressor, LlmClient, ProviderRegistry};
use leo_relay::bus::{topics, InboundMessage, MessageBus, OutboundMessage};
use leo_relay::config::{self, Config};
use leo_relay::heartbeat::Heartbeat;
use leo_relay::memory::FileMemoryStore;
use leo_relay::session::FileSessionManager;
use leo_relay::skills::SkillRegistry;
use leo_relay::tools::{RememberTool, ToolRunner};
use leo_relay::ui;

#[derive(Parser)]
#[command(name = "leo")]
#[command(about = "🦁 Leo - personal AI assistant")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Agent {
        /// Message to send to the agent
        #[arg(short, long)]
        message: Option<String>,

        /// Sender ID; the session key is `cli:<sender>`
        #[arg(short, long, default_value = "default")]
        sender: String,
    },

    /// Show Leo status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("leo_relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // First Ctrl+C cancels in-flight work, the second one exits.
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            println!("\n👋 Bye!");
            std::process::exit(130);
        }
        println!("\n⚠️  Cancelling, press Ctrl+C again to exit");
        token.cancel();
    })
    .ok();

    let cli = Cli::parse();
    let config = config::load()?;

    match cli.command {
        Commands::Agent { message, sender } => {
            let agent = build_agent(&config)?;

            if let Some(msg) = message {
                let inbound = InboundMessage::new(topics::CLI, &sender, &msg);
                let reply = agent.process(&cancel, &inbound).await?;
                println!("\n🦁 {}", reply);
            } else {
                run_interactive(&config, agent, &sender, cancel).await?;
            }
        }

        Commands::Status => print_status(&config),
    }

    Ok(())
}

fn build_agent(config: &Config) -> Result<Arc<Agent>> {
    let provider: Arc<dyn LlmClient> = Arc::from(ProviderRegistry::create(config)?);
    let sessions = FileSessionManager::new(&config.sessions_dir)?;
    let memory = Arc::new(FileMemoryStore::new(&config.workspace));

    let mut tools = ToolRunner::new();
    tools.register(RememberTool::new(Arc::clone(&memory)));

    let mut builder = Agent::builder()
        .config(config.clone())
        .provider(provider.clone())
        .sessions(Arc::new(sessions))
        .tools(Arc::new(tools))
        .memory(memory)
        .skills(Arc::new(SkillRegistry::new(&config.workspace)));

    if config.context.enabled {
        builder = builder
            .budget_manager(BudgetManager::new(config.context.safety_margin))
            .compressor(Compressor::with_provider(provider));
    }

    Ok(Arc::new(builder.build()?))
}

async fn run_interactive(config: &Config, agent: Arc<Agent>, sender: &str, cancel: CancellationToken) -> Result<()> {
    ui::print_leo_header(&config.model, &config.provider.name);

    let bus = MessageBus::new(config.bus.queue_size);
    let _agent_sub = agent.serve(&bus, topics::CLI, cancel.clone());
    let channel = CliChannel::new(bus.clone(), sender, cancel.clone())
        .with_reply_timeout(agent.timeout() + std::time::Duration::from_secs(5));

    let heartbeat_stop = cancel.child_token();
    let heartbeat = if config.heartbeat.enabled {
        agent.serve(&bus, topics::HEARTBEAT, cancel.clone());
        bus.subscribe_outbound(topics::HEARTBEAT, |msg: OutboundMessage| async move {
            let task = msg.metadata.get("task").and_then(|v| v.as_str()).unwrap_or_default();
            ui::print_heartbeat(task, &msg.content);
            Ok::<(), leo_relay::Error>(())
        });
        let interval = std::time::Duration::from_secs(config.heartbeat.interval_secs);
        Some(Heartbeat::new(bus.clone(), &config.workspace)?.with_interval(interval).spawn(heartbeat_stop.clone()))
    } else {
        None
    };

    bus.start().await;
    let result = channel.start().await;
    channel.stop().await?;
    heartbeat_stop.cancel();
    if let Some(handle) = heartbeat {
        handle.await?;
    }
    bus.stop().await;

    Ok(result?)
}

fn print_status(config: &Config) {
    println!("🦁 Leo Status\n");
    ui::print_field("Config", &config::config_path().display().to_string());
    ui::print_field("Workspace", &config.workspace.display().to_string());
    ui::print_field("Sessions", &config.sessions_dir.display().to_string());
    ui::print_field("Provider", &config.provider.name);
    ui::print_field("API base", &config.provider.api_base);
    ui::print_field(
        "API key",
        if config.provider.api_key.is_empty() { "not set" } else { "✓" },
    );
    ui::print_field("Model", &config.model);
    ui::print_field("Max iterations", &config.max_iterations.to_string());
    ui::print_field("Timeout", &format!("{}s", config.timeout_secs));
    ui::print_field("Queue size", &config.bus.queue_size.to_string());

    let skills = SkillRegistry::new(&config.workspace);
    let names = skills.list();
    let names = if names.is_empty() { "none".to_string() } else { names.join(", ") };
    ui::print_field("Skills", &names);

    if config.heartbeat.enabled {
        ui::print_field("Heartbeat", &format!("every {}s", config.heartbeat.interval_secs));
    } else {
        ui::print_field("Heartbeat", "disabled");
    }

    if config.context.enabled {
        let budget = BudgetManager::new(config.context.safety_margin).compute_budget(&config.model, config.max_tokens);
        ui::print_field("Context budget", &format!("{} tokens", budget));
    } else {
        ui::print_field("Context budget", "compression disabled");
    }

    if config.provider.api_key.is_empty() && config.provider.name != "ollama" {
        ui::print_warning("Set provider.api_key in the config file before chatting");
    }
}
