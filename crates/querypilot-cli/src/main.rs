use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use querypilot_agent::{AgentEvent, EventSink, RunOptions, run_agent};
use querypilot_core::config::Config;
use querypilot_core::types::QueryRequest;
use querypilot_providers::ProviderRegistry;
use querypilot_server::AppState;
use querypilot_tools::{HttpStudioBackend, StudioBackend, ToolContext, ToolRegistry, register_builtin_tools};

#[derive(Parser)]
#[command(
    name = "querypilot",
    about = "AI assistant service for the database studio — schema-aware SQL conversations over SSE",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the streaming server
    Serve {
        /// Port to listen on (default: 8870)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ask a one-shot question against a connected database
    Ask {
        /// The natural-language question
        question: String,

        /// Connection id the question is about
        #[arg(long)]
        connection: Option<String>,

        /// Default schema (e.g. "public")
        #[arg(long)]
        schema: Option<String>,

        /// Provider id (first configured provider if omitted)
        #[arg(long)]
        provider: Option<String>,

        /// Model override
        #[arg(long)]
        model: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
}

fn init_logging(config: &Config, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config
            .logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or("info")
    };

    let mut filter = default_level.to_string();
    if let Some(logging) = config.logging.as_ref() {
        for directive in &logging.filters {
            filter.push(',');
            filter.push_str(directive);
        }
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let json = config
        .logging
        .as_ref()
        .is_some_and(|l| l.format == "json");
    let to_stdout = config
        .logging
        .as_ref()
        .is_some_and(|l| l.output == "stdout");

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match (json, to_stdout) {
        (true, true) => builder.json().init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

fn build_backend(config: &Config) -> anyhow::Result<Arc<dyn StudioBackend>> {
    let backend_config = config
        .backend
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No studio backend configured (backend.base_url)"))?;
    Ok(Arc::new(HttpStudioBackend::from_config(backend_config)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    for warning in config.validate().0 {
        tracing::warn!("{warning}");
    }

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.server_port());
            let config = Arc::new(config);
            let providers = Arc::new(ProviderRegistry::from_config(&config));
            let backend = build_backend(&config)?;

            let state = Arc::new(AppState::new(config, providers, backend));
            querypilot_server::start_server(state, port).await?;
        }

        Commands::Ask {
            question,
            connection,
            schema,
            provider,
            model,
        } => {
            let registry = ProviderRegistry::from_config(&config);
            let provider_id = provider
                .or_else(|| {
                    config
                        .providers
                        .as_ref()
                        .and_then(|p| p.first())
                        .map(|p| p.id.clone())
                })
                .ok_or_else(|| anyhow::anyhow!("No provider configured"))?;
            let registered = registry
                .get(&provider_id)
                .ok_or_else(|| anyhow::anyhow!("Unknown provider: {provider_id}"))?;
            let credentials = registered
                .credentials
                .clone()
                .ok_or_else(|| anyhow::anyhow!("No credentials for provider: {provider_id}"))?;
            let model = model
                .or_else(|| registered.default_model.clone())
                .ok_or_else(|| anyhow::anyhow!("No model given and no default for: {provider_id}"))?;

            let backend = build_backend(&config)?;
            let mut tools = ToolRegistry::new();
            register_builtin_tools(&mut tools);

            let request = QueryRequest {
                query: question,
                connection_id: connection.clone(),
                schema: schema.clone(),
                ..Default::default()
            };
            let tool_context = ToolContext {
                connection_id: connection,
                schema,
                backend,
            };
            let options = RunOptions::from_config(&config, model);

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let sink = EventSink::new(tx);

            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        AgentEvent::Chunk { content } => {
                            print!("{content}");
                            let _ = std::io::stdout().flush();
                        }
                        AgentEvent::ToolCall { tool_name, .. } => {
                            eprintln!("→ {tool_name}");
                        }
                        AgentEvent::ToolResponse { response, .. } => {
                            eprintln!("← {response}");
                        }
                        AgentEvent::Error { error } => {
                            eprintln!("error: {error}");
                        }
                        AgentEvent::Done {} => println!(),
                        AgentEvent::Tools { .. } | AgentEvent::Heartbeat {} => {}
                    }
                }
            });

            let result = run_agent(
                &request,
                &options,
                &tools,
                &tool_context,
                registered.provider.as_ref(),
                &credentials,
                &sink,
            )
            .await;
            drop(sink);
            let _ = printer.await;

            if let Some(error) = result.meta.error {
                anyhow::bail!("{}", error.message);
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{value}"),
                None => {
                    anyhow::bail!("Key not found: {key}");
                }
            },
            ConfigAction::Set { key, value } => {
                let mut config = config;
                let parsed: serde_json::Value =
                    serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
                config.set_path(&key, parsed)?;
                config.save(&config_path)?;
                println!("Set {key}");
            }
        },
    }

    Ok(())
}
