//! Scholar Gateway - route literature requests to MCP tools and stream results

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use scholar_gateway::{
    cli::{Cli, Command, ToolKind},
    config::Config,
    gateway::Gateway,
    llm,
    pipeline::Pipeline,
    routing::{ToolDecision, decide},
    setup_tracing,
    tools::{ArxivSearch, SummarizeTool, ToolRegistry, ToolServer},
};

/// Exit code for a message the router rejects
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Route { ref message }) => run_route(message),
        Some(Command::Tools { ref tools, port }) => {
            let Some(config) = load_config(&cli) else {
                return ExitCode::FAILURE;
            };
            run_tools(config, tools, port).await
        }
        Some(Command::Serve { port, ref host }) => {
            let Some(mut config) = load_config(&cli) else {
                return ExitCode::FAILURE;
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host.clone_from(host);
            }
            run_server(config).await
        }
        None => {
            let Some(config) = load_config(&cli) else {
                return ExitCode::FAILURE;
            };
            run_server(config).await
        }
    }
}

fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Print the routing decision as JSON
fn run_route(message: &str) -> ExitCode {
    let decision = decide(message);
    match serde_json::to_string_pretty(&decision) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize decision: {e}");
            return ExitCode::FAILURE;
        }
    }
    match decision {
        ToolDecision::Invoke(_) => ExitCode::SUCCESS,
        ToolDecision::Reject { .. } => ExitCode::from(EXIT_REJECTED),
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        tools = config.tools.len(),
        "Starting Scholar Gateway"
    );

    if let Err(e) = Gateway::new(config).run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}

async fn run_tools(mut config: Config, selected: &[ToolKind], port: Option<u16>) -> ExitCode {
    let selected = if selected.is_empty() {
        vec![ToolKind::Search, ToolKind::Summarize]
    } else {
        selected.to_vec()
    };

    // A single tool defaults to the port its endpoint table entry points at
    config.tool_server.port = port
        .or_else(|| match selected.as_slice() {
            [only] => endpoint_port(&config, only.name()),
            _ => None,
        })
        .unwrap_or(config.tool_server.port);

    let registry = match build_registry(&config, &selected) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to create tools: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = ToolServer::new(config.tool_server, registry).run().await {
        error!("Tool server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn endpoint_port(config: &Config, tool: &str) -> Option<u16> {
    let endpoint = config.tools.get(tool)?;
    url::Url::parse(&endpoint.url).ok()?.port_or_known_default()
}

fn build_registry(config: &Config, selected: &[ToolKind]) -> scholar_gateway::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for kind in selected {
        registry = match kind {
            ToolKind::Search => registry.with(Arc::new(ArxivSearch::new(&config.search)?)),
            ToolKind::Summarize => {
                info!(
                    provider = config.llm.provider.as_str(),
                    model = %config.llm.model,
                    "Using completion provider"
                );
                let completer = llm::from_config(&config.llm)?;
                let pipeline = Pipeline::new(config.pipeline.clone(), completer)?;
                registry.with(Arc::new(SummarizeTool::new(Arc::new(pipeline))))
            }
        };
    }
    Ok(registry)
}
