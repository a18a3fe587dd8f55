//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::routing::{SEARCH_TOOL, SUMMARIZE_TOOL};

/// Scholar Gateway - route messages to literature tools and stream results
#[derive(Parser, Debug)]
#[command(name = "scholar-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SCHOLAR_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SCHOLAR_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SCHOLAR_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the routing-and-streaming gateway (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "SCHOLAR_GATEWAY_PORT")]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long, env = "SCHOLAR_GATEWAY_HOST")]
        host: Option<String>,
    },

    /// Run the backend tool service
    Tools {
        /// Tools to expose (repeatable; default: all)
        #[arg(short, long = "tool", value_enum)]
        tools: Vec<ToolKind>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the routing decision for a message and exit
    Route {
        /// Free-form message text
        #[arg(required = true)]
        message: String,
    },
}

/// Tools the backend service can expose
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolKind {
    /// arXiv literature search
    Search,
    /// PDF summarization
    Summarize,
}

impl ToolKind {
    /// Tool identifier as routed by the gateway
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Search => SEARCH_TOOL,
            Self::Summarize => SUMMARIZE_TOOL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_to_no_subcommand() {
        let cli = Cli::try_parse_from(["scholar-gateway"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn tools_accepts_repeated_tool_flag() {
        let cli = Cli::try_parse_from([
            "scholar-gateway",
            "tools",
            "--tool",
            "search",
            "--tool",
            "summarize",
            "--port",
            "4300",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Tools { tools, port }) => {
                assert_eq!(tools, vec![ToolKind::Search, ToolKind::Summarize]);
                assert_eq!(port, Some(4300));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn route_takes_message() {
        let cli =
            Cli::try_parse_from(["scholar-gateway", "route", "papers on transformers"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Route { message }) if message == "papers on transformers"));
    }

    #[test]
    fn unknown_tool_is_rejected() {
        assert!(Cli::try_parse_from(["scholar-gateway", "tools", "--tool", "translate"]).is_err());
    }
}
