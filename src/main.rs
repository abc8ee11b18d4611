//! DAG Engine - cross-language source dependency analyser
//!
//! Serves analysis requests as line-delimited JSON-RPC on stdin/stdout, or
//! runs a single analysis from the command line.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dag_engine::core::models::Confidence;
use dag_engine::core::parser::path_key;
use dag_engine::{server, Config, ProjectAnalyser};

/// DAG Engine - cross-language source dependency analyser
#[derive(Parser)]
#[command(name = "dag-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC requests on stdin/stdout (default)
    Serve,

    /// Analyse a project and print its graph as JSON
    Analyse {
        /// Path to the project root
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Analyse a project and print the impact of changing a file or function
    Impact {
        /// Path to the project root
        #[arg(short, long)]
        root: PathBuf,

        /// Changed file
        #[arg(short, long)]
        file: PathBuf,

        /// Changed function within the file
        #[arg(long)]
        function: Option<String>,

        /// Maximum traversal depth
        #[arg(short, long)]
        max_depth: Option<usize>,

        /// Lowest edge confidence to follow: high, medium, low or unsafe
        #[arg(long)]
        min_confidence: Option<Confidence>,
    },

    /// Write the effective configuration to a TOML file
    Config {
        /// Output file
        #[arg(short, long, default_value = "dag-engine.toml")]
        output: PathBuf,
    },
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dag_engine={}", level)));

    // stdout carries RPC responses
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match config.logging.format.as_str() {
        "pretty" => builder.pretty().init(),
        "full" => builder.init(),
        _ => builder.compact().init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    init_logging(&config, cli.verbose);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!("Serving JSON-RPC on stdio");
            server::serve_stdio(&config)?;
        }

        Commands::Analyse { path } => {
            let mut analyser = ProjectAnalyser::new(&config);
            let output = analyser
                .analyse_project(&path)
                .map_err(anyhow::Error::from)
                .and_then(|graph| Ok(serde_json::to_string_pretty(graph)?));
            analyser.shutdown();
            println!("{}", output?);
        }

        Commands::Impact {
            root,
            file,
            function,
            max_depth,
            min_confidence,
        } => {
            let mut analyser = ProjectAnalyser::new(&config);
            analyser.analyse_project(&root)?;
            let report = analyser.get_impact(
                &path_key(&file),
                function.as_deref(),
                max_depth,
                min_confidence,
            );
            analyser.shutdown();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Config { output } => {
            config.to_file(&output)?;
            info!("Configuration written to {:?}", output);
        }
    }

    Ok(())
}
