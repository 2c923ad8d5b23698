mod config;
mod logging;
mod serve;
mod sink;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use stagewise_core::{Catalog, StageDefinition, WorkflowType};

use crate::config::Config;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Pipeline stage workflow engine.
#[derive(Parser)]
#[command(name = "stagewise", version, about = "Pipeline stage workflow engine")]
struct Cli {
    /// Path to the configuration file (default: ./stagewise.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server and automation scheduler
    Serve {
        /// Port to listen on (overrides config and STAGEWISE_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the stage catalog
    Catalog {
        /// Only this workflow (sales-lead, sales-deal, offboarding)
        workflow: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { port, bind } => cmd_serve(cli.config, port, bind),
        Commands::Catalog { workflow } => cmd_catalog(workflow.as_deref(), cli.output),
        Commands::Config => cmd_config(cli.config, cli.output),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn cmd_serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    logging::init(&config.logging);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve::start_server(config))
}

fn cmd_catalog(workflow: Option<&str>, output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Catalog::builtin();
    let workflows = match workflow {
        Some(name) => vec![name.parse::<WorkflowType>()?],
        None => WorkflowType::ALL.to_vec(),
    };

    match output {
        OutputFormat::Json => {
            let listing: Vec<serde_json::Value> = workflows
                .iter()
                .map(|&w| {
                    serde_json::json!({
                        "workflow": w,
                        "stages": catalog.stages_for(w),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        OutputFormat::Text => {
            for (i, &w) in workflows.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                println!("{} ({} stages)", w, catalog.total_stages(w));
                for stage in catalog.stages_for(w) {
                    println!("  {}", describe(stage));
                }
            }
        }
    }
    Ok(())
}

fn describe(stage: &StageDefinition) -> String {
    let mut line = format!("{:>2}. {:<18} {}", stage.order, stage.id, stage.title);
    let mut tags = Vec::new();
    if let Some(kind) = stage.terminal {
        tags.push(format!("terminal: {:?}", kind).to_lowercase());
    }
    if let Some(slot) = &stage.artifact_slot {
        tags.push(format!("slot: {}", slot));
    }
    if !stage.decision_options.is_empty() {
        let labels: Vec<&str> = stage.decision_options.iter().map(|o| o.label.as_str()).collect();
        tags.push(format!("options: {}", labels.join(" | ")));
    }
    if stage.checklist_gate {
        tags.push("gated checklist".to_string());
    }
    for rule in &stage.automations {
        tags.push(format!("{} after {}bd", rule.kind, rule.delay_business_days));
    }
    if !tags.is_empty() {
        line.push_str(&format!("  [{}]", tags.join(", ")));
    }
    line
}

fn cmd_config(config_path: Option<PathBuf>, output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path.as_deref())?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => print!("{}", config.to_toml()?),
    }
    Ok(())
}
