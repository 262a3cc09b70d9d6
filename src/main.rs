use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use onepager_agent::{GraphRunner, TextGenerator};
use onepager_core::config::AppConfig;
use onepager_core::traits::ToolConnector;
use onepager_core::types::WorkflowSummary;
use onepager_mcp::McpConnector;

#[derive(Parser)]
#[command(name = "onepager", version, about = "LP one-pager workflow orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "onepager.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the one-pager pipeline for a deal
    Run(RunArgs),
    /// List the tools the remote service advertises
    Tools,
    /// Show effective configuration
    Config(DealOverrides),
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    deal: DealOverrides,

    /// Skip the generative helper; every agent uses its deterministic path
    #[arg(long)]
    no_llm: bool,
}

#[derive(Args)]
struct DealOverrides {
    #[arg(long)]
    deal_id: Option<String>,
    /// Company name
    #[arg(long)]
    company: Option<String>,
    /// Period end date (YYYY-MM-DD)
    #[arg(long)]
    period_end: Option<String>,
    /// Directory holding the deal's source files
    #[arg(long)]
    data_dir: Option<String>,
    /// Where to write the one-pager (default: data dir)
    #[arg(long)]
    output_dir: Option<String>,
}

impl DealOverrides {
    fn apply(self, config: &mut AppConfig) {
        let deal = &mut config.deal;
        if let Some(v) = self.deal_id {
            deal.deal_id = v;
        }
        if let Some(v) = self.company {
            deal.company_name = v;
        }
        if let Some(v) = self.period_end {
            deal.period_end = v;
        }
        if let Some(v) = self.data_dir {
            deal.data_dir = v;
        }
        if let Some(v) = self.output_dir {
            deal.output_dir = Some(v);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("onepager=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "onepager", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Config(overrides) => {
            overrides.apply(&mut config);
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Tools => {
            let connector = McpConnector::new(config.tools.clone());
            let session = connector.connect(&config.tools.client_label).await?;
            let mut tools = session.list_tools().await?;
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            println!("{} tools at {}:", tools.len(), config.tools.server_url);
            for tool in tools {
                let params = tool.parameter_names().join(", ");
                println!("  {:<28} ({}) {}", tool.name, params, tool.description);
            }
        }
        Commands::Run(args) => {
            args.deal.apply(&mut config);
            let generator = if args.no_llm {
                None
            } else {
                onepager_llm::client_from_config(&config)
                    .map(|(client, model)| TextGenerator::new(client, model))
            };
            match &generator {
                Some(g) => info!(model = %g.model_id(), "Generative helper enabled"),
                None => info!("Generative helper disabled, using deterministic agents"),
            }

            let connector: Arc<dyn ToolConnector> = Arc::new(McpConnector::new(config.tools.clone()));
            let runner = GraphRunner::new(config, connector).with_generator(generator);

            let result = match runner.run().await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "Run aborted");
                    std::process::exit(1);
                }
            };

            print_summary(&result.summary, result.total_elapsed_ms);
            if !result.summary.success {
                std::process::exit(1);
            }
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn print_summary(summary: &WorkflowSummary, elapsed_ms: u64) {
    println!();
    println!("One-pager run {}", if summary.success { "succeeded" } else { "finished with errors" });
    println!("  Files ingested:    {}", summary.files_ingested);
    println!("  KPIs computed:     {}", summary.kpis_computed);
    println!("  Snapshot entries:  {}", summary.snapshot_size);
    println!("  Bullets generated: {}", summary.bullets_generated);
    println!("  Ingestion retries: {}", summary.retry_count);
    if let Some(path) = &summary.output_file {
        println!("  Output:            {}", path.display());
    }
    if let Some(run_id) = &summary.run_id {
        println!("  Run ID:            {}", run_id);
    }
    println!("  Path:              {}", summary.path_taken.join(" -> "));
    println!("  Elapsed:           {} ms", elapsed_ms);
    if !summary.errors.is_empty() {
        println!("  Errors:");
        for e in &summary.errors {
            println!("    - {}", e);
        }
    }
}
