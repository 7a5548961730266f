use clap::{Args, Parser, Subcommand};
use contract_audit::{AggregateComposer, AuditPipeline, Config};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "contract-audit")]
#[command(about = "Run smart-contract analyzers over a source tree and write audit reports")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Directory containing contract sources [default: ./contracts]
    contract_root: Option<PathBuf>,

    /// Report directory. Its contents are DELETED before the run [default: ./audit-reports]
    output_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the aggregate report from an existing output directory without running any tool
    Aggregate {
        /// Report directory produced by a previous run
        output_root: Option<PathBuf>,
    },
    /// Generate a documented configuration file
    Config {
        /// Output path for the config file (defaults to ~/.contract-audit.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        None => run_audit(cli.run, cli.config).await?,
        Some(Commands::Aggregate { output_root }) => {
            let mut config = load_config(cli.config)?;
            if let Some(output_root) = output_root {
                config.output_root = output_root;
            }
            aggregate_only(&config)?;
        }
        Some(Commands::Config { output }) => generate_config(output)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "contract_audit=debug" } else { "contract_audit=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(&path),
        None => Config::load(),
    }
}

async fn run_audit(args: RunArgs, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    println!("🚀 Starting smart contract security audit");
    println!("=========================================");

    let start_time = Instant::now();

    let mut config = load_config(config_path)?;
    if let Some(contract_root) = args.contract_root {
        config.contract_root = contract_root;
    }
    if let Some(output_root) = args.output_root {
        config.output_root = output_root;
    }

    println!("🎯 Contract directory: {}", config.contract_root.display());
    println!("📤 Output directory: {}", config.output_root.display());
    println!(
        "🧰 Tools: {}",
        config.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
    );

    let contract_root = config.contract_root.clone();
    let mut pipeline = AuditPipeline::new(config);
    let summary = pipeline.run(&contract_root).await?;

    let counts = summary.aggregate.severity_counts;
    println!("\n✅ Audit completed in {:.2}s", start_time.elapsed().as_secs_f64());
    println!("  Contracts: {} ({} reports written)", summary.targets, summary.reports.len());
    println!("  High: {}  Medium: {}  Low: {}", counts.high, counts.medium, counts.low);
    for (target, reason) in &summary.failed_targets {
        println!("  ⚠️  {} was skipped: {}", target, reason);
    }
    println!("📁 Reports saved in {}", pipeline.output_root().display());

    Ok(())
}

fn aggregate_only(config: &Config) -> anyhow::Result<()> {
    println!("📊 Rebuilding aggregate report from {}", config.output_root.display());

    let composer = AggregateComposer::new(config);
    let report = composer.compose(&config.output_root)?;
    let written = composer.write(&report, &config.output_root)?;

    let counts = report.severity_counts;
    println!("  Contracts: {}", report.target_ids.len());
    println!("  High: {}  Medium: {}  Low: {}", counts.high, counts.medium, counts.low);
    for file in written {
        println!("   - {}", file.display());
    }
    Ok(())
}

fn generate_config(output_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = output_path.unwrap_or_else(|| {
        Config::default_config_path().unwrap_or_else(|_| PathBuf::from("contract-audit.toml"))
    });

    println!("📝 Generating configuration file: {}", config_path.display());
    std::fs::write(&config_path, Config::create_documented_config())?;

    println!("✅ Configuration file created successfully!");
    println!("💡 Edit the [[tools]] entries to match the analyzers installed on this machine.");

    Ok(())
}
