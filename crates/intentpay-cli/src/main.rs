use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use intentpay_adapters::Fixture;
use intentpay_core::{EngineConfig, ExecuteOptions, PaymentRuntime, PlanError};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "intentpayctl", version, about = "Validate and dry-run intent payment plans")]
struct Cli {
    /// JSON engine config (validator thresholds, risk bands, nonce timing).
    #[arg(long, global = true, env = "INTENTPAY_CONFIG")]
    config: Option<PathBuf>,
    /// Signing account plans act for. Overrides the config file.
    #[arg(long, global = true, env = "INTENTPAY_ACCOUNT")]
    account: Option<String>,
    /// Default token for balance checks and transfers. Overrides the config file.
    #[arg(long, global = true, env = "INTENTPAY_TOKEN")]
    token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the validation report for a draft plan
    Validate {
        /// Draft plan JSON file
        draft: PathBuf,
        /// Fixture used to register operations against; defaults to an empty ledger.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Validate a draft plan, then execute it against an in-memory ledger
    Execute(ExecuteArgs),
}

#[derive(Debug, Args)]
struct ExecuteArgs {
    /// Draft plan JSON file
    draft: PathBuf,
    /// Ledger and market fixture JSON file
    #[arg(long)]
    fixture: PathBuf,
    /// Attempt every step even after a high-risk failure.
    #[arg(long, default_value_t = false)]
    keep_going: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteOutput<'a> {
    result: &'a intentpay_core::ExecutionResult,
    audit: intentpay_core::ExecutionAudit,
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn load_fixture(path: Option<&Path>) -> anyhow::Result<Fixture> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read fixture {}", path.display()))?;
            Ok(Fixture::from_json(&raw)?)
        }
        None => Ok(Fixture::default()),
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            EngineConfig::from_json(&raw)?
        }
        None => EngineConfig::default(),
    };
    if let Some(account) = &cli.account {
        config.account = account.clone();
    }
    if let Some(token) = &cli.token {
        config.token = token.clone();
    }
    Ok(config)
}

fn runtime_for(config: EngineConfig, fixture: &Fixture) -> anyhow::Result<PaymentRuntime> {
    let ledger = Arc::new(fixture.ledger()?);
    Ok(PaymentRuntime::bootstrap(config, ledger, fixture.market()))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "intentpay=info,info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    info!(account = %config.account, token = %config.token, "intentpayctl starting");

    match &cli.command {
        Commands::Validate { draft, fixture } => {
            let draft = read_json(draft)?;
            let runtime = runtime_for(config, &load_fixture(fixture.as_deref())?)?;
            let (_, report) = runtime.inspect(&draft);
            print_json(&report)?;
            if !report.valid {
                std::process::exit(2);
            }
        }
        Commands::Execute(args) => {
            let draft = read_json(&args.draft)?;
            let runtime = runtime_for(config, &load_fixture(Some(args.fixture.as_path()))?)?;

            let prepared = match runtime.prepare(&draft) {
                Ok(prepared) => prepared,
                Err(PlanError::Validation(report)) => {
                    print_json(&report)?;
                    std::process::exit(2);
                }
                Err(err) => return Err(err.into()),
            };
            for warning in &prepared.warnings {
                tracing::warn!("{warning}");
            }
            if prepared.plan.requires_approval {
                info!(
                    plan_id = %prepared.plan.id,
                    overall_risk = %prepared.plan.overall_risk,
                    "plan requires approval; dry run against fixture ledger"
                );
            }

            let options = ExecuteOptions {
                stop_on_failure: !args.keep_going,
            };
            let result = runtime.engine().execute(prepared.plan, options).await?;
            let audit = result.audit_record()?;
            print_json(&ExecuteOutput {
                result: &result,
                audit,
            })?;
        }
    }

    Ok(())
}
