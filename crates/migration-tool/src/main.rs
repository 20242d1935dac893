use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use migration_tool::confirm::{self, AssumeYes, Confirm, StdinConfirm};
use migration_tool::migrate::{self, MigrationContext};
use migration_tool::settings::Settings;
use migration_tool::{backfill, renumber, sweep, verify};
use panel_db::{SspanelDb, V2boardDb};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "migration-tool")]
#[command(about = "Migrates sspanel users and purchases into a v2board database")]
#[command(version)]
struct Args {
    /// Config file with both database connections
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Do not ask for confirmation
    #[arg(long)]
    yes: bool,

    /// Run the pass and roll back instead of committing
    #[arg(long = "dry-run")]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Set v2_user.plan_id from each user's latest sspanel purchase
    BackfillPlans,
    /// Copy sspanel users into v2_user, then renumber ids
    MigrateUsers,
    /// Renumber v2_user ids to 1..N and remap invite references
    Renumber,
    /// Check v2_user ids are dense and invite references resolve
    Verify,
    /// Drop scratch tables left by an interrupted renumbering
    Sweep,
}

impl Command {
    fn needs_source(&self) -> bool {
        matches!(self, Command::BackfillPlans | Command::MigrateUsers)
    }

    /// Warning shown before the command writes anything
    fn prompt(&self) -> Option<&'static str> {
        match self {
            Command::BackfillPlans => {
                Some("This will update v2_user.plan_id, make sure the database is backed up!")
            }
            Command::MigrateUsers => Some(
                "This will insert into v2_user and renumber its ids, make sure the database is backed up!",
            ),
            Command::Renumber => {
                Some("This will rewrite every v2_user id, make sure the database is backed up!")
            }
            Command::Sweep => Some("This will drop leftover v2_user scratch tables."),
            Command::Verify => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let target = V2boardDb::connect(settings.target.connect_options())
        .await
        .context("Failed to connect to v2board database")?;
    info!("Connected to v2board database {}", settings.target.database);

    let source = if args.command.needs_source() {
        match SspanelDb::connect(settings.source.connect_options()).await {
            Ok(s) => {
                info!("Connected to sspanel database {}", settings.source.database);
                Some(s)
            }
            Err(e) => {
                target.close().await;
                return Err(e.context("Failed to connect to sspanel database"));
            }
        }
    } else {
        None
    };

    let result = run(&args, &settings, source.as_ref(), &target).await;

    if let Some(source) = &source {
        source.close().await;
    }
    target.close().await;

    match &result {
        Ok(()) => info!("Finished {:?}", args.command),
        Err(e) => error!("{:?} failed: {:#}", args.command, e),
    }
    result
}

async fn run(
    args: &Args,
    settings: &Settings,
    source: Option<&SspanelDb>,
    target: &V2boardDb,
) -> Result<()> {
    if let Some(prompt) = args.command.prompt() {
        let gate: Box<dyn Confirm> = if args.yes {
            Box::new(AssumeYes)
        } else {
            Box::new(StdinConfirm)
        };
        confirm::require(gate.as_ref(), prompt)?;
    }
    if args.dry_run {
        info!("Dry run, no changes will be committed");
    }

    if args.command != Command::Verify {
        sweep::run(target, args.dry_run).await?;
    }

    match args.command {
        Command::BackfillPlans => {
            let source = source.context("sspanel database not connected")?;
            let plans = settings.mapping.shop_plans();
            backfill::run(source, target, &plans, args.dry_run).await?;
        }
        Command::MigrateUsers => {
            let source = source.context("sspanel database not connected")?;
            let ctx = MigrationContext::new(&settings.mapping, Utc::now())?;
            let report = migrate::run(source, target, &ctx, args.dry_run).await?;
            if report.renumber.is_some() {
                verify::ensure(target).await?;
            }
        }
        Command::Renumber => {
            renumber::run(target, args.dry_run).await?;
            if !args.dry_run {
                verify::ensure(target).await?;
            }
        }
        Command::Verify => {
            verify::ensure(target).await?;
        }
        Command::Sweep => {}
    }
    Ok(())
}
