use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tda_schemas::EntityKey;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "tda")]
#[command(about = "Trading-day sentiment aggregation CLI", long_about = None)]
struct Cli {
    /// Print full reports as JSON instead of key=value lines
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Fail instead of warn when the config has keys the command does not read
    #[arg(long, global = true, default_value_t = false)]
    strict_config: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Recompute the trading days absorbing newly arrived event dates
    ProcessNew {
        #[arg(long)]
        entity: EntityKey,

        /// New event date (YYYY-MM-DD); repeatable
        #[arg(long = "date", required = true)]
        dates: Vec<NaiveDate>,

        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Zero every stored day of an entity and rebuild from the full event history
    RecomputeAll {
        #[arg(long)]
        entity: EntityKey,

        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Re-run only the given (previously failed) days
    RetryFailed {
        #[arg(long)]
        entity: EntityKey,

        /// Day to retry (YYYY-MM-DD); repeatable
        #[arg(long = "day", required = true)]
        days: Vec<NaiveDate>,

        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Read-only mapping summary for an entity
    Status {
        #[arg(long)]
        entity: EntityKey,

        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },

    /// Run one pass per entity concurrently
    RunBatch {
        /// Entity to process; repeatable. Defaults to engine.entities from config.
        #[arg(long = "entity")]
        entities: Vec<EntityKey>,

        /// New event dates for an incremental pass. Without any, every entity is fully recomputed.
        #[arg(long = "date")]
        dates: Vec<NaiveDate>,

        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DbCmd {
    Status,

    /// Apply SQL migrations
    Migrate,

    /// Load `entity,date,category` rows into events
    ImportEvents {
        #[arg(long)]
        path: std::path::PathBuf,
    },

    /// Load `entity,date` rows as quoted trading days
    ImportCalendar {
        #[arg(long)]
        path: std::path::PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let out = commands::Output { json: cli.json };
    let policy = if cli.strict_config {
        tda_config::UnusedKeyPolicy::Fail
    } else {
        tda_config::UnusedKeyPolicy::Warn
    };

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = tda_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = tda_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_trading_days_table={} has_events_table={}",
                        s.ok, s.has_trading_days_table, s.has_events_table
                    );
                }
                DbCmd::Migrate => {
                    tda_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
                DbCmd::ImportEvents { path } => {
                    let r = tda_db::ingest_events_csv(&pool, &path).await?;
                    commands::db::print_ingest(&out, "events", &r)?;
                }
                DbCmd::ImportCalendar { path } => {
                    let r = tda_db::ingest_calendar_csv(&pool, &path).await?;
                    commands::db::print_ingest(&out, "calendar", &r)?;
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = tda_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ProcessNew {
            entity,
            dates,
            config_paths,
        } => {
            let ctx = commands::EngineContext::open(
                &config_paths,
                tda_config::ConfigMode::ProcessNew,
                policy,
            )
            .await?;
            let report = ctx.engine.process_new(&entity, &dates).await?;
            commands::pass::finish_pass(&out, &ctx.config_hash, &report)?;
        }

        Commands::RecomputeAll {
            entity,
            config_paths,
        } => {
            let ctx = commands::EngineContext::open(
                &config_paths,
                tda_config::ConfigMode::RecomputeAll,
                policy,
            )
            .await?;
            let report = ctx.engine.recompute_all(&entity).await?;
            commands::pass::finish_pass(&out, &ctx.config_hash, &report)?;
        }

        Commands::RetryFailed {
            entity,
            days,
            config_paths,
        } => {
            let ctx = commands::EngineContext::open(
                &config_paths,
                tda_config::ConfigMode::ProcessNew,
                policy,
            )
            .await?;
            let report = ctx.engine.retry_failed(&entity, &days).await?;
            commands::pass::finish_pass(&out, &ctx.config_hash, &report)?;
        }

        Commands::Status {
            entity,
            config_paths,
        } => {
            let ctx = commands::EngineContext::open(
                &config_paths,
                tda_config::ConfigMode::Status,
                policy,
            )
            .await?;
            let status = ctx.engine.status(&entity).await?;
            commands::pass::print_status(&out, &status)?;
        }

        Commands::RunBatch {
            entities,
            dates,
            config_paths,
        } => {
            let ctx = commands::EngineContext::open(
                &config_paths,
                tda_config::ConfigMode::Batch,
                policy,
            )
            .await?;
            let jobs = commands::pass::batch_jobs(entities, &ctx.config, dates)?;
            let report = ctx.engine.run_batch(jobs).await;
            commands::pass::finish_batch(&out, &ctx.config_hash, &report)?;
        }
    }

    Ok(())
}
