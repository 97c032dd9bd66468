// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use git_version::git_version;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use self::error::{Error, Result};

pub mod cleanup;
pub mod error;
pub mod evaluate;
pub mod forecast;
pub mod models;
pub mod store;

use cleanup::{cutoff, ArchiveScope};
use store::PgStore;

const VERSION: &str = git_version!(cargo_prefix = "cargo:", fallback = "unknown");

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Delete the forecasts made before a certain date, in batches
    Cleanup {
        /// Datetime (UTC) before which to delete, format: YYYY-MM-DD HH:MM
        #[arg(long, conflicts_with_all = ["days_back", "cutoff_hour"])]
        date: Option<String>,

        /// Without --date, delete forecasts older than this many days
        #[arg(long, default_value_t = cutoff::DEFAULT_DAYS_BACK)]
        days_back: u64,

        /// Without --date, hour of the day (UTC) the cutoff falls on
        #[arg(long, default_value_t = cutoff::DEFAULT_CUTOFF_HOUR)]
        cutoff_hour: u32,

        /// Number of forecasts to delete in one batch (each has many values)
        #[arg(long, default_value_t = cleanup::DEFAULT_BATCH_SIZE)]
        batch_size: i64,

        /// Seconds to wait between batches
        #[arg(long, default_value_t = 0.0)]
        sleep: f64,

        /// Directory or object store URL to archive forecasts to before deleting them
        #[arg(long, env = "SAVE_DIR")]
        save_dir: Option<String>,

        /// Which sites to archive, defaults to group-sites when --save-dir is given
        #[arg(long, value_enum)]
        archive_scope: Option<ArchiveScope>,

        /// Minimum service level of the site groups to archive
        #[arg(long, default_value_t = cleanup::DEFAULT_MIN_SERVICE_LEVEL)]
        min_service_level: i32,

        /// Maximum number of sites archived per site group
        #[arg(long, default_value_t = cleanup::DEFAULT_MAX_SITES_PER_GROUP)]
        max_sites_per_group: usize,

        /// Only delete the unarchived forecasts of sites in this country
        #[arg(long)]
        country: Option<String>,

        /// Actually delete the rows, by default only do a dry run
        #[arg(long)]
        do_delete: bool,
    },
    /// Run a forecasting model for all sites
    Forecast {
        /// Model to use
        #[arg(long, short, default_value = "cos")]
        model: String,

        /// Datetime (UTC) at which to make the prediction, format: YYYY-MM-DD-HH-MM
        #[arg(long, short)]
        date: Option<String>,

        /// Round "now" down to this many minutes
        #[arg(long, conflicts_with = "date")]
        round_date_to_minutes: Option<u32>,

        /// Maximum number of sites to forecast
        #[arg(long)]
        max_sites: Option<usize>,

        /// Write the forecasts to the database instead of stdout
        #[arg(long)]
        write_to_db: bool,
    },
    /// Compare recent forecasts to the generated power
    Evaluate {
        /// How many hours to look back in time
        #[arg(long, default_value_t = evaluate::DEFAULT_HISTORY_HOURS)]
        history: i64,

        /// Horizon of the forecast values to compare, in minutes
        #[arg(long, default_value_t = evaluate::DEFAULT_HORIZON_MINUTES)]
        horizon: i32,

        /// Maximum number of sites to evaluate
        #[arg(long)]
        max_sites: Option<usize>,

        /// Resample forecasts and generation to this many minutes before comparing them
        #[arg(long, default_value_t = evaluate::DEFAULT_RESAMPLE_MINUTES)]
        resample_minutes: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match dotenv() {
        Ok(_) => eprintln!("->> Loaded variables from .env file"),
        Err(_) => eprintln!("->> Failed to load .env file"),
    }

    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Cleanup {
            date,
            days_back,
            cutoff_hour,
            batch_size,
            sleep,
            save_dir,
            archive_scope,
            min_service_level,
            max_sites_per_group,
            country,
            do_delete,
        } => {
            let config = create_cleanup_config(
                date.as_deref(),
                days_back,
                cutoff_hour,
                batch_size,
                sleep,
                do_delete,
            )?;
            let policy = create_site_policy(
                save_dir.is_some(),
                archive_scope,
                min_service_level,
                max_sites_per_group,
                country,
            )?;

            let archive = match &save_dir {
                Some(dir) if policy.archive_scope != ArchiveScope::None => {
                    Some(cleanup::Archive::open(dir).await?)
                }
                _ => None,
            };

            let store = PgStore::connect(&cli.database_url).await?;
            let summary = cleanup::run(&store, archive.as_ref(), &config, &policy).await?;
            for pass in &summary.passes {
                tracing::info!(
                    pass = pass.name,
                    batches = pass.batches,
                    forecasts = pass.forecasts_deleted,
                    values = pass.values_deleted,
                    archived_files = pass.archived_files,
                    "Pass finished"
                );
            }
            tracing::info!("Exiting.");
        }
        Commands::Forecast {
            model,
            date,
            round_date_to_minutes,
            max_sites,
            write_to_db,
        } => {
            let timestamp =
                forecast::resolve_timestamp(date.as_deref(), round_date_to_minutes, Utc::now())?;
            let model = forecast::ModelKind::from_name(&model)?.build();
            let config = forecast::ForecastConfig {
                timestamp,
                max_sites,
                write_to_db,
                forecast_version: VERSION.to_string(),
            };

            let store = PgStore::connect(&cli.database_url).await?;
            let summary = forecast::run(&store, model.as_ref(), &config).await?;
            tracing::info!(
                sites = summary.sites,
                forecasts = summary.forecasts_written,
                values = summary.values_written,
                "Done"
            );
        }
        Commands::Evaluate {
            history,
            horizon,
            max_sites,
            resample_minutes,
        } => {
            let config = evaluate::EvaluateConfig::new(
                Utc::now(),
                history,
                horizon,
                max_sites,
                resample_minutes,
            )?;

            let store = PgStore::connect(&cli.database_url).await?;
            let evaluation = evaluate::run(&store, &config).await?;
            println!("{evaluation}");
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pvsite_ops={level},sqlx=warn").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn create_cleanup_config(
    date: Option<&str>,
    days_back: u64,
    cutoff_hour: u32,
    batch_size: i64,
    sleep: f64,
    do_delete: bool,
) -> Result<cleanup::CleanupConfig> {
    if batch_size <= 0 {
        return Err(Error::InvalidConfig(format!(
            "Batch size must be positive, got {batch_size}"
        )));
    }
    if !sleep.is_finite() || sleep < 0.0 {
        return Err(Error::InvalidConfig(format!("Can't sleep for {sleep} seconds")));
    }

    let today = Utc::now().date_naive();
    let cutoff = cutoff::resolve_cutoff(date, today, days_back, cutoff_hour)?;

    Ok(cleanup::CleanupConfig {
        cutoff,
        batch_size,
        sleep: (sleep > 0.0).then(|| Duration::from_secs_f64(sleep)),
        do_delete,
    })
}

fn create_site_policy(
    has_save_dir: bool,
    archive_scope: Option<ArchiveScope>,
    min_service_level: i32,
    max_sites_per_group: usize,
    country: Option<String>,
) -> Result<cleanup::SitePolicy> {
    let archive_scope = match (archive_scope, has_save_dir) {
        (Some(ArchiveScope::None), _) => ArchiveScope::None,
        (Some(scope), false) => {
            return Err(Error::InvalidConfig(format!(
                "--archive-scope {scope} needs --save-dir"
            )))
        }
        (Some(scope), true) => scope,
        (None, true) => ArchiveScope::GroupSites,
        (None, false) => ArchiveScope::None,
    };

    Ok(cleanup::SitePolicy {
        archive_scope,
        min_service_level,
        max_sites_per_group,
        country,
    })
}
