use std::path::PathBuf;

use anyhow::Context;
use chrono::{Months, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use occupancy_analysis::cache::FetchCache;
use occupancy_analysis::config::Config;
use occupancy_analysis::ecri::{StartColumn, DEFAULT_NOTIFICATION_MONTHS};
use occupancy_analysis::models::{MoveOutRecord, OccupancyRecord};
use occupancy_analysis::moveouts::DateWindow;
use occupancy_analysis::source::DataSource;
use occupancy_analysis::{export, moveouts, report, survival, DashboardError};

#[derive(Parser)]
#[command(name = "occupancy-analysis")]
#[command(about = "Move-out and rent-increase retention analysis for storage facilities", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Survival of tenants after a rent increase, by model
    Survival {
        /// First notification date to include (default: six months before end)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last notification date to include (default: latest notification)
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long, value_enum, default_value_t = StartColumn::NotificationDate)]
        start_column: StartColumn,
        #[arg(long, default_value_t = survival::DEFAULT_HORIZON_DAYS)]
        horizon: u32,
        /// Write the survival curves as CSV
        #[arg(long)]
        export: Option<PathBuf>,
        /// Write the filtered ECRI rows as CSV
        #[arg(long)]
        export_rows: Option<PathBuf>,
    },
    /// Monthly move-out rates, heatmap and Y/Y change by site
    MoveOuts {
        /// Window start (default: one month before end)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Window end (default: latest month in the data)
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long, default_value_t = 30)]
        bins: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Write the per-site monthly rates as CSV
        #[arg(long)]
        export: Option<PathBuf>,
        /// Write the Y/Y deltas as CSV
        #[arg(long)]
        export_yoy: Option<PathBuf>,
        /// Write the year × month heatmap as long-form CSV
        #[arg(long)]
        export_heatmap: Option<PathBuf>,
    },
    /// List facilities
    Facilities {
        #[arg(long)]
        region: Option<String>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long, default_value_t = survival::DEFAULT_HORIZON_DAYS)]
        horizon: u32,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        /// Leave out the ECRI retention section
        #[arg(long)]
        skip_ecri: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(config: &Config) -> anyhow::Result<DataSource> {
    let pool = match &config.database_url {
        Some(url) => Some(
            PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .context("failed to connect to Postgres")?,
        ),
        None => None,
    };
    let blobs = config.blob_store().ok();
    Ok(DataSource::new(
        pool,
        blobs,
        FetchCache::with_ttl(64, config.cache_ttl),
        config.series_start,
    ))
}

/// Defaults to the `months_back` months ending at the latest date in the data.
fn resolve_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    latest: NaiveDate,
    months_back: u32,
) -> anyhow::Result<DateWindow> {
    let end = end.unwrap_or(latest);
    let start = match start {
        Some(start) => start,
        None => end
            .checked_sub_months(Months::new(months_back))
            .context("invalid default window start")?,
    };
    anyhow::ensure!(start <= end, "window start {start} is after end {end}");
    Ok(DateWindow::new(start, end))
}

async fn move_out_series(
    source: &DataSource,
    region: Option<&str>,
) -> anyhow::Result<(Vec<OccupancyRecord>, Vec<MoveOutRecord>)> {
    let occupants = source.occupants().await?;
    let move_outs = source.move_outs().await?;
    let (occupants, move_outs) = (occupants.as_ref().clone(), move_outs.as_ref().clone());

    match region {
        Some(region) => {
            let sites = source.region_sites(region).await?;
            Ok((
                moveouts::filter_sites(occupants, &sites, |r| r.site_code.as_str()),
                moveouts::filter_sites(move_outs, &sites, |r| r.site_code.as_str()),
            ))
        }
        None => Ok((occupants, move_outs)),
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Survival {
            start,
            end,
            start_column,
            horizon,
            export: export_path,
            export_rows,
        } => {
            let source = DataSource::new(
                None,
                Some(config.blob_store()?),
                FetchCache::with_ttl(8, config.cache_ttl),
                config.series_start,
            );
            let table = source
                .ecri_table(&config.ecri_bucket, &config.ecri_key)
                .await
                .context("Error retrieving ECRI data.")?;
            let Some((_, latest)) = table.notification_range() else {
                return Err(DashboardError::EmptyResult("ECRI notifications".to_string()).into());
            };
            let window = resolve_window(start, end, latest, DEFAULT_NOTIFICATION_MONTHS)?;
            let filtered = table.filter_notifications(window.start, window.end);
            if filtered.is_empty() {
                return Err(DashboardError::EmptyResult(format!(
                    "notifications between {} and {}",
                    window.start, window.end
                ))
                .into());
            }

            let pending = table.pending_summary();
            println!(
                "ECRIs pending: {}  Increase $ pending: ${:.0}",
                pending.pending, pending.increase_amount
            );

            let now = Utc::now().naive_utc();
            let events = filtered.started_events(start_column, now)?;
            let points = survival::estimate_survival_at(&events, horizon, now)?;
            println!("Survival by model from 0 - {horizon} days:");
            let mut current_model = None;
            for point in &points {
                if current_model != Some(point.group.as_str()) {
                    println!("{}", point.group);
                    current_model = Some(point.group.as_str());
                }
                println!("  day {:>3}  {:.3}", point.day_offset, point.survival_probability);
            }

            if let Some(path) = export_path {
                export::save_records(&path, &points)?;
                println!("Survival curves written to {}.", path.display());
            }
            if let Some(path) = export_rows {
                export::save_ecri_table(&path, &filtered)?;
                println!(
                    "ECRIs {} to {} written to {}.",
                    window.start,
                    window.end,
                    path.display()
                );
            }
        }
        Commands::MoveOuts {
            start,
            end,
            region,
            bins,
            limit,
            export: export_path,
            export_yoy,
            export_heatmap,
        } => {
            config.require_database_url()?;
            let source = connect(&config).await?;
            let (occupants, move_outs) = move_out_series(&source, region.as_deref()).await?;
            let Some(latest) = occupants.iter().map(|r| r.date).max() else {
                return Err(DashboardError::EmptyResult("occupancy".to_string()).into());
            };
            let window = resolve_window(start, end, latest, 1)?;
            let analysis = moveouts::aggregate_move_outs(&occupants, &move_outs, window);

            let mut heatmap = String::new();
            report::render_heatmap(&mut heatmap, &analysis.heatmap);
            println!("% Moved Out by Year and Month");
            print!("{heatmap}");

            if analysis.yoy.is_empty() {
                println!("No sites with move-out data in both {} to {} and the prior year.", window.start, window.end);
            } else {
                println!("Y/Y change in % moved out ({} to {}):", window.start, window.end);
                for delta in analysis.yoy.iter().take(limit) {
                    println!(
                        "- {} {:.2} vs {:.2} ({:+.2} pts)",
                        delta.site_code, delta.rate_current, delta.rate_prior_year, delta.delta
                    );
                }
                println!("Distribution:");
                for bin in moveouts::yoy_histogram(&analysis.yoy, bins) {
                    println!("  {:+8.2} {}", bin.yoy_change, "#".repeat(bin.count));
                }
            }

            if let Some(path) = export_path {
                export::save_records(&path, &analysis.joined)?;
                println!("Monthly rates written to {}.", path.display());
            }
            if let Some(path) = export_yoy {
                export::save_records(&path, &analysis.yoy)?;
                println!("Y/Y changes written to {}.", path.display());
            }
            if let Some(path) = export_heatmap {
                export::save_records(&path, &analysis.heatmap.melt())?;
                println!("Heatmap written to {}.", path.display());
            }
        }
        Commands::Facilities { region } => {
            config.require_database_url()?;
            let source = connect(&config).await?;
            let facilities = source.facilities().await?;
            let mut shown = 0usize;
            for facility in facilities.iter().filter(|f| {
                region.as_deref().map_or(true, |wanted| {
                    f.region.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(wanted))
                })
            }) {
                shown += 1;
                println!(
                    "- {} ({}, {}) acquired {}{}",
                    facility.site_code,
                    facility.region.as_deref().unwrap_or("no region"),
                    facility.fund.as_deref().unwrap_or("no fund"),
                    facility
                        .acq_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    if facility.same_store { ", same store" } else { "" }
                );
            }
            if shown == 0 {
                println!("No facilities found.");
            }
        }
        Commands::Report {
            start,
            end,
            region,
            horizon,
            out,
            skip_ecri,
        } => {
            config.require_database_url()?;
            let source = connect(&config).await?;
            let (occupants, move_outs) = move_out_series(&source, region.as_deref()).await?;
            let latest = occupants
                .iter()
                .map(|r| r.date)
                .max()
                .unwrap_or_else(|| Utc::now().date_naive());
            let window = resolve_window(start, end, latest, 1)?;
            let analysis = moveouts::aggregate_move_outs(&occupants, &move_outs, window);
            let histogram = moveouts::yoy_histogram(&analysis.yoy, 30);

            let ecri = if skip_ecri {
                None
            } else {
                let table = source
                    .ecri_table(&config.ecri_bucket, &config.ecri_key)
                    .await
                    .context("Error retrieving ECRI data.")?;
                Some(report::ecri_section(&table, horizon, Utc::now().naive_utc())?)
            };

            let markdown = report::build_report(&report::ReportInput {
                scope: region.as_deref(),
                generated_on: Utc::now().date_naive(),
                window,
                heatmap: &analysis.heatmap,
                yoy: &analysis.yoy,
                histogram: &histogram,
                ecri: ecri.as_ref(),
            });
            std::fs::write(&out, markdown)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::from_env()?;

    match run(cli, config).await {
        Err(err) => match err.downcast_ref::<DashboardError>() {
            Some(dashboard_err) if dashboard_err.is_empty_result() => {
                println!("No data: {dashboard_err}.");
                Ok(())
            }
            _ => Err(err),
        },
        Ok(()) => Ok(()),
    }
}
