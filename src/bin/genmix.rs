//! Generation-mix CLI
//!
//! - `list`: registered balancing authorities
//! - `fetch`: print canonical points as JSON lines
//! - `ingest`: fetch one or more BAs into the SQLite store

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::time::Duration;

use genmix_lib::config::Settings;
use genmix_lib::core::orchestrator;
use genmix_lib::db::{self, SqliteSink};
use genmix_lib::models::{Market, QuerySpec};
use genmix_lib::reference::{ReferenceStore, StaticReference};
use genmix_lib::SourceFactory;

#[derive(Parser)]
#[command(name = "genmix", about = "Fetch generation mix from grid operators")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered balancing authorities
    List,
    /// Fetch one BA and print JSON lines to stdout
    Fetch {
        /// BA code, e.g. ISONE
        ba: String,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Fetch BAs and upsert into SQLite
    Ingest {
        /// BA codes; all registered BAs when omitted
        bas: Vec<String>,
        #[command(flatten)]
        query: QueryArgs,
        /// Overrides GENMIX_DATABASE_URL
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Most recent snapshot (default)
    #[arg(long, conflicts_with_all = ["yesterday", "start"])]
    latest: bool,

    /// The previous full day
    #[arg(long, conflicts_with = "start")]
    yesterday: bool,

    /// Range start, RFC 3339 or YYYY-MM-DD (UTC)
    #[arg(long, requires = "end")]
    start: Option<String>,

    /// Range end (exclusive)
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// RT5M, RT10M or RTHR
    #[arg(long)]
    market: Option<String>,

    /// Whole-call budget in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("'{}' is neither RFC 3339 nor YYYY-MM-DD", raw))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

impl QueryArgs {
    fn to_query(&self) -> Result<QuerySpec> {
        let mut query = match (&self.start, &self.end) {
            (Some(start), Some(end)) => QuerySpec::range(parse_instant(start)?, parse_instant(end)?)?,
            (None, None) if self.latest || !self.yesterday => QuerySpec::latest(),
            (None, None) => QuerySpec::yesterday(),
            _ => bail!("--start and --end must be given together"),
        };
        if let Some(market) = &self.market {
            query = query.with_market(market.parse::<Market>()?);
        }
        if let Some(secs) = self.timeout_secs {
            query = query.with_timeout(Duration::from_secs(secs));
        }
        Ok(query)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    genmix_lib::init_tracing();
    let settings = Settings::from_env();
    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            let reference = StaticReference;
            for code in SourceFactory::available() {
                let name = reference.resolve_ba(code).map(|ba| ba.name).unwrap_or_default();
                println!("{:<6} {}", code, name);
            }
        }
        Commands::Fetch { ba, query } => {
            let query = query.to_query()?;
            let factory = SourceFactory::live(settings)?;
            let points = factory.create(&ba)?.get_generation(&query).await?;

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for point in &points {
                writeln!(out, "{}", serde_json::to_string(point)?)?;
            }
            tracing::info!(ba = %ba, points = points.len(), "done");
        }
        Commands::Ingest { bas, query, database_url } => {
            let query = query.to_query()?;
            let url = database_url.unwrap_or_else(|| settings.database_url.clone());
            let pool = db::init(&url).await?;
            let sink = SqliteSink::new(pool);

            let codes: Vec<String> = if bas.is_empty() {
                SourceFactory::available().into_iter().map(String::from).collect()
            } else {
                bas
            };

            let factory = SourceFactory::live(settings)?;
            let results = orchestrator::ingest_many(&factory, &sink, &codes, &query).await;

            let mut failed = 0;
            for (code, result) in &results {
                match result {
                    Ok(outcome) => println!("{:<6} fetched {:>6}  stored {:>6}", code, outcome.fetched, outcome.stored),
                    Err(e) => {
                        failed += 1;
                        println!("{:<6} FAILED  {:#}", code, e);
                    }
                }
            }
            if failed == results.len() && failed > 0 {
                bail!("every ingest failed");
            }
        }
    }

    Ok(())
}
