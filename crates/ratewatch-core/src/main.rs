//! RateWatch CLI
//!
//! Command-line interface for the RateWatch rate service.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ratewatch::alerting::{
    EmailNotifier, InMemoryRuleStore, RuleStore, Scheduler, SmtpMailer, ThresholdCheck,
};
use ratewatch::api::HttpServer;
use ratewatch::config::LoggingConfig;
use ratewatch::fetcher::RangeFetcher;
use ratewatch::models::{CurrencyCode, Series};
use ratewatch::protocol::{self, ProtocolAdapter};
use ratewatch::resolver::{LatestValueResolver, LatestValueSource};
use ratewatch::upstream::{NbpClient, UpstreamClient};
use ratewatch::Config;

/// RateWatch - NBP rates, gold prices and threshold alerts
#[derive(Parser)]
#[command(name = "ratewatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "RATEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API, protocol listener and alert scheduler
    Serve {
        /// HTTP API port
        #[arg(long, env = "RATEWATCH_HTTP_PORT")]
        http_port: Option<u16>,

        /// Protocol listener port
        #[arg(long, env = "RATEWATCH_PROTOCOL_PORT")]
        protocol_port: Option<u16>,

        /// Do not start the alert scheduler
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Fetch a date range of a series, splitting it into upstream-sized chunks
    Fetch {
        /// Currency code or "gold"
        series: String,

        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },

    /// Show the latest published value of a series
    Latest {
        /// Currency code or "gold"
        series: String,
    },

    /// Convert an amount between currencies using today's rates
    Convert {
        /// Source currency
        from: String,

        /// Target currency
        to: String,

        /// Amount to convert
        amount: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Environment from .env, if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    init_tracing(&config.logging, cli.verbose);

    // Execute command
    let result = match cli.command {
        Commands::Serve {
            http_port,
            protocol_port,
            no_scheduler,
        } => run_serve(config, http_port, protocol_port, no_scheduler).await,
        Commands::Fetch { series, start, end } => {
            run_fetch(config, &series, start, end, cli.format).await
        }
        Commands::Latest { series } => run_latest(config, &series, cli.format).await,
        Commands::Convert { from, to, amount } => run_convert(config, &from, &to, &amount).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_series(raw: &str) -> anyhow::Result<Series> {
    if raw.eq_ignore_ascii_case("gold") {
        return Ok(Series::Gold);
    }
    Ok(Series::Currency(CurrencyCode::parse(raw)?))
}

fn upstream(config: &Config) -> anyhow::Result<Arc<dyn UpstreamClient>> {
    Ok(Arc::new(NbpClient::new(&config.upstream)?))
}

async fn run_serve(
    config: Config,
    http_port: Option<u16>,
    protocol_port: Option<u16>,
    no_scheduler: bool,
) -> anyhow::Result<()> {
    let client = upstream(&config)?;
    let fetcher = RangeFetcher::new(client.clone(), config.upstream.max_range_days)?;
    let resolver = Arc::new(LatestValueResolver::new(
        client.clone(),
        config.upstream.lookback_days,
    ));
    let rules: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new());

    let mailer = SmtpMailer::new(&config.smtp).context("failed to set up SMTP transport")?;
    let notifier = Arc::new(EmailNotifier::from_config(
        mailer,
        &config.currencies,
        &config.smtp,
    ));
    let checks = Arc::new(ThresholdCheck::new(rules.clone(), resolver, notifier));

    let scheduler = Scheduler::new(
        checks.clone(),
        Duration::from_secs(config.scheduler.check_interval_seconds),
    )?;

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let http_addr = format!(
        "{}:{}",
        config.server.host,
        http_port.unwrap_or(config.server.http_port)
    );
    let server = HttpServer::new(fetcher, rules, checks, config.currencies.clone());
    let token = shutdown.clone();
    tasks.spawn(async move { server.serve(&http_addr, token).await });

    if config.protocol.enabled {
        let anchor = CurrencyCode::parse(&config.currencies.anchor)
            .context("currencies.anchor must be a currency code")?;
        let adapter = Arc::new(ProtocolAdapter::new(client, anchor));
        let protocol_addr = format!(
            "{}:{}",
            config.protocol.host,
            protocol_port.unwrap_or(config.protocol.port)
        );
        let token = shutdown.clone();
        tasks.spawn(async move { protocol::serve(adapter, &protocol_addr, token).await });
    }

    if config.scheduler.enabled && !no_scheduler {
        scheduler.start();
    }

    info!("RateWatch started, press Ctrl+C to stop");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => signal.map_err(anyhow::Error::from),
        Some(joined) = tasks.join_next() => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        },
    };

    info!("Shutting down...");
    scheduler.stop();
    shutdown.cancel();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Err(e)) => error!(error = %e, "Listener exited with error"),
            Err(e) => error!(error = %e, "Listener task failed"),
            Ok(Ok(())) => {}
        }
    }

    outcome
}

async fn run_fetch(
    config: Config,
    series: &str,
    start: NaiveDate,
    end: NaiveDate,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let series = parse_series(series)?;
    let fetcher = RangeFetcher::new(upstream(&config)?, config.upstream.max_range_days)?;

    let fetched = fetcher.fetch(&series, start, end).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&fetched)?),
        OutputFormat::Text => {
            for point in &fetched.points {
                println!("{}  {}", point.date, point.value);
            }
            for gap in &fetched.missing {
                println!("missing  {} .. {}", gap.start, gap.end);
            }
        }
    }

    if !fetched.is_complete() {
        anyhow::bail!("{} chunk(s) could not be fetched", fetched.missing.len());
    }
    Ok(())
}

async fn run_latest(config: Config, series: &str, format: OutputFormat) -> anyhow::Result<()> {
    let series = parse_series(series)?;
    let resolver = LatestValueResolver::new(upstream(&config)?, config.upstream.lookback_days);

    let Some(latest) = resolver.latest(&series).await else {
        anyhow::bail!("no recent value published for {series}");
    };

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "series_key": series.key(),
                "date": latest.date,
                "value": latest.value.to_string(),
            })
        ),
        OutputFormat::Text => println!("{series}  {}  {}", latest.date, latest.value),
    }
    Ok(())
}

async fn run_convert(config: Config, from: &str, to: &str, amount: &str) -> anyhow::Result<()> {
    let anchor = CurrencyCode::parse(&config.currencies.anchor)?;
    let adapter = ProtocolAdapter::new(upstream(&config)?, anchor);

    let envelope = protocol::request_envelope(
        "convert_currency",
        &[("from_currency", from), ("to_currency", to), ("amount", amount)],
    );

    let reply = adapter.handle(&envelope).await;
    println!("{}", reply.to_xml());

    if reply.is_fault() {
        anyhow::bail!("conversion failed");
    }
    Ok(())
}
