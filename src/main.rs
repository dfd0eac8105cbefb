pub mod cidr;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod parser;
pub mod record;
pub mod schema;
pub mod walker;
pub mod whois;
pub mod writer;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command};
use config::{Config, GeoBackend};
use db::{ClickHouse, Database, Postgres};

// each subcommand is one cron job; run it e.g. hourly for rpki, daily for the rest:
// obmp-etl -c /etc/obmp/etl.toml rpki

#[tokio::main]
async fn main() -> ExitCode {
    // .env first so clap and the config loader both see it
    dotenv::dotenv().ok();
    let args = CliArgs::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "obmp_etl=debug,warn"
    } else {
        "obmp_etl=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: CliArgs) -> Result<()> {
    // Load config variables
    let mut config = Config::load(&args.config)?;
    args.apply_overrides(&mut config);

    if let Command::InitDb = args.command {
        let mut pg = Postgres::connect(&config.database).await?;
        pg.create_tables().await?;
        info!("tables ready in {}", config.database.name);
        pg.close().await?;
        return Ok(());
    }

    let mut db: Box<dyn Database> = match (&args.command, config.geo.backend) {
        (Command::Geo { .. }, GeoBackend::ClickHouse) => {
            let mut ch = ClickHouse::new(config.clickhouse.clone())?;
            ch.ping().await?;
            Box::new(ch)
        }
        _ => Box::new(Postgres::connect(&config.database).await?),
    };

    let result = run_job(db.as_mut(), &config, args.command).await;
    db.close().await?;
    result
}

async fn run_job(db: &mut dyn Database, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::WhoisAsn { asns } => {
            let client = whois::TcpWhois::new(Duration::from_secs(config.whois.timeout_seconds));
            let asns = (!asns.is_empty()).then_some(asns);
            jobs::whois_asn::run(db, &client, &config.whois, asns).await?;
        }
        Command::Routes { download, sources } => {
            jobs::routes::run(db, &config.routes, download, sources).await?;
        }
        Command::Peeringdb => jobs::peeringdb::run(db, &config.peeringdb).await?,
        Command::Rpki { .. } => jobs::rpki::run(db, &config.rpki).await?,
        command @ Command::Geo { .. } => {
            let files = command.geo_files();
            jobs::geo::run(db, &config.geo, config.geo.backend, files).await?;
        }
        Command::InitDb => {}
    }
    Ok(())
}
