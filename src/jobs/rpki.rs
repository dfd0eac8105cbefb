use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::{finish, push};
use crate::cidr::Cidr;
use crate::config;
use crate::db::{col, Database, OnConflict, Row, SqlValue, TableSpec};
use crate::engine;
use crate::schema::{Roa, RoaExport};
use crate::writer::BatchWriter;

pub static RPKI_VALIDATOR: TableSpec = TableSpec {
    name: "rpki_validator",
    columns: &[
        col("prefix", "inet"),
        col("prefix_len", "smallint"),
        col("prefix_len_max", "smallint"),
        col("origin_as", "bigint"),
    ],
    conflict: OnConflict::DoUpdate {
        keys: &["prefix", "prefix_len_max", "origin_as"],
        set: &[],
        extra: &["timestamp=now()"],
    },
    dedupe: true,
};

/// Validator export from an `http(s)://` URL or a local file
pub async fn fetch_export(cfg: &config::Rpki) -> Result<RoaExport> {
    if !(cfg.server.starts_with("http://") || cfg.server.starts_with("https://")) {
        return engine::read_json_file(Path::new(&cfg.server));
    }

    let client = engine::http_client("obmp-etl", cfg.accept_invalid_certs)?;
    let mut request = client.get(&cfg.server);
    if let Some(user) = &cfg.username {
        request = request.basic_auth(user, cfg.password.as_ref());
    }

    info!("requesting {} ...", cfg.server);
    let response = request
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("error connecting to rpki server {}", cfg.server))?;
    response
        .json::<RoaExport>()
        .await
        .with_context(|| format!("unexpected export from {}", cfg.server))
}

pub fn roa_row(roa: &Roa) -> Result<Row> {
    let asn = roa.asn().map_err(anyhow::Error::msg)?;
    let max_length = roa.max_length().map_err(anyhow::Error::msg)?;
    let cidr = Cidr::parse(roa.prefix().map_err(anyhow::Error::msg)?)?;
    if max_length < cidr.len {
        bail!("maxLength {} shorter than {}", max_length, cidr);
    }
    Ok(vec![
        SqlValue::text(cidr.to_string()),
        SqlValue::Int(i64::from(cidr.len)),
        SqlValue::Int(i64::from(max_length)),
        SqlValue::Int(asn),
    ])
}

/// Statement deleting ROAs the last loads no longer refreshed
pub fn purge_statement(interval: &str) -> Result<String> {
    let valid = !interval.trim().is_empty()
        && interval
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ');
    if !valid {
        bail!("invalid purge interval '{interval}'");
    }
    Ok(format!(
        "DELETE FROM rpki_validator WHERE timestamp < now() - interval '{}'",
        interval.trim()
    ))
}

pub async fn load(db: &mut dyn Database, cfg: &config::Rpki, export: &RoaExport) -> u64 {
    let mut writer = BatchWriter::new(db, &RPKI_VALIDATOR, cfg.batch_size);
    for roa in &export.roas {
        match roa_row(roa) {
            Ok(row) => push(&mut writer, row).await,
            Err(e) => warn!("skipping ROA {} AS{}: {:#}", roa.prefix, roa.asn, e),
        }
    }
    finish(&mut writer, "rpki_validator").await
}

pub async fn run(db: &mut dyn Database, cfg: &config::Rpki) -> Result<()> {
    let purge = purge_statement(&cfg.purge_interval)?;
    let export = fetch_export(cfg).await?;
    info!("rpki export holds {} ROAs", export.roas.len());

    let written = load(db, cfg, &export).await;
    if written == 0 {
        warn!("nothing loaded, keeping existing ROAs");
        return Ok(());
    }

    let purged = db
        .query_no_results(&purge)
        .await
        .context("failed to purge stale ROAs")?;
    info!("purged {} stale ROAs", purged);
    Ok(())
}
