use std::collections::HashMap;

use anyhow::Result;
use tracing::{info, warn};

use super::{finish, push};
use crate::config;
use crate::db::{col, Database, OnConflict, Row, SqlValue, TableSpec};
use crate::engine::{self, truncate_chars};
use crate::schema::{Envelope, Net, Org};
use crate::writer::BatchWriter;

pub static INFO_ASN: TableSpec = TableSpec {
    name: "info_asn",
    columns: &[
        col("asn", "bigint"),
        col("as_name", "text"),
        col("org_id", "text"),
        col("org_name", "text"),
        col("remarks", "text"),
        col("address", "text"),
        col("city", "text"),
        col("state_prov", "text"),
        col("postal_code", "text"),
        col("country", "text"),
        col("source", "text"),
    ],
    conflict: OnConflict::DoUpdate {
        keys: &["asn"],
        set: &[
            "as_name",
            "org_id",
            "org_name",
            "remarks",
            "address",
            "city",
            "state_prov",
            "postal_code",
            "country",
            "source",
        ],
        extra: &[],
    },
    dedupe: true,
};

const MAX_FIELD_CHARS: usize = 240;
const MAX_NOTES_CHARS: usize = 1500;
const MAX_POSTAL_CHARS: usize = 200;

fn field(value: &str) -> String {
    truncate_chars(value, MAX_FIELD_CHARS)
}

fn join_set(parts: &[&str], sep: &str) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(sep)
}

/// Route server and looking glass first, then the free-form notes
pub fn remarks(net: &Net) -> String {
    let mut lines = Vec::new();
    let route_server = field(&net.route_server);
    let looking_glass = field(&net.looking_glass);

    if route_server.len() > 1 {
        lines.push(format!("route_server: {route_server}"));
    }
    if looking_glass.len() > 1 {
        lines.push(format!("looking_glass: {looking_glass}"));
    }
    let notes = truncate_chars(&net.notes, MAX_NOTES_CHARS);
    if !notes.is_empty() {
        lines.push(notes);
    }
    lines.join("\n")
}

/// `info_asn` row for a network; `None` when its organisation is unknown
pub fn net_row(net: &Net, orgs: &HashMap<i64, Org>) -> Option<Row> {
    let org = orgs.get(&net.org_id)?;
    let as_name = field(&net.name);
    let org_name = field(&join_set(&[as_name.as_str(), net.aka.trim()], " - "));
    let address = field(&join_set(&[org.address1.trim(), org.address2.trim()], ", "));

    Some(vec![
        SqlValue::Int(net.asn),
        SqlValue::Text(as_name),
        SqlValue::text(net.org_id.to_string()),
        SqlValue::Text(org_name),
        SqlValue::Text(remarks(net)),
        SqlValue::Text(address),
        SqlValue::Text(field(&org.city)),
        SqlValue::Text(field(&org.state)),
        SqlValue::Text(truncate_chars(&org.zipcode, MAX_POSTAL_CHARS)),
        SqlValue::Text(field(&org.country)),
        SqlValue::text("peeringdb"),
    ])
}

/// Both listings are fetched together; either failing aborts the sync
pub async fn fetch(cfg: &config::PeeringDb) -> Result<(Vec<Net>, HashMap<i64, Org>)> {
    let client = engine::http_client(&cfg.user_agent, false)?;
    let (nets, orgs) = futures::try_join!(
        engine::fetch_json::<Envelope<Net>>(&client, &cfg.net_url),
        engine::fetch_json::<Envelope<Org>>(&client, &cfg.org_url),
    )?;

    let orgs = orgs.data.into_iter().map(|org| (org.id, org)).collect();
    Ok((nets.data, orgs))
}

/// Writes every network whose organisation is known; returns rows written
pub async fn load(
    db: &mut dyn Database,
    cfg: &config::PeeringDb,
    nets: &[Net],
    orgs: &HashMap<i64, Org>,
) -> u64 {
    let mut writer = BatchWriter::new(db, &INFO_ASN, cfg.batch_size);
    let mut skipped = 0;

    for net in nets {
        match net_row(net, orgs) {
            Some(row) => push(&mut writer, row).await,
            None => {
                warn!("AS{}: org {} unknown, skipping", net.asn, net.org_id);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        info!("{} networks skipped for unknown organisations", skipped);
    }
    finish(&mut writer, "info_asn (peeringdb)").await
}

pub async fn run(db: &mut dyn Database, cfg: &config::PeeringDb) -> Result<()> {
    let (nets, orgs) = fetch(cfg).await?;
    info!("peeringdb: {} networks, {} organisations", nets.len(), orgs.len());
    load(db, cfg, &nets, &orgs).await;
    Ok(())
}
