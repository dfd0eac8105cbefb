//! ASN registration data from the regional WHOIS servers into `info_asn`.
//!
//! Origin ASNs seen in the RIB without an `info_asn` row are looked up at
//! every configured registry in turn; the first reply carrying an AS name
//! wins, Team Cymru fills in when none does.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{finish, push};
use crate::config;
use crate::db::{col, Database, OnConflict, Row, SqlValue, TableSpec};
use crate::engine::truncate_chars;
use crate::parser::{parse_whois_reply, Profile};
use crate::record::AttributeRecord;
use crate::walker::{ItemHandler, WalkSummary, Walker};
use crate::whois::{cymru_query, parse_cymru_reply, WhoisClient};
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
        col("raw_output", "text"),
        col("source", "text"),
    ],
    conflict: OnConflict::DoNothing { keys: &["asn"] },
    dedupe: false,
};

pub const QUERY_AS_LIST: &str = "SELECT DISTINCT recv_origin_as \
     FROM global_ip_rib r \
     LEFT JOIN info_asn i ON (i.asn = recv_origin_as) \
     WHERE i.asn is null";

const MAX_VALUE_CHARS: usize = 254;

/// AS_TRANS, documentation and private-use ranges never reach a registry
pub fn is_reserved(asn: u32) -> bool {
    matches!(asn, 0 | 23456 | 64496..=131071 | 4_200_000_000..=u32::MAX)
}

/// Origin ASNs still missing registration data, reserved ones removed
pub async fn asn_list(db: &mut dyn Database) -> Result<Vec<u32>> {
    let rows = db
        .query(QUERY_AS_LIST)
        .await
        .context("failed to load the ASN list")?;

    let mut asns: Vec<u32> = rows
        .iter()
        .filter_map(|row| row.first()?.as_deref()?.trim().parse().ok())
        .filter(|asn| !is_reserved(*asn))
        .collect();
    asns.sort_unstable();
    asns.dedup();
    Ok(asns)
}

/// Registration record for `asn`; empty when no registry knows it
pub async fn lookup(client: &dyn WhoisClient, cfg: &config::Whois, asn: u32) -> AttributeRecord {
    let query = format!("AS{asn}");

    for source in &cfg.sources {
        let reply = match client.query(&source.host, &query).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("AS{} at {}: {:#}", asn, source.host, e);
                continue;
            }
        };

        let record = parse_whois_reply(&reply, Profile::for_whois_source(&source.name), &source.name);
        if record.contains("as_name") {
            return record;
        }
    }

    match client.query(&cfg.cymru_host, &cymru_query(asn)).await {
        Ok(reply) => parse_cymru_reply(&reply),
        Err(e) => {
            debug!("AS{} at {}: {:#}", asn, cfg.cymru_host, e);
            AttributeRecord::new()
        }
    }
}

/// Row for `info_asn`; the queried ASN replaces whatever `as_number` said
pub fn asn_row(asn: u32, record: &AttributeRecord) -> Row {
    INFO_ASN
        .columns
        .iter()
        .map(|column| match column.name {
            "asn" => SqlValue::Int(i64::from(asn)),
            name => record
                .get(name)
                .map_or(SqlValue::Null, |v| SqlValue::Text(truncate_chars(v, MAX_VALUE_CHARS))),
        })
        .collect()
}

struct Lookup<'a, 'w, D: Database + ?Sized> {
    client: &'a dyn WhoisClient,
    cfg: &'a config::Whois,
    writer: BatchWriter<'w, D>,
    found: usize,
}

#[async_trait]
impl<'a, 'w, D: Database + ?Sized> ItemHandler<u32> for Lookup<'a, 'w, D> {
    async fn handle(&mut self, asn: u32) -> Result<()> {
        let record = lookup(self.client, self.cfg, asn).await;
        if !record.contains("as_name") {
            debug!("AS{} unknown to every registry", asn);
            return Ok(());
        }

        debug!("AS{} found at {}", asn, record.get("source").unwrap_or("?"));
        self.found += 1;
        push(&mut self.writer, asn_row(asn, &record)).await;
        Ok(())
    }
}

/// Looks up `asns` (or the RIB's unknown origins) and stores what is found
pub async fn run(
    db: &mut dyn Database,
    client: &dyn WhoisClient,
    cfg: &config::Whois,
    asns: Option<Vec<u32>>,
) -> Result<WalkSummary> {
    let asns = match asns {
        Some(asns) => asns.into_iter().filter(|asn| !is_reserved(*asn)).collect(),
        None => asn_list(db).await?,
    };
    info!("looking up {} ASNs", asns.len());
    if asns.is_empty() {
        warn!("no ASNs to look up");
    }

    let walker = Walker::new(cfg.requests_per_interval, Duration::from_secs(cfg.pause_seconds));
    let mut handler = Lookup {
        client,
        cfg,
        writer: BatchWriter::new(db, &INFO_ASN, cfg.batch_size),
        found: 0,
    };

    let summary = walker.walk(asns, &mut handler).await;
    finish(&mut handler.writer, "info_asn (whois)").await;
    info!(
        "whois walk done: {} processed, {} found, {} failed",
        summary.processed, handler.found, summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whois::tests::FakeWhois;
    use crate::writer::tests::RecordingDb;

    const ARIN_AS100: &str = "\
#
# ARIN WHOIS data and services are subject to the Terms of Use
#

ASNumber:       100
ASName:         FMC-CTC
ASHandle:       AS100
OrgName:        FMC Central Engineering Laboratories
OrgId:          FCEL
Address:        1205 Coleman Ave
City:           Santa Clara
StateProv:      CA
PostalCode:     95052
Country:        US
";

    fn whois_config() -> config::Whois {
        config::Whois {
            batch_size: 10,
            ..config::Whois::default()
        }
    }

    #[test]
    fn reserved_ranges() {
        for asn in [0, 23456, 64496, 65000, 65535, 131071, 4_200_000_000, u32::MAX] {
            assert!(is_reserved(asn), "{asn}");
        }
        for asn in [1, 100, 13335, 64495, 131072, 4_199_999_999] {
            assert!(!is_reserved(asn), "{asn}");
        }
    }

    #[tokio::test]
    async fn known_and_unknown_asn_give_one_upsert() {
        let client = FakeWhois::default().reply("whois.arin.net", "AS100", ARIN_AS100);
        let cfg = whois_config();
        let mut db = RecordingDb::default();

        let summary = run(&mut db, &client, &cfg, Some(vec![100, 200])).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 0);

        assert_eq!(db.batches.len(), 1);
        let (table, rows) = &db.batches[0];
        assert_eq!(*table, "info_asn");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], SqlValue::Int(100));
        assert_eq!(rows[0][1], SqlValue::text("FMC-CTC"));
        assert_eq!(rows[0][9], SqlValue::text("US"));
        assert_eq!(rows[0][11], SqlValue::text("arin"));

        // AS200 went through every registry and then Cymru
        let asked = client.asked.lock().unwrap();
        let for_200 = asked.iter().filter(|(_, q)| q.contains("AS200")).count();
        assert_eq!(for_200, cfg.sources.len() + 1);
    }

    #[tokio::test]
    async fn cymru_fills_in_when_registries_fail() {
        let client = FakeWhois::default().reply(
            "whois.cymru.com",
            " -v AS13335",
            "AS | CC | Registry | Allocated | AS Name\n13335 | US | arin | 2010-07-14 | CLOUDFLARENET - Cloudflare, Inc., US\n",
        );
        let record = lookup(&client, &whois_config(), 13335).await;
        assert_eq!(record.get("source"), Some("cymru-arin"));

        let row = asn_row(13335, &record);
        assert_eq!(row[1], SqlValue::text("CLOUDFLARENET"));
        assert_eq!(row[2], SqlValue::Null);
    }

    #[tokio::test]
    async fn asn_list_filters_reserved() {
        let mut db = RecordingDb {
            query_rows: vec![
                vec![Some("64512".into())],
                vec![Some("3356".into())],
                vec![None],
                vec![Some("174".into())],
            ],
            ..Default::default()
        };
        let asns = asn_list(&mut db).await.unwrap();
        assert_eq!(asns, vec![174, 3356]);
        assert_eq!(db.statements, vec![QUERY_AS_LIST.to_string()]);
    }

    #[test]
    fn long_values_are_truncated() {
        let mut record = AttributeRecord::new();
        record.set("as_name", "X".repeat(300));
        let row = asn_row(1, &record);
        assert_eq!(row[1], SqlValue::text("X".repeat(254)));
    }
}
