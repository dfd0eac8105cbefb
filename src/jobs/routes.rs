use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{finish, push};
use crate::cidr::Cidr;
use crate::config;
use crate::db::{col, Database, OnConflict, Row, SqlValue, TableSpec};
use crate::engine::{self, truncate_chars};
use crate::parser::{profile::RPSL_ROUTE, RecordParser};
use crate::record::AttributeRecord;
use crate::walker::{ItemHandler, WalkSummary, Walker};
use crate::writer::BatchWriter;

pub static INFO_ROUTE: TableSpec = TableSpec {
    name: "info_route",
    columns: &[
        col("prefix", "inet"),
        col("prefix_len", "smallint"),
        col("origin_as", "bigint"),
        col("descr", "text"),
        col("source", "text"),
    ],
    conflict: OnConflict::DoUpdate {
        keys: &["prefix", "prefix_len", "origin_as"],
        set: &["descr", "source"],
        extra: &["timestamp=now()"],
    },
    dedupe: true,
};

const MAX_DESCR_CHARS: usize = 254;

/// One registry dump on disk
#[derive(Debug, Clone)]
pub struct DumpFile {
    pub source: String,
    pub path: PathBuf,
}

impl fmt::Display for DumpFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.source, self.path.display())
    }
}

/// Relative file names live under `tmp_dir`
pub fn dump_files(cfg: &config::Routes) -> Vec<DumpFile> {
    cfg.sources
        .iter()
        .map(|source| DumpFile {
            source: source.name.clone(),
            path: Path::new(&cfg.tmp_dir).join(&source.file),
        })
        .collect()
}

/// `NAME=PATH` as given on the command line
pub fn parse_source_arg(arg: &str) -> Result<DumpFile, String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok(DumpFile {
            source: name.to_string(),
            path: PathBuf::from(path),
        }),
        _ => Err(format!("expected NAME=PATH, got '{arg}'")),
    }
}

/// `info_route` row of a finalized route object; `None` when a value does
/// not fit its column
pub fn route_row(record: &AttributeRecord) -> Option<Row> {
    let prefix = record.get("prefix")?;
    let prefix_len = record.get("prefix_len")?;
    let cidr = Cidr::parse(&format!("{prefix}/{prefix_len}")).ok()?;
    let origin_as: i64 = record.get("origin_as")?.parse().ok()?;

    Some(vec![
        SqlValue::text(cidr.to_string()),
        SqlValue::Int(i64::from(cidr.len)),
        SqlValue::Int(origin_as),
        SqlValue::Text(truncate_chars(record.get("descr").unwrap_or(""), MAX_DESCR_CHARS)),
        SqlValue::opt_text(record.get("source")),
    ])
}

/// Streams one dump into the writer; returns the number of route objects
pub async fn load_dump<D, I>(writer: &mut BatchWriter<'_, D>, lines: I, source: &str) -> usize
where
    D: Database + ?Sized,
    I: Iterator,
    I::Item: AsRef<str>,
{
    let mut routes = 0;
    for record in RecordParser::new(lines, &RPSL_ROUTE, source) {
        match route_row(&record) {
            Some(row) => {
                routes += 1;
                push(writer, row).await;
            }
            None => warn!("{}: unusable route object {:?}", source, record.get("prefix")),
        }
    }
    routes
}

struct DumpLoader<'w, D: Database + ?Sized> {
    writer: BatchWriter<'w, D>,
}

#[async_trait]
impl<'w, D: Database + ?Sized> ItemHandler<DumpFile> for DumpLoader<'w, D> {
    async fn handle(&mut self, dump: DumpFile) -> Result<()> {
        let lines = engine::read_lines(&dump.path)?;
        info!("loading {}", dump);
        let routes = load_dump(&mut self.writer, lines, &dump.source).await;
        self.writer.flush(true).await?;
        info!("{}: {} route objects", dump, routes);
        Ok(())
    }
}

/// Fetches every dump that has a URL into `tmp_dir`
pub async fn download(cfg: &config::Routes) -> Result<()> {
    tokio::fs::create_dir_all(&cfg.tmp_dir)
        .await
        .with_context(|| format!("unable to create {}", cfg.tmp_dir))?;

    let downloads: Vec<(String, PathBuf)> = cfg
        .sources
        .iter()
        .filter_map(|source| {
            let url = source.url.clone()?;
            Some((url, Path::new(&cfg.tmp_dir).join(&source.file)))
        })
        .collect();

    let total = downloads.len();
    let failed =
        engine::bulk_url_download(downloads, &cfg.user_agent, cfg.download_concurrency).await;
    if failed > 0 {
        warn!("{} of {} downloads failed", failed, total);
    }
    Ok(())
}

pub async fn run(
    db: &mut dyn Database,
    cfg: &config::Routes,
    fetch: bool,
    dumps: Vec<DumpFile>,
) -> Result<WalkSummary> {
    if fetch {
        download(cfg).await?;
    }
    let dumps = if dumps.is_empty() { dump_files(cfg) } else { dumps };

    let mut loader = DumpLoader {
        writer: BatchWriter::new(db, &INFO_ROUTE, cfg.batch_size),
    };
    let summary = Walker::new(usize::MAX, Duration::ZERO)
        .walk(dumps, &mut loader)
        .await;
    finish(&mut loader.writer, "info_route").await;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::tests::RecordingDb;
    use std::io::Write;

    const DUMP: &str = "\
% RADb dump

route:      192.0.2.0/24
descr:      Example net
            second line
origin:     AS64500
source:     RADB

route6:     2001:db8::/32
origin:     AS1.1
mnt-by:     MAINT-EXAMPLE

route:      198.51.100.0/24
descr:      no origin here

route:      not-a-prefix/24
origin:     AS64501
";

    #[test]
    fn rows_carry_full_cidr() {
        let records: Vec<_> = RecordParser::new(DUMP.lines(), &RPSL_ROUTE, "radb").collect();
        assert_eq!(records.len(), 3);
        let rows: Vec<Row> = records.iter().filter_map(route_row).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            vec![
                SqlValue::text("192.0.2.0/24"),
                SqlValue::Int(24),
                SqlValue::Int(64500),
                SqlValue::text("Example net\nsecond line"),
                SqlValue::text("radb"),
            ]
        );
        assert_eq!(rows[1][0], SqlValue::text("2001:db8::/32"));
        assert_eq!(rows[1][2], SqlValue::Int(65537));
        assert_eq!(rows[1][3], SqlValue::text(""));
    }

    #[test]
    fn source_argument() {
        let dump = parse_source_arg("radb=/data/radb.db.gz").unwrap();
        assert_eq!(dump.source, "radb");
        assert_eq!(dump.path, PathBuf::from("/data/radb.db.gz"));
        assert!(parse_source_arg("radb").is_err());
        assert!(parse_source_arg("=x").is_err());
    }

    #[tokio::test]
    async fn dumps_are_loaded_and_missing_files_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radb.db");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(DUMP.as_bytes())
            .unwrap();

        let cfg = config::Routes {
            batch_size: 1,
            ..config::Routes::default()
        };
        let dumps = vec![
            DumpFile { source: "radb".into(), path },
            DumpFile { source: "ripe".into(), path: dir.path().join("missing.db.gz") },
        ];

        let mut db = RecordingDb::default();
        let summary = run(&mut db, &cfg, false, dumps).await.unwrap();
        assert_eq!(summary, WalkSummary { processed: 2, failed: 1 });
        assert_eq!(db.batches.len(), 2);
        assert!(db.batches.iter().all(|(table, _)| *table == "info_route"));
    }
}
