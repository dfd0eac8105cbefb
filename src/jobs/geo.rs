//! GeoIP imports: DB-IP City Lite ranges and MaxMind GeoLite2 City blocks,
//! into PostgreSQL (upsert on `ip`) or ClickHouse (plain insert).

use std::collections::HashMap;
use std::io::Read;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::{finish, push};
use crate::cidr::{range_to_cidrs, Cidr};
use crate::config::{self, GeoBackend};
use crate::db::{col, Database, OnConflict, Row, SqlValue, TableSpec};
use crate::engine::{self, strip_non_ascii};
use crate::writer::{BatchWriter, RetryPolicy};

pub static GEO_IP_PG: TableSpec = TableSpec {
    name: "geo_ip",
    columns: &[
        col("family", "smallint"),
        col("ip", "inet"),
        col("city", "text"),
        col("stateprov", "text"),
        col("country", "text"),
        col("latitude", "double precision"),
        col("longitude", "double precision"),
        col("timezone_offset", "double precision"),
        col("timezone_name", "text"),
        col("isp_name", "text"),
    ],
    conflict: OnConflict::DoUpdate {
        keys: &["ip"],
        set: &["city", "stateprov", "country", "latitude", "longitude"],
        extra: &[],
    },
    dedupe: true,
};

pub static GEO_IP_CH: TableSpec = TableSpec {
    name: "geo_ip",
    columns: &[
        col("family", "UInt8"),
        col("cidr", "String"),
        col("cidr_len", "UInt8"),
        col("city", "String"),
        col("stateprov", "String"),
        col("country", "String"),
        col("latitude", "Float64"),
        col("longitude", "Float64"),
        col("timezone_offset", "Float64"),
        col("timezone_name", "String"),
        col("isp_name", "String"),
    ],
    conflict: OnConflict::Insert,
    dedupe: false,
};

pub const MAXMIND_LOCATIONS: &str = "GeoLite2-City-Locations-en.csv";
pub const MAXMIND_IPV4: &str = "GeoLite2-City-Blocks-IPv4.csv";
pub const MAXMIND_IPV6: &str = "GeoLite2-City-Blocks-IPv6.csv";

/// Location of one network block
#[derive(Debug, Clone, PartialEq)]
pub struct GeoEntry {
    pub cidr: Cidr,
    pub city: String,
    pub stateprov: String,
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tz_name: String,
}

impl GeoEntry {
    pub fn row(&self, backend: GeoBackend) -> Row {
        let coord = |v: Option<f64>| v.map_or(SqlValue::Null, SqlValue::Float);
        let mut row = vec![SqlValue::Int(self.cidr.family())];
        match backend {
            GeoBackend::Postgres => row.push(SqlValue::text(self.cidr.to_string())),
            GeoBackend::ClickHouse => {
                row.push(SqlValue::text(self.cidr.addr.to_string()));
                row.push(SqlValue::Int(i64::from(self.cidr.len)));
            }
        }
        row.extend([
            SqlValue::text(&self.city),
            SqlValue::text(&self.stateprov),
            SqlValue::text(&self.country),
            coord(self.latitude),
            coord(self.longitude),
            SqlValue::Float(0.0),
            SqlValue::text(&self.tz_name),
            SqlValue::text(""),
        ]);
        row
    }
}

pub fn table_for(backend: GeoBackend) -> &'static TableSpec {
    match backend {
        GeoBackend::Postgres => &GEO_IP_PG,
        GeoBackend::ClickHouse => &GEO_IP_CH,
    }
}

fn coordinate(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

/// Expands one DB-IP row into the CIDR blocks covering its range. Rows come
/// as `start,end,country,stateprov,city,lat,lon` or with a continent column
/// ahead of the country.
pub fn dbip_entries(fields: &csv::StringRecord) -> Result<Vec<GeoEntry>> {
    let offset = match fields.len() {
        7 => 2,
        n if n >= 8 => 3,
        n => bail!("expected 7 or 8 columns, found {n}"),
    };
    let get = |i: usize| fields.get(i).unwrap_or("").trim();

    let start: IpAddr = get(0).parse().with_context(|| format!("bad start address '{}'", get(0)))?;
    let end: IpAddr = get(1).parse().with_context(|| format!("bad end address '{}'", get(1)))?;

    let country = get(offset).to_string();
    let stateprov = strip_non_ascii(get(offset + 1));
    let city = strip_non_ascii(get(offset + 2));
    let latitude = coordinate(get(offset + 3));
    let longitude = coordinate(get(offset + 4));

    let entries = range_to_cidrs(start, end)?
        .into_iter()
        .map(|cidr| GeoEntry {
            cidr,
            city: city.clone(),
            stateprov: stateprov.clone(),
            country: country.clone(),
            latitude,
            longitude,
            tz_name: "UTC".to_string(),
        })
        .collect();
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub country: String,
    pub stateprov: String,
    pub city: String,
    pub tz_name: String,
}

/// GeoLite2 locations keyed by `geoname_id`
pub fn load_locations<R: Read>(reader: R) -> Result<HashMap<String, Location>> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut locations = HashMap::new();

    for record in csv.records() {
        let record = record.context("unreadable locations row")?;
        let get = |i: usize| record.get(i).unwrap_or("").to_string();
        locations.insert(
            get(0),
            Location {
                country: get(4),
                stateprov: get(7),
                city: get(10),
                tz_name: get(12),
            },
        );
    }
    Ok(locations)
}

/// GeoLite2 block row joined with its location; `None` for unknown ids
pub fn block_entry(
    fields: &csv::StringRecord,
    locations: &HashMap<String, Location>,
) -> Result<Option<GeoEntry>> {
    let cidr = Cidr::parse(fields.get(0).unwrap_or(""))?;
    let Some(location) = locations.get(fields.get(1).unwrap_or("")) else {
        return Ok(None);
    };

    Ok(Some(GeoEntry {
        cidr,
        city: location.city.clone(),
        stateprov: location.stateprov.clone(),
        country: location.country.clone(),
        latitude: fields.get(7).and_then(coordinate),
        longitude: fields.get(8).and_then(coordinate),
        tz_name: location.tz_name.clone(),
    }))
}

fn geo_writer<'a>(
    db: &'a mut (dyn Database + 'a),
    backend: GeoBackend,
    batch_size: usize,
) -> BatchWriter<'a, dyn Database + 'a> {
    BatchWriter::new(db, table_for(backend), batch_size).with_retry(RetryPolicy::Once)
}

pub async fn load_dbip<R: Read>(
    db: &mut dyn Database,
    reader: R,
    backend: GeoBackend,
    batch_size: usize,
) -> u64 {
    let mut writer = geo_writer(db, backend, batch_size);
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    for (line, record) in csv.records().enumerate() {
        let entries = record
            .context("unreadable row")
            .and_then(|record| dbip_entries(&record));
        match entries {
            Ok(entries) => {
                for entry in entries {
                    push(&mut writer, entry.row(backend)).await;
                }
            }
            Err(e) => warn!("db-ip line {}: {:#}", line + 1, e),
        }
    }
    finish(&mut writer, "geo_ip (db-ip)").await
}

pub async fn load_maxmind_blocks<R: Read>(
    db: &mut dyn Database,
    reader: R,
    locations: &HashMap<String, Location>,
    backend: GeoBackend,
    batch_size: usize,
) -> u64 {
    let mut writer = geo_writer(db, backend, batch_size);
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    for (line, record) in csv.records().enumerate() {
        let entry = record
            .context("unreadable row")
            .and_then(|record| block_entry(&record, locations).map(|e| (record, e)));
        match entry {
            Ok((_, Some(entry))) => push(&mut writer, entry.row(backend)).await,
            Ok((record, None)) => warn!(
                "prefix {} missing geoname_id '{}'",
                record.get(0).unwrap_or(""),
                record.get(1).unwrap_or("")
            ),
            Err(e) => warn!("maxmind line {}: {:#}", line + 2, e),
        }
    }
    finish(&mut writer, "geo_ip (maxmind)").await
}

/// Input files named on the command line
#[derive(Debug, Default, Clone)]
pub struct GeoFiles {
    pub dbip: Option<PathBuf>,
    pub maxmind_zip: Option<PathBuf>,
    pub maxmind_locations: Option<PathBuf>,
    pub maxmind_ipv4: Option<PathBuf>,
    pub maxmind_ipv6: Option<PathBuf>,
}

impl GeoFiles {
    /// Fills the MaxMind paths not given explicitly from an extracted archive
    fn with_archive(mut self, dir: &Path) -> Self {
        self.maxmind_locations
            .get_or_insert_with(|| dir.join(MAXMIND_LOCATIONS));
        self.maxmind_ipv4.get_or_insert_with(|| dir.join(MAXMIND_IPV4));
        self.maxmind_ipv6.get_or_insert_with(|| dir.join(MAXMIND_IPV6));
        self
    }
}

pub async fn run(
    db: &mut dyn Database,
    cfg: &config::Geo,
    backend: GeoBackend,
    files: GeoFiles,
) -> Result<()> {
    let mut files = files;
    if let Some(zip) = files.maxmind_zip.clone() {
        let dir = std::env::temp_dir().join("obmp-geolite2");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("unable to create {}", dir.display()))?;
        engine::unzip(&zip, &dir)?;
        files = files.with_archive(&dir);
    }

    if files.dbip.is_none() && files.maxmind_locations.is_none() {
        bail!("nothing to import: give a DB-IP file or MaxMind files");
    }

    if let Some(path) = &files.dbip {
        info!("importing db-ip {}", path.display());
        let batch = match backend {
            GeoBackend::Postgres => cfg.dbip_batch_size,
            GeoBackend::ClickHouse => cfg.clickhouse_batch_size,
        };
        load_dbip(db, engine::open_maybe_gzip(path)?, backend, batch).await;
    }

    if let Some(locations_path) = &files.maxmind_locations {
        let blocks: Vec<&PathBuf> = [&files.maxmind_ipv4, &files.maxmind_ipv6]
            .into_iter()
            .flatten()
            .collect();
        if blocks.is_empty() {
            bail!("missing GeoLite2-City-Blocks files, need one or both");
        }
        if let Some(missing) = blocks.iter().find(|path| !path.is_file()) {
            bail!("{} does not exist, cannot continue", missing.display());
        }

        let locations = load_locations(engine::open_maybe_gzip(locations_path)?)?;
        info!("{} maxmind locations loaded", locations.len());

        for path in blocks {
            info!("importing maxmind {}", path.display());
            load_maxmind_blocks(
                db,
                engine::open_maybe_gzip(path)?,
                &locations,
                backend,
                cfg.maxmind_batch_size,
            )
            .await;
        }
    }
    Ok(())
}
