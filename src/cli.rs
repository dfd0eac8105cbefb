//! Command line for the loaders. Connection flags override the config file
//! and the `PG*` environment.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, GeoBackend};
use crate::jobs::geo::GeoFiles;
use crate::jobs::routes::{parse_source_arg, DumpFile};

/// Batch loaders for the BGP routing-registry warehouse
#[derive(Parser, Debug)]
#[command(
    name = "obmp-etl",
    version,
    about = "Batch loaders for the BGP routing-registry warehouse",
    after_help = "EXAMPLES:\n    \
        obmp-etl init-db\n    \
        obmp-etl whois-asn --asn 13335 --asn 3356\n    \
        obmp-etl routes --download\n    \
        obmp-etl rpki --server https://rpki.example.net/api/export.json\n    \
        obmp-etl geo --backend clickhouse --dbip-file dbip-city-lite.csv.gz"
)]
pub struct CliArgs {
    /// Configuration file (.toml, .yaml or .yml)
    #[arg(short, long, env = "OBMP_CONFIG", default_value = "config.toml", value_name = "FILE")]
    pub config: PathBuf,

    /// PostgreSQL host
    #[arg(long, value_name = "HOST")]
    pub db_host: Option<String>,

    /// PostgreSQL port
    #[arg(long, value_name = "PORT")]
    pub db_port: Option<u16>,

    /// PostgreSQL user
    #[arg(long, value_name = "USER")]
    pub db_user: Option<String>,

    /// PostgreSQL password
    #[arg(long, value_name = "PASSWORD")]
    pub db_password: Option<String>,

    /// PostgreSQL database name
    #[arg(long, value_name = "NAME")]
    pub db_name: Option<String>,

    /// Debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Look up origin ASNs missing from info_asn at the WHOIS registries
    WhoisAsn {
        /// Look up these ASNs instead of the RIB's unknown origins
        #[arg(long = "asn", value_name = "ASN")]
        asns: Vec<u32>,
    },

    /// Load route objects from IRR database dumps into info_route
    Routes {
        /// Download the configured dumps first
        #[arg(long)]
        download: bool,

        /// Load this dump instead of the configured ones (repeatable)
        #[arg(long = "source", value_name = "NAME=PATH", value_parser = parse_source_arg)]
        sources: Vec<DumpFile>,
    },

    /// Sync networks and organisations from PeeringDB into info_asn
    Peeringdb,

    /// Load validated ROAs from an RPKI validator export
    Rpki {
        /// export.json URL or local path
        #[arg(long, value_name = "URL|PATH")]
        server: Option<String>,

        #[arg(long, value_name = "USER")]
        rpki_user: Option<String>,

        #[arg(long, value_name = "PASSWORD")]
        rpki_password: Option<String>,
    },

    /// Import DB-IP or MaxMind GeoLite2 city data into geo_ip
    Geo {
        /// postgres or clickhouse
        #[arg(long, value_parser = parse_backend)]
        backend: Option<GeoBackend>,

        /// DB-IP City Lite CSV (plain or .gz)
        #[arg(long, value_name = "FILE")]
        dbip_file: Option<PathBuf>,

        /// GeoLite2-City-CSV zip archive
        #[arg(long, value_name = "FILE")]
        maxmind_zip: Option<PathBuf>,

        /// GeoLite2-City-Locations-en.csv
        #[arg(long, value_name = "FILE")]
        maxmind_loc_file: Option<PathBuf>,

        /// GeoLite2-City-Blocks-IPv4.csv
        #[arg(long, value_name = "FILE")]
        maxmind_ipv4_file: Option<PathBuf>,

        /// GeoLite2-City-Blocks-IPv6.csv
        #[arg(long, value_name = "FILE")]
        maxmind_ipv6_file: Option<PathBuf>,
    },

    /// Create the warehouse tables in PostgreSQL when missing
    InitDb,
}

fn parse_backend(value: &str) -> Result<GeoBackend, String> {
    match value.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" | "psql" => Ok(GeoBackend::Postgres),
        "clickhouse" | "ch" => Ok(GeoBackend::ClickHouse),
        other => Err(format!("unknown backend '{other}', expected postgres or clickhouse")),
    }
}

impl CliArgs {
    pub fn apply_overrides(&self, config: &mut Config) {
        let db = &mut config.database;
        if let Some(host) = &self.db_host {
            db.host = host.clone();
        }
        if let Some(port) = self.db_port {
            db.port = port;
        }
        if let Some(user) = &self.db_user {
            db.username = user.clone();
        }
        if let Some(password) = &self.db_password {
            db.password = password.clone();
        }
        if let Some(name) = &self.db_name {
            db.name = name.clone();
        }

        match &self.command {
            Command::Rpki {
                server,
                rpki_user,
                rpki_password,
            } => {
                let rpki = &mut config.rpki;
                if let Some(server) = server {
                    rpki.server = server.clone();
                }
                if rpki_user.is_some() {
                    rpki.username = rpki_user.clone();
                }
                if rpki_password.is_some() {
                    rpki.password = rpki_password.clone();
                }
            }
            Command::Geo {
                backend: Some(backend),
                ..
            } => config.geo.backend = *backend,
            _ => {}
        }
    }
}

impl Command {
    /// Input files of a `geo` invocation
    pub fn geo_files(&self) -> GeoFiles {
        match self {
            Command::Geo {
                dbip_file,
                maxmind_zip,
                maxmind_loc_file,
                maxmind_ipv4_file,
                maxmind_ipv6_file,
                ..
            } => GeoFiles {
                dbip: dbip_file.clone(),
                maxmind_zip: maxmind_zip.clone(),
                maxmind_locations: maxmind_loc_file.clone(),
                maxmind_ipv4: maxmind_ipv4_file.clone(),
                maxmind_ipv6: maxmind_ipv6_file.clone(),
            },
            _ => GeoFiles::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_override_config() {
        let args = CliArgs::try_parse_from([
            "obmp-etl",
            "--db-host",
            "pg.example.net",
            "--db-port",
            "6432",
            "peeringdb",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.database.host, "pg.example.net");
        assert_eq!(config.database.port, 6432);
        assert_eq!(config.database.username, "openbmp");
        assert!(matches!(args.command, Command::Peeringdb));
    }

    #[test]
    fn repeated_asn_and_source_flags() {
        let args =
            CliArgs::try_parse_from(["obmp-etl", "whois-asn", "--asn", "100", "--asn", "200"]).unwrap();
        match args.command {
            Command::WhoisAsn { asns } => assert_eq!(asns, vec![100, 200]),
            other => panic!("unexpected {other:?}"),
        }

        let args = CliArgs::try_parse_from([
            "obmp-etl",
            "routes",
            "--source",
            "radb=/tmp/radb.db.gz",
            "--download",
        ])
        .unwrap();
        match args.command {
            Command::Routes { download, sources } => {
                assert!(download);
                assert_eq!(sources[0].source, "radb");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(CliArgs::try_parse_from(["obmp-etl", "routes", "--source", "radb"]).is_err());
    }

    #[test]
    fn rpki_and_geo_overrides() {
        let args = CliArgs::try_parse_from([
            "obmp-etl",
            "rpki",
            "--server",
            "/srv/export.json",
            "--rpki-user",
            "ro",
        ])
        .unwrap();
        let mut config = Config::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.rpki.server, "/srv/export.json");
        assert_eq!(config.rpki.username.as_deref(), Some("ro"));
        assert_eq!(config.rpki.password, None);

        let args = CliArgs::try_parse_from([
            "obmp-etl",
            "geo",
            "--backend",
            "clickhouse",
            "--maxmind-zip",
            "GeoLite2-City-CSV.zip",
        ])
        .unwrap();
        args.apply_overrides(&mut config);
        assert_eq!(config.geo.backend, GeoBackend::ClickHouse);
        let files = args.command.geo_files();
        assert_eq!(files.maxmind_zip, Some(PathBuf::from("GeoLite2-City-CSV.zip")));
        assert_eq!(files.dbip, None);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(CliArgs::try_parse_from(["obmp-etl", "geo", "--backend", "mysql"]).is_err());
    }

    #[test]
    fn subcommand_is_required() {
        assert!(CliArgs::try_parse_from(["obmp-etl"]).is_err());
    }
}
