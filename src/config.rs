use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub clickhouse: ClickHouse,
    pub whois: Whois,
    pub routes: Routes,
    pub peeringdb: PeeringDb,
    pub rpki: Rpki,
    pub geo: Geo,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Database {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "openbmp".to_string(),
            username: "openbmp".to_string(),
            password: "openbmp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClickHouse {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: f64,
}

impl Default for ClickHouse {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: 120.0,
        }
    }
}

/// A WHOIS server tried in list order
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WhoisSource {
    pub name: String,
    pub host: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Whois {
    pub sources: Vec<WhoisSource>,
    pub cymru_host: String,
    pub requests_per_interval: usize,
    pub pause_seconds: u64,
    pub timeout_seconds: u64,
    pub batch_size: usize,
}

impl Default for Whois {
    fn default() -> Self {
        let sources = [
            ("arin", "whois.arin.net"),
            ("ripe", "whois.ripe.net"),
            ("apnic", "whois.apnic.net"),
            ("afrinic", "whois.afrinic.net"),
            ("lacnic", "whois.lacnic.net"),
            ("ntt", "rr.ntt.net"),
        ]
        .into_iter()
        .map(|(name, host)| WhoisSource {
            name: name.to_string(),
            host: host.to_string(),
        })
        .collect();

        Self {
            sources,
            cymru_host: "whois.cymru.com".to_string(),
            requests_per_interval: 100,
            pause_seconds: 5,
            timeout_seconds: 30,
            batch_size: 100,
        }
    }
}

/// One registry dump; `url` is only needed with `routes --download`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteSource {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Routes {
    pub tmp_dir: String,
    pub sources: Vec<RouteSource>,
    pub batch_size: usize,
    pub download_concurrency: usize,
    pub user_agent: String,
}

impl Default for Routes {
    fn default() -> Self {
        let dumps = [
            ("afrinic", "afrinic.db.gz", "https://ftp.afrinic.net/pub/dbase/afrinic.db.gz"),
            ("apnic", "apnic.db.route.gz", "https://ftp.apnic.net/pub/apnic/whois/apnic.db.route.gz"),
            ("apnic", "apnic.db.route6.gz", "https://ftp.apnic.net/pub/apnic/whois/apnic.db.route6.gz"),
            ("arin", "arin.db.gz", "https://ftp.arin.net/pub/rr/arin.db.gz"),
            ("altdb", "altdb.db.gz", "https://ftp.altdb.net/pub/altdb/altdb.db.gz"),
            ("level3", "level3.db.gz", "https://rr.Level3.net/pub/rr/level3.db.gz"),
            ("radb", "radb.db.gz", "https://ftp.radb.net/radb/dbase/radb.db.gz"),
            ("ripe", "ripe.db.route.gz", "https://ftp.ripe.net/ripe/dbase/split/ripe.db.route.gz"),
            ("ripe", "ripe.db.route6.gz", "https://ftp.ripe.net/ripe/dbase/split/ripe.db.route6.gz"),
        ];

        Self {
            tmp_dir: "/tmp/rr_dbase".to_string(),
            sources: dumps
                .into_iter()
                .map(|(name, file, url)| RouteSource {
                    name: name.to_string(),
                    file: file.to_string(),
                    url: Some(url.to_string()),
                })
                .collect(),
            batch_size: 2000,
            download_concurrency: 1,
            user_agent: "obmp-etl".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PeeringDb {
    pub net_url: String,
    pub org_url: String,
    pub user_agent: String,
    pub batch_size: usize,
}

impl Default for PeeringDb {
    fn default() -> Self {
        Self {
            net_url: "https://www.peeringdb.com/api/net".to_string(),
            org_url: "https://www.peeringdb.com/api/org".to_string(),
            user_agent: "obmp-etl".to_string(),
            batch_size: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Rpki {
    /// `export.json` URL or a local file path
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub batch_size: usize,
    pub accept_invalid_certs: bool,
    /// PostgreSQL interval; rows not refreshed within it are deleted
    pub purge_interval: String,
}

impl Default for Rpki {
    fn default() -> Self {
        Self {
            server: "http://localhost:8080/api/export.json".to_string(),
            username: None,
            password: None,
            batch_size: 200,
            accept_invalid_certs: true,
            purge_interval: "1 hour".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoBackend {
    Postgres,
    ClickHouse,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Geo {
    pub backend: GeoBackend,
    pub dbip_batch_size: usize,
    pub maxmind_batch_size: usize,
    pub clickhouse_batch_size: usize,
}

impl Default for Geo {
    fn default() -> Self {
        Self {
            backend: GeoBackend::Postgres,
            dbip_batch_size: 4000,
            maxmind_batch_size: 3000,
            clickhouse_batch_size: 100_000,
        }
    }
}

impl Config {
    /// Reads `path` as TOML (or YAML by extension); a missing file yields the
    /// defaults. Environment overrides are applied afterwards.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::parse(path, &contents)?
        } else {
            tracing::debug!("{} not found, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .with_context(|| format!("invalid yaml in {}", path.display()))?,
            _ => toml::from_str(contents)
                .with_context(|| format!("invalid toml in {}", path.display()))?,
        };
        Ok(config)
    }

    /// Overrides connection settings from `PG*` / `CLICKHOUSE_*` variables
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("PGHOST") {
            self.database.host = host;
        }
        if let Some(port) = var("PGPORT") {
            self.database.port = match port.parse() {
                Ok(port) => port,
                Err(_) => bail!("PGPORT is not a port number: {port}"),
            };
        }
        if let Some(user) = var("PGUSER") {
            self.database.username = user;
        }
        if let Some(password) = var("PGPASSWORD") {
            self.database.password = password;
        }
        if let Some(name) = var("PGDATABASE") {
            self.database.name = name;
        }

        if let Some(url) = var("CLICKHOUSE_URL") {
            self.clickhouse.url = url;
        }
        if let Some(user) = var("CLICKHOUSE_USER") {
            self.clickhouse.username = user;
        }
        if let Some(password) = var("CLICKHOUSE_PASSWORD") {
            self.clickhouse.password = password;
        }
        if let Some(database) = var("CLICKHOUSE_DATABASE") {
            self.clickhouse.database = database;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_job_constants() {
        let config = Config::default();
        assert_eq!(config.whois.sources.len(), 6);
        assert_eq!(config.whois.sources[0].host, "whois.arin.net");
        assert_eq!(config.whois.requests_per_interval, 100);
        assert_eq!(config.routes.batch_size, 2000);
        assert_eq!(config.peeringdb.batch_size, 1000);
        assert_eq!(config.rpki.batch_size, 200);
        assert_eq!(config.geo.dbip_batch_size, 4000);
        assert_eq!(config.geo.backend, GeoBackend::Postgres);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nhost = \"db.example.net\"\nport = 6432\n\n[geo]\nbackend = \"clickhouse\""
        )
        .unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        let config = Config::parse(file.path(), &contents).unwrap();
        assert_eq!(config.database.host, "db.example.net");
        assert_eq!(config.database.port, 6432);
        assert_eq!(config.database.name, "openbmp");
        assert_eq!(config.geo.backend, GeoBackend::ClickHouse);
        assert_eq!(config.routes.tmp_dir, "/tmp/rr_dbase");
    }

    #[test]
    fn yaml_by_extension() {
        let path = Path::new("settings.yml");
        let config = Config::parse(
            path,
            "rpki:\n  server: /var/lib/rpki/export.json\n  batch_size: 50\n",
        )
        .unwrap();
        assert_eq!(config.rpki.server, "/var/lib/rpki/export.json");
        assert_eq!(config.rpki.batch_size, 50);
        assert!(config.rpki.accept_invalid_certs);
    }

    #[test]
    fn route_sources_from_toml() {
        let config = Config::parse(
            Path::new("c.toml"),
            "[routes]\n[[routes.sources]]\nname = \"radb\"\nfile = \"radb.db.gz\"\n",
        )
        .unwrap();
        assert_eq!(config.routes.sources.len(), 1);
        assert_eq!(config.routes.sources[0].url, None);
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("PGHOST", "pg.internal"),
            ("PGPORT", "5433"),
            ("CLICKHOUSE_DATABASE", "obmp"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database.host, "pg.internal");
        assert_eq!(config.database.port, 5433);
        assert_eq!(config.database.username, "openbmp");
        assert_eq!(config.clickhouse.database, "obmp");
    }

    #[test]
    fn bad_port_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_env(|key| (key == "PGPORT").then(|| "x".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn example_config_parses() {
        let config =
            Config::parse(Path::new("config.example.toml"), include_str!("../config.example.toml"))
                .unwrap();
        assert_eq!(config.whois.sources.len(), 6);
        assert_eq!(config.routes.sources.len(), 2);
        assert_eq!(config.geo.clickhouse_batch_size, 100_000);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.whois.cymru_host, "whois.cymru.com");
    }
}
