use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{types::ToSql, Client, NoTls, SimpleQueryMessage};
use tracing::{debug, error};

use super::{check_shape, sql, Database, Row, TableSpec};
use crate::config;
use crate::error::DbError;

/// Tables written by the loaders; `init-db` creates whatever is missing
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS info_asn (
    asn             BIGINT PRIMARY KEY,
    as_name         VARCHAR(255),
    org_id          VARCHAR(255),
    org_name        VARCHAR(255),
    remarks         TEXT,
    address         VARCHAR(255),
    city            VARCHAR(255),
    state_prov      VARCHAR(255),
    postal_code     VARCHAR(255),
    country         VARCHAR(255),
    raw_output      TEXT,
    source          VARCHAR(64),
    timestamp       TIMESTAMP WITHOUT TIME ZONE DEFAULT now()
);
CREATE TABLE IF NOT EXISTS info_route (
    prefix          INET NOT NULL,
    prefix_len      SMALLINT NOT NULL,
    origin_as       BIGINT NOT NULL,
    descr           TEXT,
    source          VARCHAR(32),
    timestamp       TIMESTAMP WITHOUT TIME ZONE DEFAULT now(),
    PRIMARY KEY (prefix, prefix_len, origin_as)
);
CREATE TABLE IF NOT EXISTS rpki_validator (
    prefix          INET NOT NULL,
    prefix_len      SMALLINT NOT NULL,
    prefix_len_max  SMALLINT NOT NULL,
    origin_as       BIGINT NOT NULL,
    timestamp       TIMESTAMP WITHOUT TIME ZONE DEFAULT now(),
    PRIMARY KEY (prefix, prefix_len_max, origin_as)
);
CREATE TABLE IF NOT EXISTS geo_ip (
    family          SMALLINT,
    ip              INET PRIMARY KEY,
    country         VARCHAR(64),
    stateprov       VARCHAR(255),
    city            VARCHAR(255),
    latitude        DOUBLE PRECISION,
    longitude       DOUBLE PRECISION,
    timezone_offset DOUBLE PRECISION,
    timezone_name   VARCHAR(64),
    isp_name        VARCHAR(128),
    timestamp       TIMESTAMP WITHOUT TIME ZONE DEFAULT now()
);
";

/// One owned PostgreSQL session
pub struct Postgres {
    client: Option<Client>,
    connection: Option<JoinHandle<()>>,
    last_query_time: Duration,
}

impl Postgres {
    pub async fn connect(cfg: &config::Database) -> Result<Self, DbError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&cfg.host)
            .port(cfg.port)
            .user(&cfg.username)
            .password(&cfg.password)
            .dbname(&cfg.name);

        let (client, connection) =
            pg.connect(NoTls)
                .await
                .map_err(|e| DbError::Connect {
                    target: format!("postgres://{}@{}:{}/{}", cfg.username, cfg.host, cfg.port, cfg.name),
                    reason: e.to_string(),
                })?;

        // single task to handle the connection (errors)
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection failed: {}", e);
            }
        });

        debug!("connected to postgres {}:{}/{}", cfg.host, cfg.port, cfg.name);
        Ok(Self {
            client: Some(client),
            connection: Some(connection),
            last_query_time: Duration::ZERO,
        })
    }

    fn client(&self) -> Result<&Client, DbError> {
        self.client.as_ref().ok_or(DbError::Closed)
    }

    pub async fn create_tables(&mut self) -> Result<(), DbError> {
        self.client()?.batch_execute(SCHEMA).await?;
        Ok(())
    }
}

#[async_trait]
impl Database for Postgres {
    async fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>, DbError> {
        let started = Instant::now();
        let messages = self.client()?.simple_query(sql).await?;
        self.last_query_time = started.elapsed();

        let rows = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .collect();
        Ok(rows)
    }

    async fn query_no_results(&mut self, sql: &str) -> Result<u64, DbError> {
        let started = Instant::now();
        let affected = self.client()?.execute(sql, &[]).await?;
        self.last_query_time = started.elapsed();
        Ok(affected)
    }

    async fn upsert(&mut self, table: &TableSpec, rows: &[Row]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        check_shape(table, rows)?;

        let (statement, params) = sql::pg_upsert(table, rows);
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        let started = Instant::now();
        let affected = self.client()?.execute(statement.as_str(), &refs).await?;
        self.last_query_time = started.elapsed();
        debug!(
            "upserted {} rows into {} in {:?}",
            rows.len(),
            table.name,
            self.last_query_time
        );
        Ok(affected)
    }

    async fn close(&mut self) -> Result<(), DbError> {
        // dropping the client ends the connection task
        drop(self.client.take());
        if let Some(connection) = self.connection.take() {
            let _ = connection.await;
        }
        Ok(())
    }

    fn max_batch_rows(&self, table: &TableSpec) -> Option<usize> {
        Some(sql::MAX_PG_PARAMS / table.columns.len().max(1))
    }
}
