use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    Client, Url,
};
use tracing::debug;

use super::{check_shape, sql, Database, Row, TableSpec};
use crate::config;
use crate::error::DbError;

/// ClickHouse over its HTTP interface
pub struct ClickHouse {
    cfg: config::ClickHouse,
    http: Client,
}

impl ClickHouse {
    pub fn new(cfg: config::ClickHouse) -> Result<Self, DbError> {
        let timeout = Duration::from_secs_f64(cfg.timeout_seconds.max(1.0));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DbError::Connect {
                target: cfg.url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { cfg, http })
    }

    /// Confirms the server answers before any data is fetched
    pub async fn ping(&mut self) -> Result<(), DbError> {
        let rows = self.query("SELECT 1").await.map_err(|e| DbError::Connect {
            target: self.cfg.url.clone(),
            reason: e.to_string(),
        })?;
        debug!("clickhouse ping returned {} row(s)", rows.len());
        Ok(())
    }

    async fn request_text(&self, statement: String, format: Option<&str>) -> Result<String, DbError> {
        let mut url = Url::parse(&self.cfg.url).map_err(|e| DbError::Connect {
            target: self.cfg.url.clone(),
            reason: e.to_string(),
        })?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("database", &self.cfg.database);
            if let Some(format) = format {
                qp.append_pair("default_format", format);
            }
        }

        // the statement travels in the body; GET would be read-only
        let payload_len = statement.len();
        let mut req = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(CONTENT_LENGTH, payload_len)
            .body(statement);

        if !self.cfg.username.is_empty() {
            req = req.basic_auth(self.cfg.username.clone(), Some(self.cfg.password.clone()));
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(DbError::ClickHouse {
                status: status.as_u16(),
                body: text.trim().to_string(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl Database for ClickHouse {
    async fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>, DbError> {
        let text = self
            .request_text(sql.to_string(), Some("TabSeparated"))
            .await?;
        Ok(parse_tab_separated(&text))
    }

    async fn query_no_results(&mut self, sql: &str) -> Result<u64, DbError> {
        self.request_text(sql.to_string(), None).await?;
        Ok(0)
    }

    async fn upsert(&mut self, table: &TableSpec, rows: &[Row]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        check_shape(table, rows)?;

        self.request_text(sql::ch_insert(table, rows), None).await?;
        Ok(rows.len() as u64)
    }

    async fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

fn parse_tab_separated(text: &str) -> Vec<Vec<Option<String>>> {
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.split('\t').map(unescape_field).collect())
        .collect()
}

fn unescape_field(field: &str) -> Option<String> {
    if field == "\\N" {
        return None;
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_separated_rows_are_unescaped() {
        let rows = parse_tab_separated("1\tUS\t\\N\n2\ta\\tb\tx\\\\y\n");
        assert_eq!(
            rows,
            vec![
                vec![Some("1".to_string()), Some("US".to_string()), None],
                vec![
                    Some("2".to_string()),
                    Some("a\tb".to_string()),
                    Some("x\\y".to_string())
                ],
            ]
        );
    }
}
