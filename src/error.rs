use thiserror::Error;

/// Errors raised at the database boundary (PostgreSQL or ClickHouse)
#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("clickhouse request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("clickhouse returned {status}: {body}")]
    ClickHouse { status: u16, body: String },

    /// A row whose value count does not match the table's column list
    #[error("row has {found} values but table {table} has {expected} columns")]
    RowShape {
        table: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("database connection is closed")]
    Closed,
}
