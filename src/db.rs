pub mod clickhouse;
pub mod postgres;
pub mod sql;

use async_trait::async_trait;

use crate::error::DbError;

pub use clickhouse::ClickHouse;
pub use postgres::Postgres;

/// One value of a pending row
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        SqlValue::Text(value.into())
    }

    /// `None` becomes NULL
    pub fn opt_text(value: Option<&str>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::text)
    }

    /// Text form sent as a PostgreSQL parameter
    pub fn as_param(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
        }
    }
}

/// Value tuple of one record, in the table's column order
pub type Row = Vec<SqlValue>;

#[derive(Debug)]
pub struct Column {
    pub name: &'static str,
    /// PostgreSQL type the text parameter is cast to
    pub sql_type: &'static str,
}

pub const fn col(name: &'static str, sql_type: &'static str) -> Column {
    Column { name, sql_type }
}

#[derive(Debug)]
pub enum OnConflict {
    /// Plain insert (ClickHouse tables)
    Insert,
    DoNothing {
        keys: &'static [&'static str],
    },
    DoUpdate {
        keys: &'static [&'static str],
        /// columns copied from `excluded`
        set: &'static [&'static str],
        /// extra assignments such as `timestamp=now()`
        extra: &'static [&'static str],
    },
}

/// Target table of a batch writer
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub conflict: OnConflict,
    /// Collapse rows sharing the conflict keys inside one batch
    pub dedupe: bool,
}

impl TableSpec {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }
}

/// Database boundary shared by the loaders
#[async_trait]
pub trait Database: Send {
    /// Runs a SELECT and returns every row as optional text values
    async fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>, DbError>;

    /// Runs a statement without a result set; returns affected rows when known
    async fn query_no_results(&mut self, sql: &str) -> Result<u64, DbError>;

    /// Writes `rows` into `table` as one statement
    async fn upsert(&mut self, table: &TableSpec, rows: &[Row]) -> Result<u64, DbError>;

    async fn close(&mut self) -> Result<(), DbError>;

    /// Largest batch the backend accepts for `table` in one statement
    fn max_batch_rows(&self, _table: &TableSpec) -> Option<usize> {
        None
    }
}

pub(crate) fn check_shape(table: &TableSpec, rows: &[Row]) -> Result<(), DbError> {
    match rows.iter().find(|row| row.len() != table.columns.len()) {
        Some(row) => Err(DbError::RowShape {
            table: table.name,
            expected: table.columns.len(),
            found: row.len(),
        }),
        None => Ok(()),
    }
}
