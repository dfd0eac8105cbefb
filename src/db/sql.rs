// Statement builders for batched writes. Values never get spliced into
// PostgreSQL text; ClickHouse literals are escaped here and only here.

use std::collections::HashMap;

use super::{OnConflict, Row, SqlValue, TableSpec};

/// Bind parameters PostgreSQL accepts in one statement
pub const MAX_PG_PARAMS: usize = 65_535;

fn placeholder(index: usize, sql_type: &str) -> String {
    if sql_type == "text" {
        format!("${index}::text")
    } else {
        format!("${index}::text::{sql_type}")
    }
}

fn conflict_clause(conflict: &OnConflict) -> String {
    match conflict {
        OnConflict::Insert => String::new(),
        OnConflict::DoNothing { keys } => {
            format!(" ON CONFLICT ({}) DO NOTHING", keys.join(","))
        }
        OnConflict::DoUpdate { keys, set, extra } => {
            let assignments: Vec<String> = set
                .iter()
                .map(|c| format!("{c}=excluded.{c}"))
                .chain(extra.iter().map(|e| e.to_string()))
                .collect();
            format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                keys.join(","),
                assignments.join(", ")
            )
        }
    }
}

fn conflict_keys(conflict: &OnConflict) -> Option<&'static [&'static str]> {
    match conflict {
        OnConflict::Insert => None,
        OnConflict::DoNothing { keys } | OnConflict::DoUpdate { keys, .. } => Some(*keys),
    }
}

/// Collapses rows sharing the conflict keys. A key keeps its first position
/// and takes the values of its last row.
pub fn dedupe_rows<'r>(table: &TableSpec, rows: &'r [Row]) -> Vec<&'r Row> {
    let Some(keys) = conflict_keys(&table.conflict) else {
        return rows.iter().collect();
    };
    let positions: Vec<usize> = keys
        .iter()
        .filter_map(|key| table.columns.iter().position(|c| c.name == *key))
        .collect();

    let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::with_capacity(rows.len());
    let mut kept: Vec<&Row> = Vec::with_capacity(rows.len());
    for row in rows {
        let key: Vec<Option<String>> = positions
            .iter()
            .map(|&i| row.get(i).and_then(SqlValue::as_param))
            .collect();
        match index.get(&key) {
            Some(&slot) => kept[slot] = row,
            None => {
                index.insert(key, kept.len());
                kept.push(row);
            }
        }
    }
    kept
}

/// Multi-row INSERT with numbered parameters; returns the statement and the
/// parameters in placeholder order.
pub fn pg_upsert(table: &TableSpec, rows: &[Row]) -> (String, Vec<Option<String>>) {
    let columns = table.column_names().join(",");
    let rows = if table.dedupe {
        dedupe_rows(table, rows)
    } else {
        rows.iter().collect()
    };
    let mut params = Vec::with_capacity(rows.len() * table.columns.len());
    let mut tuples = Vec::with_capacity(rows.len());

    for row in rows {
        let mut slots = Vec::with_capacity(row.len());
        for (value, column) in row.iter().zip(table.columns) {
            params.push(value.as_param());
            slots.push(placeholder(params.len(), column.sql_type));
        }
        tuples.push(format!("({})", slots.join(",")));
    }

    let sql = format!(
        "INSERT INTO {} ({columns}) VALUES {}{}",
        table.name,
        tuples.join(","),
        conflict_clause(&table.conflict)
    );
    (sql, params)
}

/// ClickHouse literal for one value
pub fn literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) if f.is_finite() => f.to_string(),
        SqlValue::Float(_) => "NULL".to_string(),
        SqlValue::Text(s) => {
            let mut quoted = String::with_capacity(s.len() + 2);
            quoted.push('\'');
            for c in s.chars() {
                match c {
                    '\\' => quoted.push_str("\\\\"),
                    '\'' => quoted.push_str("\\'"),
                    _ => quoted.push(c),
                }
            }
            quoted.push('\'');
            quoted
        }
    }
}

/// Multi-row INSERT with inline literals (ClickHouse has no upsert; the
/// table engine collapses duplicates)
pub fn ch_insert(table: &TableSpec, rows: &[Row]) -> String {
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = row.iter().map(literal).collect();
            format!("({})", values.join(","))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.name,
        table.column_names().join(","),
        tuples.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::col;

    static ROUTES: TableSpec = TableSpec {
        name: "info_route",
        columns: &[col("prefix", "inet"), col("origin_as", "bigint"), col("descr", "text")],
        conflict: OnConflict::DoUpdate {
            keys: &["prefix", "origin_as"],
            set: &["descr"],
            extra: &["timestamp=now()"],
        },
        dedupe: true,
    };

    static ASN: TableSpec = TableSpec {
        name: "info_asn",
        columns: &[col("asn", "bigint"), col("as_name", "text")],
        conflict: OnConflict::DoNothing { keys: &["asn"] },
        dedupe: false,
    };

    #[test]
    fn pg_upsert_numbers_parameters_across_rows() {
        let rows = vec![
            vec![SqlValue::text("192.0.2.0/24"), SqlValue::Int(64500), SqlValue::Null],
            vec![SqlValue::text("198.51.100.0/24"), SqlValue::Int(64501), SqlValue::text("x")],
        ];
        let (sql, params) = pg_upsert(&ROUTES, &rows);
        assert_eq!(
            sql,
            "INSERT INTO info_route (prefix,origin_as,descr) \
             VALUES ($1::text::inet,$2::text::bigint,$3::text),($4::text::inet,$5::text::bigint,$6::text) \
             ON CONFLICT (prefix,origin_as) DO UPDATE SET descr=excluded.descr, timestamp=now()"
        );
        assert_eq!(params.len(), 6);
        assert_eq!(params[1].as_deref(), Some("64500"));
        assert_eq!(params[2], None);
    }

    #[test]
    fn duplicate_keys_keep_the_last_row() {
        let rows = vec![
            vec![SqlValue::text("192.0.2.0/24"), SqlValue::Int(64500), SqlValue::text("old")],
            vec![SqlValue::text("198.51.100.0/24"), SqlValue::Int(64500), SqlValue::text("other")],
            vec![SqlValue::text("192.0.2.0/24"), SqlValue::Int(64500), SqlValue::text("new")],
        ];
        let kept = dedupe_rows(&ROUTES, &rows);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0][2], SqlValue::text("new"));
        assert_eq!(kept[1][2], SqlValue::text("other"));

        let (sql, params) = pg_upsert(&ROUTES, &rows);
        assert!(sql.contains("VALUES ($1::text::inet,$2::text::bigint,$3::text),($4::text::inet"));
        assert_eq!(params.len(), 6);
        assert_eq!(params[2].as_deref(), Some("new"));
    }

    #[test]
    fn pg_insert_do_nothing() {
        let rows = vec![vec![SqlValue::Int(100), SqlValue::text("it's")]];
        let (sql, params) = pg_upsert(&ASN, &rows);
        assert_eq!(
            sql,
            "INSERT INTO info_asn (asn,as_name) VALUES ($1::text::bigint,$2::text) ON CONFLICT (asn) DO NOTHING"
        );
        // quotes travel as data, not as SQL
        assert_eq!(params[1].as_deref(), Some("it's"));
    }

    #[test]
    fn clickhouse_literals_are_escaped() {
        assert_eq!(literal(&SqlValue::text("O'Brien \\ Co")), "'O\\'Brien \\\\ Co'");
        assert_eq!(literal(&SqlValue::Null), "NULL");
        assert_eq!(literal(&SqlValue::Float(f64::NAN)), "NULL");
        assert_eq!(literal(&SqlValue::Float(-118.24)), "-118.24");

        let sql = ch_insert(&ASN, &[vec![SqlValue::Int(1), SqlValue::text("a")]]);
        assert_eq!(sql, "INSERT INTO info_asn (asn,as_name) VALUES (1,'a')");
    }
}
