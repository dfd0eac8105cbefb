pub mod geo;
pub mod peeringdb;
pub mod routes;
pub mod rpki;
pub mod whois_asn;

use tracing::{error, info};

use crate::db::{Database, Row};
use crate::writer::BatchWriter;

// A failed batch is already lost once the writer reports it; the loaders log
// it and keep streaming.

async fn push<D: Database + ?Sized>(writer: &mut BatchWriter<'_, D>, row: Row) {
    if let Err(e) = writer.enqueue(row).await {
        error!("{:#}", e);
    }
}

async fn finish<D: Database + ?Sized>(writer: &mut BatchWriter<'_, D>, what: &str) -> u64 {
    if let Err(e) = writer.flush(true).await {
        error!("{:#}", e);
    }
    info!(
        "{}: {} rows written in {} batches",
        what,
        writer.rows_written(),
        writer.batches()
    );
    writer.rows_written()
}
