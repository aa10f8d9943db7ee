use anyhow::Result;
use tda_db::IngestReport;

use super::Output;

pub fn print_ingest(out: &Output, kind: &str, r: &IngestReport) -> Result<()> {
    if out.json {
        return out.print_json(r);
    }
    println!(
        "import={} rows_read={} rows_ok={} rows_rejected={} rows_inserted={} rows_updated={}",
        kind, r.rows_read, r.rows_ok, r.rows_rejected, r.rows_inserted, r.rows_updated
    );
    Ok(())
}
