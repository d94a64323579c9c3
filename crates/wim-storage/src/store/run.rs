use rusqlite::{params, Connection, OptionalExtension};
use wim_common::report::RunReport;

use super::{to_millis, InventoryStore};
use crate::error::Result;

impl InventoryStore {
    /// Most recent reconciliation runs, newest first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunReport>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT report_json FROM reconcile_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(serde_json::from_str(&row?)?);
        }
        Ok(runs)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunReport>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT report_json FROM reconcile_runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }
}

pub(crate) fn insert_run(conn: &Connection, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string(report)?;
    conn.execute(
        "INSERT OR REPLACE INTO reconcile_runs
         (run_id, started_at, finished_at, since, candidates, succeeded, failed, skipped, cancelled, report_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            report.run_id,
            to_millis(report.started_at),
            to_millis(report.finished_at),
            report.since.map(to_millis),
            report.candidates as i64,
            report.succeeded as i64,
            report.failed_count() as i64,
            report.skipped_count() as i64,
            report.cancelled,
            json,
        ],
    )?;
    Ok(())
}
