//! Read-back queries over the submission journal.

use anyhow::{Context, Result};
use rusqlite::Connection;

use super::types::{SubmissionRecord, SubmissionStatus};

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubmissionRecord> {
    let status: String = row.get(5)?;
    Ok(SubmissionRecord {
        timestamp_secs: row.get(0)?,
        address: row.get(1)?,
        flow: row.get(2)?,
        step: row.get(3)?,
        tx_hash: row.get(4)?,
        status: SubmissionStatus::parse(&status).unwrap_or(SubmissionStatus::Pending),
        error: row.get(6)?,
    })
}

/// Most recent submissions for `address`, newest first.
pub fn recent_submissions(conn: &Connection, address: &str, limit: u32) -> Result<Vec<SubmissionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, address, flow, step, tx_hash, status, error
         FROM submissions WHERE address = ?1
         ORDER BY timestamp DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![address, limit], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read submissions")?;
    Ok(rows)
}

/// Submissions whose ledger outcome is still unknown, oldest first.
pub fn unsettled_submissions(conn: &Connection) -> Result<Vec<SubmissionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, address, flow, step, tx_hash, status, error
         FROM submissions
         WHERE tx_hash IS NOT NULL
         ORDER BY timestamp ASC, id ASC",
    )?;
    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read unsettled submissions")?;
    Ok(rows.into_iter().filter(|r| r.status.is_unsettled()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::create_storage_channel;

    fn record(ts: i64, hash: &str, status: SubmissionStatus) -> SubmissionRecord {
        SubmissionRecord {
            timestamp_secs: ts,
            address: "GBUYER".to_string(),
            flow: "purchase_discount".to_string(),
            step: "payment".to_string(),
            tx_hash: Some(hash.to_string()),
            status,
            error: None,
        }
    }

    #[test]
    fn test_journal_roundtrip_through_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let path_str = path.to_str().unwrap();

        let channel = create_storage_channel(path_str);
        channel.record_submission(record(100, "h1", SubmissionStatus::Success));
        channel.record_submission(record(200, "h2", SubmissionStatus::Pending));
        channel.record_submission(record(300, "h3", SubmissionStatus::Assumed));
        channel.flush();

        let conn = Connection::open(&path).unwrap();
        let recent = recent_submissions(&conn, "GBUYER", 10).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].tx_hash.as_deref(), Some("h3"));

        let unsettled = unsettled_submissions(&conn).unwrap();
        let hashes: Vec<_> = unsettled.iter().filter_map(|r| r.tx_hash.as_deref()).collect();
        assert_eq!(hashes, vec!["h2", "h3"]);

        channel.update_status("h2", SubmissionStatus::Failed, Some("tx_failed".to_string()));
        channel.flush();

        let unsettled = unsettled_submissions(&conn).unwrap();
        assert_eq!(unsettled.len(), 1);
        let recent = recent_submissions(&conn, "GBUYER", 10).unwrap();
        let h2 = recent.iter().find(|r| r.tx_hash.as_deref() == Some("h2")).unwrap();
        assert_eq!(h2.status, SubmissionStatus::Failed);
        assert_eq!(h2.error.as_deref(), Some("tx_failed"));

        channel.shutdown();
    }

    #[test]
    fn test_recent_respects_address_and_limit() {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::schema::create_tables(&conn).unwrap();
        for (i, addr) in ["GA", "GB", "GA", "GA"].iter().enumerate() {
            conn.execute(
                "INSERT INTO submissions (timestamp, address, flow, step, tx_hash, status, updated_at)
                 VALUES (?1, ?2, 'checkin', 'mint', ?3, 'SUCCESS', ?1)",
                rusqlite::params![i as i64, addr, format!("h{}", i)],
            )
            .unwrap();
        }
        let recent = recent_submissions(&conn, "GA", 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|r| r.address == "GA"));
        assert_eq!(recent[0].tx_hash.as_deref(), Some("h3"));
    }
}
