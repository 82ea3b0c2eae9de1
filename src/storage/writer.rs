//! Non-blocking SQLite journal writer using a dedicated thread and mpsc channel.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{error, info, warn};

use super::schema::create_tables;
use super::types::{SubmissionRecord, SubmissionStatus};

/// Messages sent to the journal writer thread.
pub enum StorageMessage {
    /// Record a new submission
    Submission(SubmissionRecord),
    /// Update the status of every row carrying this hash
    StatusUpdate {
        tx_hash: String,
        status: SubmissionStatus,
        error: Option<String>,
    },
    /// Flush and acknowledge (used before reading the journal back)
    Flush(Sender<()>),
    /// Graceful shutdown
    Shutdown,
}

/// Channel handle for sending journal messages (non-blocking).
#[derive(Clone)]
pub struct StorageChannel {
    tx: Sender<StorageMessage>,
}

impl StorageChannel {
    /// Record a submission.
    pub fn record_submission(&self, record: SubmissionRecord) {
        let _ = self.tx.send(StorageMessage::Submission(record));
    }

    /// Record a terminal or intermediate status for a known hash.
    pub fn update_status(&self, tx_hash: &str, status: SubmissionStatus, error: Option<String>) {
        let _ = self.tx.send(StorageMessage::StatusUpdate {
            tx_hash: tx_hash.to_string(),
            status,
            error,
        });
    }

    /// Block until everything queued so far is committed.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(StorageMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv_timeout(Duration::from_secs(5));
        }
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.tx.send(StorageMessage::Shutdown);
    }
}

/// Create a journal channel and spawn the writer thread.
///
/// Returns a `StorageChannel` that can be cloned and shared across tasks.
pub fn create_storage_channel(db_path: &str) -> StorageChannel {
    let (tx, rx) = mpsc::channel();
    let path = db_path.to_string();

    // Dedicated writer thread, isolated from the async runtime
    thread::spawn(move || {
        storage_writer_loop(rx, &path);
    });

    StorageChannel { tx }
}

/// Main writer loop running in a dedicated thread.
fn storage_writer_loop(rx: Receiver<StorageMessage>, db_path: &str) {
    let conn = match Connection::open(db_path) {
        Ok(c) => c,
        Err(e) => {
            error!("[STORAGE] Failed to open database at {}: {}", db_path, e);
            return;
        }
    };

    if let Err(e) = create_tables(&conn) {
        error!("[STORAGE] Failed to create tables: {}", e);
        return;
    }

    info!("[STORAGE] Journal initialized at {}", db_path);

    let mut batch: Vec<StorageMessage> = Vec::with_capacity(32);
    let batch_timeout = Duration::from_millis(100);

    loop {
        match rx.recv_timeout(batch_timeout) {
            Ok(StorageMessage::Shutdown) => {
                flush_batch(&conn, &mut batch);
                info!("[STORAGE] Writer shutdown complete");
                break;
            }
            Ok(StorageMessage::Flush(ack)) => {
                flush_batch(&conn, &mut batch);
                let _ = ack.send(());
            }
            Ok(msg) => {
                batch.push(msg);
                if batch.len() >= 32 {
                    flush_batch(&conn, &mut batch);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                flush_batch(&conn, &mut batch);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                flush_batch(&conn, &mut batch);
                info!("[STORAGE] Channel disconnected, writer exiting");
                break;
            }
        }
    }
}

/// Flush a batch of messages to the database in a single transaction.
fn flush_batch(conn: &Connection, batch: &mut Vec<StorageMessage>) {
    if batch.is_empty() {
        return;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            error!("[STORAGE] Failed to start transaction: {}", e);
            batch.clear();
            return;
        }
    };

    let mut inserted = 0;
    let mut updated = 0;

    for msg in batch.drain(..) {
        match msg {
            StorageMessage::Submission(record) => {
                if insert_submission(&tx, &record) {
                    inserted += 1;
                }
            }
            StorageMessage::StatusUpdate { tx_hash, status, error } => {
                updated += update_status(&tx, &tx_hash, status, error.as_deref());
            }
            StorageMessage::Flush(ack) => {
                let _ = ack.send(());
            }
            StorageMessage::Shutdown => {}
        }
    }

    if let Err(e) = tx.commit() {
        error!("[STORAGE] Failed to commit transaction: {}", e);
    } else if inserted > 0 || updated > 0 {
        info!("[STORAGE] Flushed {} submissions, {} status updates", inserted, updated);
    }
}

/// Insert a submission, returns true if successful.
fn insert_submission(conn: &Connection, record: &SubmissionRecord) -> bool {
    let result = conn.execute(
        "INSERT INTO submissions (timestamp, address, flow, step, tx_hash, status, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?1)",
        rusqlite::params![
            record.timestamp_secs,
            record.address,
            record.flow,
            record.step,
            record.tx_hash,
            record.status.as_str(),
            record.error,
        ],
    );

    match result {
        Ok(_) => true,
        Err(e) => {
            warn!("[STORAGE] Failed to insert submission: {}", e);
            false
        }
    }
}

/// Update all rows for a hash, returns the number of rows touched.
fn update_status(conn: &Connection, tx_hash: &str, status: SubmissionStatus, error: Option<&str>) -> usize {
    let result = conn.execute(
        "UPDATE submissions SET status = ?2, error = COALESCE(?3, error), updated_at = ?4 WHERE tx_hash = ?1",
        rusqlite::params![tx_hash, status.as_str(), error, chrono::Utc::now().timestamp()],
    );

    match result {
        Ok(rows) => {
            if rows == 0 {
                warn!("[STORAGE] Status update for unknown hash {}", tx_hash);
            }
            rows
        }
        Err(e) => {
            warn!("[STORAGE] Failed to update status for {}: {}", tx_hash, e);
            0
        }
    }
}
