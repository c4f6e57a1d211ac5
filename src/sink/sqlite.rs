use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, Result as SqliteResult, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{DocumentSink, SinkError, SinkRow};
use crate::document::{DocumentType, LogisticsDocumentResult};

/// Local append-only history of every extraction.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub uid: String,
    pub recorded_at: String,
    pub file_name: Option<String>,
    #[serde(flatten)]
    pub record: LogisticsDocumentResult,
}

const RECORD_COLUMNS: &str = "id, uid, recorded_at, file_name, document_type, invoice_number,
    total_amount, currency, issue_date, supplier_name, bill_number, etd, eta, vessel_name,
    port_of_loading, port_of_discharge, form_type, exporter_name, importer_name, country_of_origin";

impl RecordStore {
    /// Open (creating parent directories and schema as needed).
    pub fn open<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            // Connection::open reports the real error if this fails.
            let _ = std::fs::create_dir_all(parent);
        }
        let store = Self::with_connection(Connection::open(db_path)?)?;
        info!(path = %db_path.display(), "Record store ready");
        Ok(store)
    }

    pub fn in_memory() -> SqliteResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS extractions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uid TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                file_name TEXT,
                document_type TEXT NOT NULL DEFAULT '',
                invoice_number TEXT,
                total_amount REAL,
                currency TEXT,
                issue_date TEXT,
                supplier_name TEXT,
                bill_number TEXT,
                etd TEXT,
                eta TEXT,
                vessel_name TEXT,
                port_of_loading TEXT,
                port_of_discharge TEXT,
                form_type TEXT,
                exporter_name TEXT,
                importer_name TEXT,
                country_of_origin TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_extractions_uid ON extractions(uid)",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Same file name and same extracted fields give the same uid.
    pub fn record_uid(file_name: Option<&str>, record: &LogisticsDocumentResult) -> String {
        let mut hasher = Sha256::new();
        hasher.update(file_name.unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_json::to_string(record).unwrap_or_default().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn insert(&self, row: &SinkRow) -> SqliteResult<i64> {
        let uid = Self::record_uid(row.file_name.as_deref(), &row.record);
        let r = &row.record;
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO extractions
                (uid, recorded_at, file_name, document_type, invoice_number, total_amount,
                 currency, issue_date, supplier_name, bill_number, etd, eta, vessel_name,
                 port_of_loading, port_of_discharge, form_type, exporter_name, importer_name,
                 country_of_origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                uid,
                row.timestamp,
                row.file_name,
                r.document_type.as_str(),
                r.invoice_number,
                r.total_amount,
                r.currency,
                r.issue_date,
                r.supplier_name,
                r.bill_number,
                r.etd,
                r.eta,
                r.vessel_name,
                r.port_of_loading,
                r.port_of_discharge,
                r.form_type,
                r.exporter_name,
                r.importer_name,
                r.country_of_origin,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(id, uid = %uid, "Extraction stored");
        Ok(id)
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> SqliteResult<Vec<StoredRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM extractions ORDER BY id DESC LIMIT ?1"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], Self::row_to_record)?;
        rows.collect()
    }

    pub fn count(&self) -> SqliteResult<usize> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.query_row("SELECT COUNT(*) FROM extractions", [], |row| row.get(0))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRecord> {
        let document_type: String = row.get(4)?;
        Ok(StoredRecord {
            id: row.get(0)?,
            uid: row.get(1)?,
            recorded_at: row.get(2)?,
            file_name: row.get(3)?,
            record: LogisticsDocumentResult {
                document_type: DocumentType::from_literal(&document_type),
                invoice_number: row.get(5)?,
                total_amount: row.get(6)?,
                currency: row.get(7)?,
                issue_date: row.get(8)?,
                supplier_name: row.get(9)?,
                bill_number: row.get(10)?,
                etd: row.get(11)?,
                eta: row.get(12)?,
                vessel_name: row.get(13)?,
                port_of_loading: row.get(14)?,
                port_of_discharge: row.get(15)?,
                form_type: row.get(16)?,
                exporter_name: row.get(17)?,
                importer_name: row.get(18)?,
                country_of_origin: row.get(19)?,
            },
        })
    }
}

#[async_trait]
impl DocumentSink for RecordStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn append(&self, row: &SinkRow) -> Result<(), SinkError> {
        let store = self.clone();
        let row = row.clone();
        tokio::task::spawn_blocking(move || store.insert(&row)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bill() -> LogisticsDocumentResult {
        LogisticsDocumentResult {
            document_type: DocumentType::Bill,
            bill_number: Some("BL123".into()),
            etd: Some("2024-05-20".into()),
            vessel_name: Some("EVER GIVEN".into()),
            ..LogisticsDocumentResult::empty()
        }
    }

    #[test]
    fn test_uid_generation() {
        let uid1 = RecordStore::record_uid(Some("a.pdf"), &bill());
        let uid2 = RecordStore::record_uid(Some("a.pdf"), &bill());
        let uid3 = RecordStore::record_uid(Some("b.pdf"), &bill());
        let uid4 = RecordStore::record_uid(Some("a.pdf"), &LogisticsDocumentResult::empty());

        assert_eq!(uid1, uid2);
        assert_ne!(uid1, uid3);
        assert_ne!(uid1, uid4);
    }

    #[test]
    fn test_insert_and_read_back_newest_first() {
        let store = RecordStore::in_memory().unwrap();
        let invoice = LogisticsDocumentResult {
            document_type: DocumentType::Invoice,
            total_amount: Some(1234.5),
            currency: Some("USD".into()),
            ..LogisticsDocumentResult::empty()
        };

        store.insert(&SinkRow::new(bill(), Some("bl.pdf".into()))).unwrap();
        store.insert(&SinkRow::new(invoice.clone(), None)).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let rows = store.recent(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].record, invoice);
        assert_eq!(rows[0].file_name, None);
        assert_eq!(rows[1].record, bill());
        assert_eq!(rows[1].file_name.as_deref(), Some("bl.pdf"));

        assert_eq!(store.recent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_stored_record_json_is_flat() {
        let store = RecordStore::in_memory().unwrap();
        store.insert(&SinkRow::new(bill(), None)).unwrap();
        let json = serde_json::to_value(&store.recent(1).unwrap()[0]).unwrap();
        assert_eq!(json["document_type"], "Bill");
        assert_eq!(json["bill_number"], "BL123");
        assert!(json["invoice_number"].is_null());
        assert!(json.get("record").is_none());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/records.db");
        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_sink_append() {
        let store = RecordStore::in_memory().unwrap();
        store
            .append(&SinkRow::new(bill(), Some("x.pdf".into())))
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
