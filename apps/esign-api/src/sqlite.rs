//! SQLite-backed document store
//!
//! The aggregate is kept as one JSON body per document with a recipient
//! index beside it. Every commit runs in a single transaction so the
//! document row and its audit entries land together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use esign_core::{store::link_drafts, CertificateRecord, DocumentStore};
use esign_types::{AuditDraft, AuditLogEntry, Result, SignatureDocument, SigningError};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

fn db_error(e: sqlx::Error) -> SigningError {
    SigningError::storage(format!("database: {}", e))
}

fn json_error(e: serde_json::Error) -> SigningError {
    SigningError::storage(format!("corrupt stored record: {}", e))
}

#[derive(sqlx::FromRow)]
struct DbCertificate {
    certificate_id: String,
    document_id: String,
    document_hash: String,
    completed_at: DateTime<Utc>,
    generated_at: DateTime<Utc>,
}

impl From<DbCertificate> for CertificateRecord {
    fn from(row: DbCertificate) -> Self {
        Self {
            certificate_id: row.certificate_id,
            document_id: row.document_id,
            document_hash: row.document_hash,
            completed_at: row.completed_at,
            generated_at: row.generated_at,
        }
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        tracing::info!("Connecting to database: {}", database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Private in-memory database; one connection so every query sees it
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> anyhow::Result<()> {
        tracing::info!("Running database migrations...");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                team_id TEXT NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS recipients (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                event TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                entry_json TEXT NOT NULL,
                entry_hash TEXT NOT NULL,
                UNIQUE(document_id, sequence)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS certificates (
                certificate_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL UNIQUE,
                document_hash TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                generated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_documents_team ON documents(team_id)",
            "CREATE INDEX IF NOT EXISTS idx_recipients_document ON recipients(document_id)",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::info!("Migrations complete");
        Ok(())
    }

    async fn chain_head(
        tx: &mut Transaction<'_, Sqlite>,
        document_id: &str,
    ) -> Result<Option<AuditLogEntry>> {
        let head: Option<(String,)> = sqlx::query_as(
            "SELECT entry_json FROM audit_log WHERE document_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(document_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?;

        head.map(|(json,)| serde_json::from_str(&json).map_err(json_error))
            .transpose()
    }

    async fn insert_entries(
        tx: &mut Transaction<'_, Sqlite>,
        document_id: &str,
        drafts: Vec<AuditDraft>,
    ) -> Result<Vec<AuditLogEntry>> {
        let head = Self::chain_head(tx, document_id).await?;
        let linked = link_drafts(document_id, head.as_ref(), drafts);

        for entry in &linked {
            let json = serde_json::to_string(entry).map_err(json_error)?;
            sqlx::query(
                r#"
                INSERT INTO audit_log (id, document_id, sequence, event, timestamp, entry_json, entry_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.document_id)
            .bind(entry.sequence as i64)
            .bind(entry.event.as_str())
            .bind(entry.timestamp.to_rfc3339())
            .bind(json)
            .bind(&entry.entry_hash)
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;
        }
        Ok(linked)
    }

    async fn load_body(&self, sql: &str, key: &str, what: &str) -> Result<SignatureDocument> {
        let row: Option<(String,)> = sqlx::query_as(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        let (body,) = row.ok_or_else(|| SigningError::not_found(format!("{} {}", what, key)))?;
        serde_json::from_str(&body).map_err(json_error)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn load(&self, document_id: &str) -> Result<SignatureDocument> {
        self.load_body(
            "SELECT body FROM documents WHERE id = ?",
            document_id,
            "document",
        )
        .await
    }

    async fn find_by_recipient(&self, recipient_id: &str) -> Result<SignatureDocument> {
        self.load_body(
            r#"
            SELECT d.body FROM documents d
            JOIN recipients r ON r.document_id = d.id
            WHERE r.id = ?
            "#,
            recipient_id,
            "recipient",
        )
        .await
    }

    async fn commit(
        &self,
        document: &SignatureDocument,
        drafts: Vec<AuditDraft>,
    ) -> Result<Vec<AuditLogEntry>> {
        let body = serde_json::to_string(document).map_err(json_error)?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, team_id, status, body, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.team_id)
        .bind(document.status.as_str())
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        for recipient in &document.recipients {
            sqlx::query("INSERT OR IGNORE INTO recipients (id, document_id) VALUES (?, ?)")
                .bind(&recipient.id)
                .bind(&document.id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        let linked = Self::insert_entries(&mut tx, &document.id, drafts).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(linked)
    }

    async fn append_audit(
        &self,
        document_id: &str,
        drafts: Vec<AuditDraft>,
    ) -> Result<Vec<AuditLogEntry>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Write before reading the chain head so the transaction holds the
        // write lock from the start and concurrent appends queue behind it
        let touched = sqlx::query("UPDATE documents SET id = id WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if touched.rows_affected() == 0 {
            return Err(SigningError::not_found(format!("document {}", document_id)));
        }

        let linked = Self::insert_entries(&mut tx, document_id, drafts).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(linked)
    }

    async fn audit_entries(&self, document_id: &str) -> Result<Vec<AuditLogEntry>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT entry_json FROM audit_log WHERE document_id = ? ORDER BY sequence ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(json_error))
            .collect()
    }

    async fn insert_certificate_if_absent(
        &self,
        record: CertificateRecord,
    ) -> Result<(CertificateRecord, bool)> {
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO certificates
                (certificate_id, document_id, document_hash, completed_at, generated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.certificate_id)
        .bind(&record.document_id)
        .bind(&record.document_hash)
        .bind(record.completed_at)
        .bind(record.generated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?
        .rows_affected()
            == 1;

        if inserted {
            return Ok((record, true));
        }
        let existing = self
            .certificate_for_document(&record.document_id)
            .await?
            .ok_or_else(|| SigningError::storage("certificate id collision"))?;
        Ok((existing, false))
    }

    async fn load_certificate(&self, certificate_id: &str) -> Result<Option<CertificateRecord>> {
        let row: Option<DbCertificate> =
            sqlx::query_as("SELECT * FROM certificates WHERE certificate_id = ?")
                .bind(certificate_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(Into::into))
    }

    async fn certificate_for_document(
        &self,
        document_id: &str,
    ) -> Result<Option<CertificateRecord>> {
        let row: Option<DbCertificate> =
            sqlx::query_as("SELECT * FROM certificates WHERE document_id = ?")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use esign_types::{
        AuditEvent, DocumentMetadata, NewDocument, NewRecipient, RecipientRole, StorageRef,
        StorageType,
    };

    fn document() -> SignatureDocument {
        let new = NewDocument {
            team_id: "team-1".to_string(),
            title: "Lease".to_string(),
            source: StorageRef::new(StorageType::Memory, "sources/lease.pdf"),
            expires_at: None,
            metadata: DocumentMetadata::default(),
            recipients: vec![NewRecipient {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                role: RecipientRole::Signer,
                signing_order: 1,
                required: true,
                access_code_hash: None,
            }],
            fields: vec![],
        };
        SignatureDocument::from_new(new, 1, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_commit_and_load() {
        let store = SqliteStore::in_memory().await.unwrap();
        let doc = document();

        let linked = store
            .commit(&doc, vec![AuditDraft::new(AuditEvent::DocumentCreated)])
            .await
            .unwrap();
        assert_eq!(linked[0].sequence, 0);

        assert_eq!(store.load(&doc.id).await.unwrap(), doc);
        let by_recipient = store.find_by_recipient(&doc.recipients[0].id).await.unwrap();
        assert_eq!(by_recipient.id, doc.id);

        let linked = store
            .append_audit(&doc.id, vec![AuditDraft::new(AuditEvent::DocumentViewed)])
            .await
            .unwrap();
        assert_eq!(linked[0].sequence, 1);

        let entries = store.audit_entries(&doc.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(esign_types::verify_chain(&entries).is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_chain_contiguous() {
        let path = std::env::temp_dir().join(format!("esign-{}.db", uuid::Uuid::new_v4()));
        let store = SqliteStore::connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        let doc = document();
        store
            .commit(&doc, vec![AuditDraft::new(AuditEvent::DocumentCreated)])
            .await
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let id = doc.id.clone();
                tokio::spawn(async move {
                    store
                        .append_audit(
                            &id,
                            vec![AuditDraft::new(AuditEvent::DocumentViewed).meta("n", i)],
                        )
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let entries = store.audit_entries(&doc.id).await.unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (0..9).collect::<Vec<u64>>());
        assert!(esign_types::verify_chain(&entries).is_ok());

        store.pool.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(matches!(
            store.load("nope").await,
            Err(SigningError::NotFound(_))
        ));
        assert!(matches!(
            store.append_audit("nope", vec![]).await,
            Err(SigningError::NotFound(_))
        ));
        assert!(store.load_certificate("CERT-X").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_certificate_insert_if_absent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let record = CertificateRecord {
            certificate_id: "CERT-A".to_string(),
            document_id: "doc-1".to_string(),
            document_hash: "ab".repeat(32),
            completed_at: at,
            generated_at: at,
        };

        let (first, created) = store.insert_certificate_if_absent(record.clone()).await.unwrap();
        assert!(created);
        assert_eq!(first, record);

        let second = CertificateRecord {
            certificate_id: "CERT-B".to_string(),
            ..record.clone()
        };
        let (existing, created) = store.insert_certificate_if_absent(second).await.unwrap();
        assert!(!created);
        assert_eq!(existing, record);
        assert_eq!(
            store.certificate_for_document("doc-1").await.unwrap(),
            Some(record)
        );
    }
}
