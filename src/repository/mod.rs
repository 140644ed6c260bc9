use chrono::NaiveDateTime;

use crate::db::{DbConnection, DbPool};
use crate::domain::document::{Document, StoredDocument, VerifiedMatch};

pub mod document;
pub mod errors;

pub use errors::{RepositoryError, RepositoryResult};

pub trait DocumentReader {
    /// Most recently verified first.
    fn list_recent_documents(&self, limit: i64) -> RepositoryResult<Vec<StoredDocument>>;
    /// Undelivered documents with at least one match scoring `min_score` or
    /// more, most recently verified first.
    fn list_unsent_documents(
        &self,
        min_score: f32,
        limit: i64,
    ) -> RepositoryResult<Vec<StoredDocument>>;
    /// Documents ingested within `[start, end]`, newest first.
    fn list_documents_in_timeframe(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        limit: i64,
    ) -> RepositoryResult<Vec<StoredDocument>>;
    fn find_document_by_url(&self, url: &str) -> RepositoryResult<Option<StoredDocument>>;
}

pub trait DocumentWriter {
    /// Insert the document unless its URL is already stored, then append
    /// `matches` to whichever row owns the URL. Returns that row's id.
    fn upsert_document(
        &self,
        document: &Document,
        matches: &[VerifiedMatch],
    ) -> RepositoryResult<i32>;
    /// Flip the delivered flag. Returns `false` when nothing changed.
    fn mark_document_delivered(&self, document_id: i32) -> RepositoryResult<bool>;
}

/// Diesel-backed store. Cloning shares the underlying pool.
#[derive(Clone)]
pub struct DieselRepository {
    pool: DbPool,
}

impl DieselRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> RepositoryResult<DbConnection> {
        Ok(self.pool.get()?)
    }
}
