use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::QueryResult;

use crate::db::DbConnection;
use crate::domain::document::{Document, StoredDocument, VerifiedMatch};
use crate::models::document::{
    Document as DbDocument, Match as DbMatch, NewDocument, NewMatch,
};
use crate::repository::{
    DieselRepository, DocumentReader, DocumentWriter, RepositoryError, RepositoryResult,
};

/// Load matches for `documents` in one query and attach them in order.
fn attach_matches(
    conn: &mut DbConnection,
    documents: Vec<DbDocument>,
) -> QueryResult<Vec<StoredDocument>> {
    use crate::schema::matches;

    let document_ids: Vec<i32> = documents.iter().map(|d| d.id).collect();
    let mut matches_by_document: HashMap<i32, Vec<DbMatch>> = HashMap::new();
    if !document_ids.is_empty() {
        let rows = matches::table
            .filter(matches::document_id.eq_any(&document_ids))
            .order(matches::id.asc())
            .select(DbMatch::as_select())
            .load(conn)?;
        for row in rows {
            matches_by_document
                .entry(row.document_id)
                .or_insert_with(Vec::new)
                .push(row);
        }
    }

    Ok(documents
        .into_iter()
        .map(|document| {
            let matches = matches_by_document.remove(&document.id).unwrap_or_default();
            document.into_stored(matches)
        })
        .collect())
}

impl DocumentReader for DieselRepository {
    fn list_recent_documents(&self, limit: i64) -> RepositoryResult<Vec<StoredDocument>> {
        use crate::schema::documents;

        let mut conn = self.conn()?;

        let rows = documents::table
            .order((documents::verified_at.desc(), documents::id.desc()))
            .limit(limit)
            .select(DbDocument::as_select())
            .load(&mut conn)?;

        Ok(attach_matches(&mut conn, rows)?)
    }

    fn list_unsent_documents(
        &self,
        min_score: f32,
        limit: i64,
    ) -> RepositoryResult<Vec<StoredDocument>> {
        use crate::schema::{documents, matches};

        let mut conn = self.conn()?;

        // Threshold applies before the limit: weak documents stay unsent forever.
        let qualifying = matches::table
            .filter(matches::document_id.eq(documents::id))
            .filter(matches::similarity_score.ge(min_score));

        let rows = documents::table
            .filter(documents::delivered.eq(false))
            .filter(diesel::dsl::exists(qualifying))
            .order((documents::verified_at.desc(), documents::id.desc()))
            .limit(limit)
            .select(DbDocument::as_select())
            .load(&mut conn)?;

        Ok(attach_matches(&mut conn, rows)?)
    }

    fn list_documents_in_timeframe(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        limit: i64,
    ) -> RepositoryResult<Vec<StoredDocument>> {
        use crate::schema::documents;

        if start > end {
            return Err(RepositoryError::ValidationError(format!(
                "timeframe start {start} is after end {end}"
            )));
        }

        let mut conn = self.conn()?;

        let rows = documents::table
            .filter(documents::created_at.ge(start))
            .filter(documents::created_at.le(end))
            .order((documents::created_at.desc(), documents::id.desc()))
            .limit(limit)
            .select(DbDocument::as_select())
            .load(&mut conn)?;

        Ok(attach_matches(&mut conn, rows)?)
    }

    fn find_document_by_url(&self, url: &str) -> RepositoryResult<Option<StoredDocument>> {
        use crate::schema::documents;

        let mut conn = self.conn()?;

        let row = documents::table
            .filter(documents::url.eq(url))
            .select(DbDocument::as_select())
            .first(&mut conn)
            .optional()?;

        match row {
            Some(row) => Ok(attach_matches(&mut conn, vec![row])?.pop()),
            None => Ok(None),
        }
    }
}

impl DocumentWriter for DieselRepository {
    fn upsert_document(
        &self,
        document: &Document,
        matches: &[VerifiedMatch],
    ) -> RepositoryResult<i32> {
        use crate::schema::{documents, matches as match_rows};

        if document.url.trim().is_empty() {
            return Err(RepositoryError::ValidationError(
                "document url must not be empty".to_string(),
            ));
        }

        let mut conn = self.conn()?;
        let now = Utc::now().naive_utc();

        let document_id = conn.transaction(|conn| {
            let new_document = NewDocument {
                url: &document.url,
                title: &document.title,
                source: &document.source,
                content: &document.content,
                published_at: &document.published_at,
                created_at: now,
                verified_at: now,
            };

            // First write wins; a conflicting insert returns no row.
            let inserted = diesel::insert_into(documents::table)
                .values(&new_document)
                .on_conflict(documents::url)
                .do_nothing()
                .returning(documents::id)
                .get_result::<i32>(conn)
                .optional()?;

            let document_id = match inserted {
                Some(id) => id,
                None => {
                    log::debug!("Document {} already stored, reusing its id", document.url);
                    documents::table
                        .filter(documents::url.eq(&document.url))
                        .select(documents::id)
                        .first::<i32>(conn)?
                }
            };

            if !matches.is_empty() {
                let new_matches = matches
                    .iter()
                    .map(|m| NewMatch {
                        document_id,
                        query_text: &m.query_text,
                        similarity_score: m.similarity_score,
                        verifier_response: &m.verifier_response,
                        category: &m.category,
                    })
                    .collect::<Vec<_>>();

                diesel::insert_into(match_rows::table)
                    .values(&new_matches)
                    .execute(conn)?;
            }

            Ok::<i32, RepositoryError>(document_id)
        })?;

        Ok(document_id)
    }

    fn mark_document_delivered(&self, document_id: i32) -> RepositoryResult<bool> {
        use crate::schema::documents;

        let mut conn = self.conn()?;

        let affected = diesel::update(
            documents::table
                .filter(documents::id.eq(document_id))
                .filter(documents::delivered.eq(false)),
        )
        .set((
            documents::delivered.eq(true),
            documents::delivered_at.eq(Some(Utc::now().naive_utc())),
        ))
        .execute(&mut conn)?;

        Ok(affected > 0)
    }
}
