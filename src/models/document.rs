use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::domain::document::{StoredDocument, StoredMatch};

#[derive(Clone, Debug, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Document {
    pub id: i32,
    pub url: String,
    pub title: String,
    pub source: String,
    pub content: String,
    pub published_at: String,
    pub created_at: NaiveDateTime,
    pub verified_at: NaiveDateTime,
    pub delivered: bool,
    pub delivered_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::documents)]
pub struct NewDocument<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub source: &'a str,
    pub content: &'a str,
    pub published_at: &'a str,
    pub created_at: NaiveDateTime,
    pub verified_at: NaiveDateTime,
}

#[derive(Clone, Debug, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::matches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Match {
    pub id: i32,
    pub document_id: i32,
    pub query_text: String,
    pub similarity_score: f32,
    pub verifier_response: String,
    pub category: String,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::matches)]
pub struct NewMatch<'a> {
    pub document_id: i32,
    pub query_text: &'a str,
    pub similarity_score: f32,
    pub verifier_response: &'a str,
    pub category: &'a str,
}

impl From<Match> for StoredMatch {
    fn from(value: Match) -> Self {
        Self {
            id: value.id,
            query_text: value.query_text,
            similarity_score: value.similarity_score,
            verifier_response: value.verifier_response,
            category: value.category,
        }
    }
}

impl Document {
    pub fn into_stored(self, matches: Vec<Match>) -> StoredDocument {
        StoredDocument {
            id: self.id,
            url: self.url,
            title: self.title,
            source: self.source,
            content: self.content,
            published_at: self.published_at,
            created_at: self.created_at,
            verified_at: self.verified_at,
            delivered: self.delivered,
            delivered_at: self.delivered_at,
            matches: matches.into_iter().map(StoredMatch::from).collect(),
        }
    }
}
