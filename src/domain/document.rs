use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A candidate article as delivered by the document source.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Document {
    pub title: String,
    pub url: String,
    pub source: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "date")]
    pub published_at: String,
}

impl Document {
    /// Text compared against the query set. Falls back to the title when the
    /// extractor produced no body.
    pub fn embedding_text(&self) -> &str {
        if self.content.trim().is_empty() {
            self.title.as_str()
        } else {
            self.content.as_str()
        }
    }
}

/// One (document, query) pair the verifier accepted.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct VerifiedMatch {
    pub query_text: String,
    pub similarity_score: f32,
    pub verifier_response: String,
    pub category: String,
}

/// A document that survived both stages and was persisted.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessedDocument {
    pub id: i32,
    pub document: Document,
    pub matches: Vec<VerifiedMatch>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StoredMatch {
    pub id: i32,
    pub query_text: String,
    pub similarity_score: f32,
    pub verifier_response: String,
    pub category: String,
}

impl StoredMatch {
    /// Human readable relevance line. Derived from the numeric score, never
    /// the other way round.
    pub fn relevance_label(&self) -> String {
        format!(
            "Verified {} match (similarity: {:.2})",
            self.category, self.similarity_score
        )
    }
}

/// A persisted document together with every match attached to it.
#[derive(Clone, Debug, Serialize)]
pub struct StoredDocument {
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
    pub matches: Vec<StoredMatch>,
}

impl StoredDocument {
    /// Highest finite similarity among the attached matches.
    pub fn best_score(&self) -> Option<f32> {
        best_score(self.matches.iter().map(|m| m.similarity_score))
    }
}

/// Extract the score from a relevance label such as
/// `"Verified topic match (similarity: 0.87)"`.
///
/// Returns `None` for anything that does not carry a finite number after
/// `similarity:`.
pub fn parse_similarity(label: &str) -> Option<f32> {
    let (_, tail) = label.split_once("similarity:")?;
    let number = tail
        .trim_start()
        .split(|c: char| c == ')' || c.is_whitespace())
        .next()?;
    number.parse::<f32>().ok().filter(|score| score.is_finite())
}

/// Maximum over `scores`, ignoring NaN and infinities.
pub fn best_score<I>(scores: I) -> Option<f32>
where
    I: IntoIterator<Item = f32>,
{
    scores
        .into_iter()
        .filter(|score| score.is_finite())
        .fold(None, |best, score| match best {
            Some(current) if current >= score => Some(current),
            _ => Some(score),
        })
}
