//! Interest statements supplied per pipeline run.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    Question,
    Topic,
    #[default]
    General,
}

impl QueryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Question => "question",
            QueryCategory::Topic => "topic",
            QueryCategory::General => "general",
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub category: QueryCategory,
}

impl Query {
    pub fn new(text: impl Into<String>, category: QueryCategory) -> Self {
        Self {
            text: text.into(),
            category,
        }
    }

    pub fn general(text: impl Into<String>) -> Self {
        Self::new(text, QueryCategory::General)
    }
}

const BULLET_MARKERS: [char; 4] = ['-', '*', '+', '•'];

/// Parse a newline-delimited list. Leading bullet markers are stripped and
/// blank lines ignored.
pub fn parse_query_list(input: &str, category: QueryCategory) -> Vec<Query> {
    input
        .lines()
        .map(strip_bullet)
        .filter(|line| !line.is_empty())
        .map(|line| Query::new(line, category))
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    match line.strip_prefix(BULLET_MARKERS) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        _ => line,
    }
}

/// Load questions and topics from disk, dropping duplicate texts.
///
/// A missing or unreadable file contributes nothing.
pub fn load_query_set(questions_path: &Path, topics_path: &Path) -> Vec<Query> {
    let mut queries = Vec::new();
    for (path, category) in [
        (questions_path, QueryCategory::Question),
        (topics_path, QueryCategory::Topic),
    ] {
        match std::fs::read_to_string(path) {
            Ok(content) => queries.extend(parse_query_list(&content, category)),
            Err(error) => {
                log::warn!("Failed to read {category} list {}: {error}", path.display())
            }
        }
    }

    let mut seen = HashSet::new();
    queries.retain(|query| seen.insert(query.text.clone()));

    log::info!("Loaded {} queries for matching", queries.len());
    queries
}
