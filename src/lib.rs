pub mod db;
pub mod domain;
pub mod models;
pub mod processing;
pub mod providers;
pub mod repository;
pub mod schema;

/// Minimum cosine similarity for a query to reach verification.
pub const SIMILARITY_THRESHOLD: f32 = 0.55;
/// Candidates passed to the verifier per document.
pub const TOP_K: usize = 5;
/// Minimum best-match similarity for a notification.
pub const NOTIFICATION_THRESHOLD: f32 = 0.7;
/// Characters of article body included in the verification prompt.
pub const CONTENT_EXCERPT_CHARS: usize = 1000;
pub const MAX_VERIFICATION_ATTEMPTS: u32 = 3;
