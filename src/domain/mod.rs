pub mod document;
pub mod query;
