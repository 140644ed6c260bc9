use serde::Deserialize;

use crate::domain::document::Document;

pub mod embedding;
pub mod notification;
pub mod pipeline;
pub mod verification;

/// Messages accepted on the intake socket.
#[derive(Deserialize, Debug)]
pub enum ZMQMessage {
    /// Run the match pipeline over a batch of freshly fetched documents.
    Documents(Vec<Document>),
    /// Ask the dispatcher for an immediate scan.
    Scan,
}
