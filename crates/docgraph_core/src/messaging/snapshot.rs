//! Wire schema for cascade messages.
//!
//! Payloads are JSON objects: `{"authorId": 7, "ownedDocumentIds": [1, 2]}`.
//! Unknown fields are ignored and a missing id list decodes as empty.

use crate::model::author::{Author, AuthorId};
use crate::model::document::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Immutable author snapshot taken at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSnapshot {
    pub author_id: AuthorId,
    #[serde(default)]
    pub owned_document_ids: BTreeSet<DocumentId>,
}

impl AuthorSnapshot {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

impl From<&Author> for AuthorSnapshot {
    fn from(author: &Author) -> Self {
        Self {
            author_id: author.id,
            owned_document_ids: author.document_ids.clone(),
        }
    }
}
