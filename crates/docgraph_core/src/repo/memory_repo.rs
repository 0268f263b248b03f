//! In-memory store without multi-row transactions.
//!
//! Implements the same capability traits as the SQLite stores but reports
//! `TransactionMode::Compensating`, so cascades over it undo their own writes
//! on failure. Used as a substitutable test double.

use crate::model::author::{validate_names, Author, AuthorId};
use crate::model::document::{Document, DocumentDraft, DocumentId};
use crate::repo::{AuthorStore, CascadeStore, DocumentStore, RepoError, RepoResult, TransactionMode};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct MemoryState {
    authors: BTreeMap<AuthorId, (String, String)>,
    documents: BTreeMap<DocumentId, Document>,
    next_author_id: AuthorId,
    next_document_id: DocumentId,
}

/// Single-threaded in-memory document/author store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RefCell<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an author and returns it with an assigned id.
    pub fn insert_author(&self, first_name: &str, last_name: &str) -> RepoResult<Author> {
        validate_names(first_name, last_name)?;
        let mut state = self.state.borrow_mut();
        state.next_author_id += 1;
        let id = state.next_author_id;
        state
            .authors
            .insert(id, (first_name.trim().to_string(), last_name.trim().to_string()));
        Ok(Author {
            id,
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            document_ids: BTreeSet::new(),
        })
    }

    /// Inserts a document and returns it with an assigned id.
    pub fn insert_document(&self, draft: &DocumentDraft) -> RepoResult<Document> {
        draft.validate(None)?;
        let mut state = self.state.borrow_mut();
        ensure_links_exist(&state, &draft.author_ids, &draft.references)?;
        state.next_document_id += 1;
        let document = Document {
            id: state.next_document_id,
            title: draft.title.clone(),
            body: draft.body.clone(),
            author_ids: draft.author_ids.clone(),
            references: draft.references.clone(),
            version: 0,
        };
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    /// Replaces a document's outgoing references without a version check.
    ///
    /// Lets callers build cyclic graphs, which inserts alone cannot express.
    pub fn set_references(
        &self,
        id: DocumentId,
        references: BTreeSet<DocumentId>,
    ) -> RepoResult<()> {
        let mut state = self.state.borrow_mut();
        let author_ids = BTreeSet::new();
        ensure_links_exist(&state, &author_ids, &references)?;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or(RepoError::DocumentNotFound(id))?;
        document.references = references;
        document.validate()?;
        Ok(())
    }

    /// Returns a copy of every stored document keyed by id.
    pub fn documents(&self) -> BTreeMap<DocumentId, Document> {
        self.state.borrow().documents.clone()
    }
}

impl DocumentStore for MemoryStore {
    fn get_document(&self, id: DocumentId) -> RepoResult<Option<Document>> {
        Ok(self.state.borrow().documents.get(&id).cloned())
    }

    fn save_document(&self, document: &Document) -> RepoResult<Document> {
        document.validate()?;
        let mut state = self.state.borrow_mut();
        ensure_links_exist(&state, &document.author_ids, &document.references)?;

        let stored = state
            .documents
            .get_mut(&document.id)
            .ok_or(RepoError::DocumentNotFound(document.id))?;
        if stored.version != document.version {
            return Err(RepoError::VersionConflict {
                document_id: document.id,
                expected_version: document.version,
            });
        }

        *stored = Document {
            version: document.version + 1,
            ..document.clone()
        };
        Ok(stored.clone())
    }

    fn find_referencing(&self, id: DocumentId) -> RepoResult<Vec<Document>> {
        Ok(self
            .state
            .borrow()
            .documents
            .values()
            .filter(|document| document.cites(id))
            .cloned()
            .collect())
    }
}

impl AuthorStore for MemoryStore {
    fn get_author(&self, id: AuthorId) -> RepoResult<Option<Author>> {
        let state = self.state.borrow();
        Ok(state.authors.get(&id).map(|(first_name, last_name)| Author {
            id,
            first_name: first_name.clone(),
            last_name: last_name.clone(),
            document_ids: state
                .documents
                .values()
                .filter(|document| document.author_ids.contains(&id))
                .map(|document| document.id)
                .collect(),
        }))
    }

    fn delete_author(&self, id: AuthorId) -> RepoResult<()> {
        let mut state = self.state.borrow_mut();
        if state.authors.remove(&id).is_none() {
            return Err(RepoError::AuthorNotFound(id));
        }
        for document in state.documents.values_mut() {
            document.author_ids.remove(&id);
        }
        Ok(())
    }
}

impl CascadeStore for MemoryStore {
    fn transaction_mode(&self) -> TransactionMode {
        TransactionMode::Compensating
    }

    fn begin(&self) -> RepoResult<()> {
        Ok(())
    }

    fn commit(&self) -> RepoResult<()> {
        Ok(())
    }

    fn rollback(&self) -> RepoResult<()> {
        Ok(())
    }
}

fn ensure_links_exist(
    state: &MemoryState,
    author_ids: &BTreeSet<AuthorId>,
    references: &BTreeSet<DocumentId>,
) -> RepoResult<()> {
    if let Some(missing) = author_ids.iter().find(|id| !state.authors.contains_key(id)) {
        return Err(RepoError::AuthorNotFound(*missing));
    }
    if let Some(missing) = references
        .iter()
        .find(|id| !state.documents.contains_key(id))
    {
        return Err(RepoError::DocumentNotFound(*missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::model::document::DocumentDraft;
    use crate::repo::{DocumentStore, RepoError};
    use std::collections::BTreeSet;

    #[test]
    fn save_with_stale_version_is_rejected() {
        let store = MemoryStore::new();
        let author = store.insert_author("Ada", "Lovelace").unwrap();
        let document = store
            .insert_document(&DocumentDraft {
                title: "Notes".to_string(),
                body: "Engine".to_string(),
                author_ids: BTreeSet::from([author.id]),
                references: BTreeSet::new(),
            })
            .unwrap();

        let saved = store.save_document(&document).unwrap();
        assert_eq!(saved.version, 1);

        let err = store.save_document(&document).unwrap_err();
        assert!(matches!(err, RepoError::VersionConflict { .. }));
        assert!(err.is_conflict());
    }
}
