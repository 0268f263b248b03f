use docgraph_core::db::open_db_in_memory;
use docgraph_core::repo::document_repo::SqliteDocumentRepository;
use docgraph_core::{
    AuthorId, AuthorService, DocumentDraft, DocumentListQuery, DocumentService, DocumentStore,
    DocumentValidationError, RepoError, ServiceError,
};
use rusqlite::Connection;
use std::collections::BTreeSet;

fn draft(title: &str, authors: &[AuthorId], references: &[i64]) -> DocumentDraft {
    DocumentDraft {
        title: title.to_string(),
        body: format!("{title} body"),
        author_ids: authors.iter().copied().collect(),
        references: references.iter().copied().collect(),
    }
}

fn seed_author(conn: &Connection) -> AuthorId {
    AuthorService::try_new(conn)
        .unwrap()
        .create_author("Ada", "Lovelace")
        .unwrap()
        .id
}

#[test]
fn create_and_get_roundtrip_with_links() {
    let conn = open_db_in_memory().unwrap();
    let author = seed_author(&conn);
    let service = DocumentService::try_new(&conn).unwrap();

    let base = service.create_document(&draft("Base", &[author], &[])).unwrap();
    let citing = service
        .create_document(&draft("Citing", &[author], &[base.id]))
        .unwrap();

    let loaded = service.get_document(citing.id).unwrap();
    assert_eq!(loaded.references, BTreeSet::from([base.id]));
    assert_eq!(loaded.author_ids, BTreeSet::from([author]));
    assert_eq!(loaded.version, 0);

    let owner = AuthorService::try_new(&conn)
        .unwrap()
        .get_author(author)
        .unwrap();
    assert_eq!(owner.document_ids, BTreeSet::from([base.id, citing.id]));
}

#[test]
fn create_rejects_invalid_drafts() {
    let conn = open_db_in_memory().unwrap();
    let author = seed_author(&conn);
    let service = DocumentService::try_new(&conn).unwrap();

    let mut blank = draft("Blank", &[author], &[]);
    blank.body = "   ".to_string();
    assert!(matches!(
        service.create_document(&blank),
        Err(ServiceError::DocumentValidation(DocumentValidationError::BlankBody))
    ));

    assert!(matches!(
        service.create_document(&draft("Orphan", &[], &[])),
        Err(ServiceError::DocumentValidation(DocumentValidationError::NoAuthors))
    ));

    assert!(matches!(
        service.create_document(&draft("Zero", &[author], &[0])),
        Err(ServiceError::DocumentValidation(
            DocumentValidationError::InvalidReferenceId(0)
        ))
    ));
}

#[test]
fn create_rejects_unknown_links_without_writing() {
    let conn = open_db_in_memory().unwrap();
    let author = seed_author(&conn);
    let service = DocumentService::try_new(&conn).unwrap();

    match service
        .create_document(&draft("Ghost", &[author, 77], &[]))
        .unwrap_err()
    {
        ServiceError::MissingAuthors(ids) => assert_eq!(ids, vec![77]),
        other => panic!("unexpected error: {other}"),
    }

    match service
        .create_document(&draft("Dangling", &[author], &[5, 6]))
        .unwrap_err()
    {
        ServiceError::MissingReferences(ids) => assert_eq!(ids, vec![5, 6]),
        other => panic!("unexpected error: {other}"),
    }

    let page = service.list_documents(&DocumentListQuery::default()).unwrap();
    assert_eq!(page.total_elements, 0);
}

#[test]
fn update_replaces_fields_and_bumps_version() {
    let conn = open_db_in_memory().unwrap();
    let author = seed_author(&conn);
    let service = DocumentService::try_new(&conn).unwrap();
    let first = service.create_document(&draft("First", &[author], &[])).unwrap();
    let second = service.create_document(&draft("Second", &[author], &[])).unwrap();

    let updated = service
        .update_document(second.id, &draft("Second v2", &[author], &[first.id]))
        .unwrap();
    assert_eq!(updated.title, "Second v2");
    assert_eq!(updated.references, BTreeSet::from([first.id]));
    assert_eq!(updated.version, 1);

    let cleared = service
        .update_document(second.id, &draft("Second v3", &[author], &[]))
        .unwrap();
    assert!(cleared.references.is_empty());
    assert_eq!(cleared.version, 2);
}

#[test]
fn update_rejects_self_reference_and_missing_document() {
    let conn = open_db_in_memory().unwrap();
    let author = seed_author(&conn);
    let service = DocumentService::try_new(&conn).unwrap();
    let document = service.create_document(&draft("Loop", &[author], &[])).unwrap();

    assert!(matches!(
        service.update_document(document.id, &draft("Loop", &[author], &[document.id])),
        Err(ServiceError::DocumentValidation(
            DocumentValidationError::SelfReference(_)
        ))
    ));
    assert!(matches!(
        service.update_document(404, &draft("Nowhere", &[author], &[])),
        Err(ServiceError::DocumentNotFound(404))
    ));
}

#[test]
fn stale_version_save_is_a_conflict() {
    let conn = open_db_in_memory().unwrap();
    let author = seed_author(&conn);
    let service = DocumentService::try_new(&conn).unwrap();
    let document = service.create_document(&draft("Race", &[author], &[])).unwrap();

    let repo = SqliteDocumentRepository::try_new(&conn).unwrap();
    repo.save_document(&document).unwrap();

    let err = repo.save_document(&document).unwrap_err();
    assert!(matches!(
        err,
        RepoError::VersionConflict {
            expected_version: 0,
            ..
        }
    ));
    assert!(err.is_conflict());
}

#[test]
fn delete_removes_edges_in_both_directions() {
    let conn = open_db_in_memory().unwrap();
    let author = seed_author(&conn);
    let service = DocumentService::try_new(&conn).unwrap();
    let a = service.create_document(&draft("A", &[author], &[])).unwrap();
    let b = service.create_document(&draft("B", &[author], &[a.id])).unwrap();
    let c = service.create_document(&draft("C", &[author], &[b.id])).unwrap();

    service.delete_document(b.id).unwrap();

    assert!(matches!(
        service.get_document(b.id),
        Err(ServiceError::DocumentNotFound(_))
    ));
    assert!(service.get_document(c.id).unwrap().references.is_empty());
    let repo = SqliteDocumentRepository::try_new(&conn).unwrap();
    assert!(repo.find_referencing(a.id).unwrap().is_empty());
    assert!(matches!(
        service.delete_document(b.id),
        Err(ServiceError::DocumentNotFound(_))
    ));
}

#[test]
fn list_filters_by_title_and_body() {
    let conn = open_db_in_memory().unwrap();
    let author = seed_author(&conn);
    let service = DocumentService::try_new(&conn).unwrap();
    service.create_document(&draft("Graphs", &[author], &[])).unwrap();
    service.create_document(&draft("Trees", &[author], &[])).unwrap();

    let by_title = service
        .list_documents(&DocumentListQuery {
            title: Some("Graphs".to_string()),
            ..DocumentListQuery::default()
        })
        .unwrap();
    assert_eq!(by_title.total_elements, 1);

    let mismatched = service
        .list_documents(&DocumentListQuery {
            title: Some("Graphs".to_string()),
            body: Some("Trees body".to_string()),
            ..DocumentListQuery::default()
        })
        .unwrap();
    assert_eq!(mismatched.total_elements, 0);
    assert_eq!(mismatched.total_pages, 0);
}
