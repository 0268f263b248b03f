use docgraph_core::config::MessagingConfig;
use docgraph_core::db::{open_db, open_db_in_memory};
use docgraph_core::messaging::queue::MessageStatus;
use docgraph_core::messaging::{sqlite_consumer, ConsumerSettings, DEFAULT_CLAIM_LEASE};
use docgraph_core::repo::author_repo::SqliteAuthorRepository;
use docgraph_core::repo::document_repo::SqliteDocumentRepository;
use docgraph_core::{
    AuthorId, AuthorService, AuthorStore, CascadeConsumer, CascadeCoordinator, CascadeErrorKind,
    CascadeProducer, ConsumerWorker, DeliveryOutcome, DocumentDraft, DocumentId, DocumentService,
    DocumentStore, MemoryStore, MessageChannel, MessageId, MessagingError, RetryDecision,
    SqliteMessageQueue, Topic,
};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

const TOPIC: &str = "author-cascade";

fn settings(max_attempts: u32) -> ConsumerSettings {
    ConsumerSettings {
        topic: Topic::new(TOPIC).unwrap(),
        max_attempts,
        claim_lease: DEFAULT_CLAIM_LEASE,
    }
}

fn draft(title: &str, author: AuthorId, references: &[DocumentId]) -> DocumentDraft {
    DocumentDraft {
        title: title.to_string(),
        body: format!("{title} body"),
        author_ids: BTreeSet::from([author]),
        references: references.iter().copied().collect(),
    }
}

/// Seeds A owns D1, D2 cites D1; returns (author, d1, d2).
fn seed(conn: &Connection) -> (AuthorId, DocumentId, DocumentId) {
    let authors = AuthorService::try_new(conn).unwrap();
    let documents = DocumentService::try_new(conn).unwrap();
    let author = authors.create_author("Ada", "Lovelace").unwrap().id;
    let other = authors.create_author("Grace", "Hopper").unwrap().id;
    let d1 = documents.create_document(&draft("D1", author, &[])).unwrap().id;
    let d2 = documents
        .create_document(&draft("D2", other, &[d1]))
        .unwrap()
        .id;
    (author, d1, d2)
}

fn publish(conn: &Connection, author: AuthorId) -> MessageId {
    let producer = CascadeProducer::new(
        SqliteMessageQueue::try_new(conn).unwrap(),
        Topic::new(TOPIC).unwrap(),
    );
    AuthorService::try_new(conn)
        .unwrap()
        .request_author_cascade(&producer, author)
        .unwrap()
}

#[test]
fn published_snapshot_is_consumed_and_acked() {
    let conn = open_db_in_memory().unwrap();
    let (author, d1, d2) = seed(&conn);
    let message_id = publish(&conn, author);

    let consumer = sqlite_consumer(&conn, settings(3)).unwrap();
    match consumer.poll_once().unwrap() {
        Some(DeliveryOutcome::Completed {
            message_id: delivered,
            report,
        }) => {
            assert_eq!(delivered, message_id);
            assert_eq!(report.affected, BTreeSet::from([d1, d2]));
            assert_eq!(report.edges_removed, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(consumer.poll_once().unwrap().is_none());

    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    let message = queue.get_message(message_id).unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Acked);
    assert_eq!(queue.pending_count(&Topic::new(TOPIC).unwrap()).unwrap(), 0);

    let authors = SqliteAuthorRepository::try_new(&conn).unwrap();
    assert!(authors.get_author(author).unwrap().is_none());
    let documents = SqliteDocumentRepository::try_new(&conn).unwrap();
    assert!(documents.get_document(d2).unwrap().unwrap().references.is_empty());
}

#[test]
fn duplicate_delivery_resolves_as_already_removed() {
    let conn = open_db_in_memory().unwrap();
    let (author, _, _) = seed(&conn);
    let first = publish(&conn, author);
    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    let snapshot = queue.get_message(first).unwrap().unwrap().payload;
    let duplicate = queue.publish(&Topic::new(TOPIC).unwrap(), &snapshot).unwrap();

    let consumer = sqlite_consumer(&conn, settings(3)).unwrap();
    let outcomes = consumer.drain().unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], DeliveryOutcome::Completed { .. }));
    assert_eq!(
        outcomes[1],
        DeliveryOutcome::AlreadyRemoved {
            message_id: duplicate,
            author_id: author,
        }
    );
    assert_eq!(
        queue.get_message(duplicate).unwrap().unwrap().status,
        MessageStatus::Acked
    );
}

#[test]
fn undecodable_payload_is_dead_lettered_immediately() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    let message_id = queue
        .publish(&Topic::new(TOPIC).unwrap(), "{not json")
        .unwrap();

    let consumer = sqlite_consumer(&conn, settings(5)).unwrap();
    let outcome = consumer.poll_once().unwrap().unwrap();
    assert!(matches!(outcome, DeliveryOutcome::DeadLettered { .. }));

    let message = queue.get_message(message_id).unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Dead);
    assert_eq!(message.attempts, 0);
    assert!(message.last_error.unwrap().contains("undecodable"));
}

#[test]
fn failing_cascade_is_retried_then_dead_lettered() {
    let conn = open_db_in_memory().unwrap();
    let (author, d1, _) = seed(&conn);
    let message_id = publish(&conn, author);

    // Break the store under the cascade: D1 vanishes between publish and consume,
    // but the author's link table still claims it.
    conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
    conn.execute("DELETE FROM documents WHERE id = ?1;", [d1])
        .unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();

    let consumer = sqlite_consumer(&conn, settings(2)).unwrap();
    let first = consumer.poll_once().unwrap().unwrap();
    assert_eq!(
        first,
        DeliveryOutcome::Retrying {
            message_id,
            attempts: 1,
            error_kind: CascadeErrorKind::ConsistencyViolation,
        }
    );

    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    let pending = queue.get_message(message_id).unwrap().unwrap();
    assert_eq!(pending.status, MessageStatus::Pending);
    assert_eq!(pending.attempts, 1);

    let second = consumer.poll_once().unwrap().unwrap();
    assert!(matches!(second, DeliveryOutcome::DeadLettered { .. }));
    let dead = queue.get_message(message_id).unwrap().unwrap();
    assert_eq!(dead.status, MessageStatus::Dead);
    assert_eq!(dead.attempts, 2);

    let authors = SqliteAuthorRepository::try_new(&conn).unwrap();
    assert!(authors.get_author(author).unwrap().is_some());
    assert!(consumer.poll_once().unwrap().is_none());
}

#[test]
fn retried_messages_yield_to_fresh_ones() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    let topic = Topic::new(TOPIC).unwrap();
    let first = queue.publish(&topic, r#"{"authorId":1}"#).unwrap();
    let second = queue.publish(&topic, r#"{"authorId":2}"#).unwrap();

    assert_eq!(queue.receive(&topic).unwrap().unwrap().message_id, first);
    assert_eq!(
        queue.retry(first, "boom", 5).unwrap(),
        RetryDecision::Redeliver { attempts: 1 }
    );
    assert_eq!(queue.receive(&topic).unwrap().unwrap().message_id, second);

    queue.ack(second).unwrap();
    let redelivered = queue.receive(&topic).unwrap().unwrap();
    assert_eq!(redelivered.message_id, first);
    assert_eq!(redelivered.attempts, 1);

    assert!(matches!(
        queue.ack(second),
        Err(MessagingError::NotClaimed {
            status: MessageStatus::Acked,
            ..
        })
    ));
    assert!(matches!(
        queue.ack(MessageId::new_v4()),
        Err(MessagingError::UnknownMessage(_))
    ));
}

#[test]
fn received_message_is_claimed_until_settled() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    let topic = Topic::new(TOPIC).unwrap();
    let message_id = queue.publish(&topic, r#"{"authorId":1}"#).unwrap();

    assert!(matches!(
        queue.ack(message_id),
        Err(MessagingError::NotClaimed {
            status: MessageStatus::Pending,
            ..
        })
    ));

    let delivery = queue.receive(&topic).unwrap().unwrap();
    assert_eq!(delivery.message_id, message_id);
    let claimed = queue.get_message(message_id).unwrap().unwrap();
    assert_eq!(claimed.status, MessageStatus::InFlight);
    assert!(claimed.claimed_at.is_some());
    assert!(queue.receive(&topic).unwrap().is_none());
    assert_eq!(queue.pending_count(&topic).unwrap(), 0);
    assert_eq!(queue.count(&topic, MessageStatus::InFlight).unwrap(), 1);

    queue.ack(message_id).unwrap();
    let acked = queue.get_message(message_id).unwrap().unwrap();
    assert_eq!(acked.status, MessageStatus::Acked);
    assert_eq!(acked.claimed_at, None);
}

#[test]
fn expired_claim_is_redelivered_as_a_failed_attempt() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteMessageQueue::try_new(&conn)
        .unwrap()
        .with_claim_lease(Duration::from_secs(30));
    let topic = Topic::new(TOPIC).unwrap();
    let message_id = queue.publish(&topic, r#"{"authorId":1}"#).unwrap();

    assert_eq!(queue.receive(&topic).unwrap().unwrap().attempts, 0);
    assert!(queue.receive(&topic).unwrap().is_none());

    // The first consumer went away without settling.
    conn.execute(
        "UPDATE cascade_messages SET claimed_at = claimed_at - 60000 WHERE message_id = ?1;",
        [message_id.to_string()],
    )
    .unwrap();

    let redelivered = queue.receive(&topic).unwrap().unwrap();
    assert_eq!(redelivered.message_id, message_id);
    assert_eq!(redelivered.attempts, 1);
    let message = queue.get_message(message_id).unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::InFlight);
    assert!(message.last_error.unwrap().contains("claim expired"));

    assert_eq!(
        queue.retry(message_id, "boom", 2).unwrap(),
        RetryDecision::DeadLettered { attempts: 2 }
    );
    assert_eq!(
        queue.get_message(message_id).unwrap().unwrap().status,
        MessageStatus::Dead
    );
}

#[test]
fn consumers_on_separate_connections_never_share_a_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docgraph.db");
    let conn_a = open_db(&path).unwrap();
    let conn_b = open_db(&path).unwrap();
    let (author, _, _) = seed(&conn_a);
    let first = publish(&conn_a, author);
    let second = SqliteMessageQueue::try_new(&conn_a)
        .unwrap()
        .publish(&Topic::new(TOPIC).unwrap(), r#"{"authorId":999}"#)
        .unwrap();

    let queue_b = SqliteMessageQueue::try_new(&conn_b).unwrap();
    let claimed_by_b = queue_b.receive(&Topic::new(TOPIC).unwrap()).unwrap().unwrap();
    assert_eq!(claimed_by_b.message_id, first);

    let consumer_a = sqlite_consumer(&conn_a, settings(3)).unwrap();
    let outcomes = consumer_a.drain().unwrap();
    assert_eq!(
        outcomes,
        vec![DeliveryOutcome::AlreadyRemoved {
            message_id: second,
            author_id: 999,
        }]
    );
    assert!(consumer_a.poll_once().unwrap().is_none());

    let authors = SqliteAuthorRepository::try_new(&conn_a).unwrap();
    assert!(authors.get_author(author).unwrap().is_some());

    queue_b.ack(first).unwrap();
    let queue_a = SqliteMessageQueue::try_new(&conn_a).unwrap();
    assert_eq!(
        queue_a.get_message(first).unwrap().unwrap().status,
        MessageStatus::Acked
    );
    assert!(consumer_a.drain().unwrap().is_empty());
}

#[test]
fn topics_are_isolated() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    queue
        .publish(&Topic::new("other-topic").unwrap(), r#"{"authorId":1}"#)
        .unwrap();

    let consumer = sqlite_consumer(&conn, settings(3)).unwrap();
    assert!(consumer.poll_once().unwrap().is_none());
    assert_eq!(
        queue.pending_count(&Topic::new("other-topic").unwrap()).unwrap(),
        1
    );
}

#[test]
fn consumer_runs_over_compensating_store() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    let store = MemoryStore::new();
    let author = store.insert_author("Ada", "Lovelace").unwrap();
    let d1 = store.insert_document(&draft("D1", author.id, &[])).unwrap();
    let owned = store.get_author(author.id).unwrap().unwrap();
    assert_eq!(owned.document_ids, BTreeSet::from([d1.id]));

    let producer = CascadeProducer::new(
        SqliteMessageQueue::try_new(&conn).unwrap(),
        Topic::new(TOPIC).unwrap(),
    );
    producer.publish_author_snapshot(&owned).unwrap();

    let consumer = CascadeConsumer::new(queue, CascadeCoordinator::new(store), settings(3));
    let outcomes = consumer.drain().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], DeliveryOutcome::Completed { .. }));
    assert!(consumer
        .coordinator()
        .store()
        .get_author(author.id)
        .unwrap()
        .is_none());
}

#[test]
fn invalid_topic_is_rejected() {
    assert!(matches!(
        Topic::new("Author Cascade"),
        Err(MessagingError::InvalidTopic(_))
    ));
    let config = MessagingConfig {
        topic: "-leading-dash".to_string(),
        ..MessagingConfig::default()
    };
    assert!(ConsumerSettings::from_config(&config).is_err());
}

#[test]
fn worker_consumes_on_its_own_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docgraph.db");
    let conn = open_db(&path).unwrap();
    let (author, _, d2) = seed(&conn);

    let config = MessagingConfig {
        poll_interval_ms: 10,
        ..MessagingConfig::default()
    };
    let worker = ConsumerWorker::spawn(&path, &config).unwrap();
    assert!(worker.is_running());

    let message_id = publish(&conn, author);
    let queue = SqliteMessageQueue::try_new(&conn).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while matches!(
        queue.get_message(message_id).unwrap().unwrap().status,
        MessageStatus::Pending | MessageStatus::InFlight
    ) {
        assert!(Instant::now() < deadline, "worker did not consume in time");
        thread::sleep(Duration::from_millis(10));
    }

    let stats = worker.shutdown().unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.transport_errors, 0);

    let documents = SqliteDocumentRepository::try_new(&conn).unwrap();
    assert!(documents.get_document(d2).unwrap().unwrap().references.is_empty());
}
