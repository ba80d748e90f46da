//! End-to-end scenarios across unit of work, repository, backend, cache and
//! event dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use trellis_core::{
    AggregateRoot, CoreError, CoreResult, DomainEvent, Entity, EntityId, EventQueue,
    ExpectedVersion,
};
use trellis_core::Outcome;
use trellis_dispatch::{Command, CommandHandler, EventDispatcher, Mediator};
use trellis_query::QuerySpec;

use crate::backend::StorageBackend;
use crate::cache::DocumentCache;
use crate::memory::InMemoryBackend;
use crate::repository::Stored;
use crate::unit_of_work::{StoreContext, UowState};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserCreated {
    user_id: EntityId,
    email: String,
    at: DateTime<Utc>,
}

impl DomainEvent for UserCreated {
    fn event_type(&self) -> &'static str {
        "user.created"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRenamed {
    user_id: EntityId,
    email: String,
    at: DateTime<Utc>,
}

impl DomainEvent for UserRenamed {
    fn event_type(&self) -> &'static str {
        "user.renamed"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: EntityId,
    email: String,
    version: u64,
    #[serde(default)]
    deleted: bool,
    #[serde(skip)]
    events: EventQueue,
}

impl User {
    fn create(email: impl Into<String>) -> CoreResult<Self> {
        let id = EntityId::new();
        let email = email.into();
        let mut user = Self {
            id,
            email: email.clone(),
            version: 0,
            deleted: false,
            events: EventQueue::new(),
        };
        user.events.record(
            id,
            &UserCreated {
                user_id: id,
                email,
                at: Utc::now(),
            },
        )?;
        user.version += 1;
        Ok(user)
    }

    fn rename(&mut self, email: impl Into<String>) -> CoreResult<()> {
        self.email = email.into();
        self.events.record(
            self.id,
            &UserRenamed {
                user_id: self.id,
                email: self.email.clone(),
                at: Utc::now(),
            },
        )?;
        self.version += 1;
        Ok(())
    }
}

impl Entity for User {
    type Id = EntityId;

    fn id(&self) -> &EntityId {
        &self.id
    }
}

impl AggregateRoot for User {
    fn version(&self) -> u64 {
        self.version
    }

    fn uncommitted_events(&self) -> &[trellis_core::EventRecord] {
        self.events.as_slice()
    }

    fn take_uncommitted_events(&mut self) -> Vec<trellis_core::EventRecord> {
        self.events.drain()
    }
}

impl Stored for User {
    const COLLECTION: &'static str = "users";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderItem {
    id: EntityId,
    sku: String,
    version: u64,
    #[serde(default)]
    deleted: bool,
    #[serde(skip)]
    events: EventQueue,
}

impl Entity for OrderItem {
    type Id = EntityId;

    fn id(&self) -> &EntityId {
        &self.id
    }
}

impl AggregateRoot for OrderItem {
    fn version(&self) -> u64 {
        self.version
    }

    fn uncommitted_events(&self) -> &[trellis_core::EventRecord] {
        self.events.as_slice()
    }

    fn take_uncommitted_events(&mut self) -> Vec<trellis_core::EventRecord> {
        self.events.drain()
    }
}

impl Stored for OrderItem {
    const COLLECTION: &'static str = "order_items";
}

struct Fixture {
    context: StoreContext,
    dispatcher: Arc<EventDispatcher>,
    backend: Arc<InMemoryBackend>,
}

fn fixture() -> Fixture {
    let backend = Arc::new(InMemoryBackend::new());
    let dispatcher = Arc::new(EventDispatcher::new());
    let context = StoreContext::new(
        backend.clone() as Arc<dyn StorageBackend>,
        dispatcher.clone(),
    );
    Fixture {
        context,
        dispatcher,
        backend,
    }
}

fn counting(dispatcher: &EventDispatcher, event_type: &str) -> Arc<AtomicU32> {
    let count = Arc::new(AtomicU32::new(0));
    let clone = count.clone();
    dispatcher.subscribe(event_type, "counter", move |_| {
        clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    count
}

struct CreateUser {
    email: String,
}

impl Command for CreateUser {
    type Output = EntityId;
}

struct CreateUserHandler {
    context: StoreContext,
}

impl CommandHandler<CreateUser> for CreateUserHandler {
    fn handle(&self, command: CreateUser) -> Outcome<EntityId, CoreError> {
        let run = || -> CoreResult<EntityId> {
            let mut user = User::create(command.email)?;
            let id = user.id;
            let uow = self.context.begin()?;
            uow.repository::<User>()?.create(&mut user)?;
            uow.commit()?;
            Ok(id)
        };
        run().into()
    }
}

#[test]
fn mediated_command_persists_and_dispatches_exactly_once() {
    let fx = fixture();
    let created = counting(&fx.dispatcher, "user.created");

    let mediator = Mediator::new();
    mediator
        .register_command::<CreateUser, _>(CreateUserHandler {
            context: fx.context.clone(),
        })
        .unwrap();

    let outcome = mediator.send(CreateUser {
        email: "a@b.com".into(),
    });
    let id = match outcome {
        Outcome::Success(id) => id,
        Outcome::Failure(err) => panic!("expected success, got {err:?}"),
    };

    assert_eq!(created.load(Ordering::SeqCst), 1);
    let reader = fx.context.begin().unwrap();
    let found = reader.repository::<User>().unwrap().get_or_fail(id).unwrap();
    assert_eq!(found.email, "a@b.com");
}

#[test]
fn equality_query_skips_the_soft_deleted_duplicate() {
    let fx = fixture();
    let uow = fx.context.begin().unwrap();
    let repo = uow.repository::<User>().unwrap();
    let mut kept = User::create("a@b.com").unwrap();
    let mut removed = User::create("a@b.com").unwrap();
    let mut other = User::create("x@y.com").unwrap();
    repo.create(&mut kept).unwrap();
    repo.create(&mut removed).unwrap();
    repo.create(&mut other).unwrap();
    uow.commit().unwrap();

    let uow = fx.context.begin().unwrap();
    uow.repository::<User>().unwrap().delete(removed.id).unwrap();
    uow.commit().unwrap();

    let reader = fx.context.begin().unwrap();
    let matches = reader
        .repository::<User>()
        .unwrap()
        .retrieve_by_specification(&QuerySpec::where_field("email").eq(json!("a@b.com")))
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, kept.id);
}

#[test]
fn created_aggregate_round_trips_and_dispatches_after_commit() {
    let fx = fixture();
    let created = counting(&fx.dispatcher, "user.created");

    let mut user = User::create("a@b.com").unwrap();
    let id = user.id;

    let uow = fx.context.begin().unwrap();
    uow.repository::<User>().unwrap().create(&mut user).unwrap();
    // Nothing dispatched before commit.
    assert_eq!(created.load(Ordering::SeqCst), 0);
    uow.commit().unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(uow.state(), UowState::Committed);

    let reader = fx.context.begin().unwrap();
    let found = reader.repository::<User>().unwrap().get_or_fail(id).unwrap();
    assert_eq!(found.email, "a@b.com");
    assert_eq!(found.version, 1);
    assert!(found.events.is_empty());
}

#[test]
fn soft_deleted_aggregates_vanish_from_guarded_reads() {
    let fx = fixture();
    let mut user = User::create("gone@b.com").unwrap();
    let id = user.id;

    let uow = fx.context.begin().unwrap();
    uow.repository::<User>().unwrap().create(&mut user).unwrap();
    uow.commit().unwrap();

    let uow = fx.context.begin().unwrap();
    uow.repository::<User>().unwrap().delete(id).unwrap();
    uow.commit().unwrap();

    let reader = fx.context.begin().unwrap();
    let repo = reader.repository::<User>().unwrap();
    assert!(repo.retrieve_by_id(id).unwrap().is_none());
    assert!(matches!(
        repo.get_or_fail(id).unwrap_err(),
        CoreError::NotFound(_)
    ));
    assert_eq!(repo.count_by_specification(&QuerySpec::new()).unwrap(), 0);

    // Opting out of the guard still reaches the document.
    let all = repo
        .retrieve_by_specification(&QuerySpec::new().include_deleted())
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].deleted);
}

#[test]
fn failed_commit_rolls_back_everything_and_dispatches_nothing() {
    let fx = fixture();
    let created = counting(&fx.dispatcher, "user.created");

    let uow = fx.context.begin().unwrap();
    let mut user = User::create("a@b.com").unwrap();
    uow.repository::<User>().unwrap().create(&mut user).unwrap();
    // Update of a never-persisted item fails validation at commit.
    uow.repository::<OrderItem>()
        .unwrap()
        .update(EntityId::new(), json!({"sku": "X"}), ExpectedVersion::Any)
        .unwrap();

    let err = uow.commit().unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(uow.state(), UowState::RolledBack);
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert_eq!(fx.backend.committed_len("users"), 0);
}

#[test]
fn commit_is_single_shot() {
    let fx = fixture();
    let uow = fx.context.begin().unwrap();
    uow.commit().unwrap();
    assert!(matches!(
        uow.commit().unwrap_err(),
        CoreError::InvalidState(_)
    ));
    assert!(matches!(
        uow.rollback().unwrap_err(),
        CoreError::InvalidState(_)
    ));
    assert!(matches!(
        uow.repository::<User>().unwrap_err(),
        CoreError::InvalidState(_)
    ));
}

#[test]
fn rollback_discards_writes_and_events() {
    let fx = fixture();
    let created = counting(&fx.dispatcher, "user.created");

    let uow = fx.context.begin().unwrap();
    let mut user = User::create("a@b.com").unwrap();
    uow.repository::<User>().unwrap().create(&mut user).unwrap();
    uow.rollback().unwrap();

    assert_eq!(uow.state(), UowState::RolledBack);
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert_eq!(fx.backend.committed_len("users"), 0);
}

#[test]
fn dropping_an_open_unit_of_work_rolls_back() {
    let fx = fixture();
    let created = counting(&fx.dispatcher, "user.created");

    {
        let uow = fx.context.begin().unwrap();
        let mut user = User::create("a@b.com").unwrap();
        uow.repository::<User>().unwrap().create(&mut user).unwrap();
    }

    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert_eq!(fx.backend.committed_len("users"), 0);
}

#[test]
fn stale_save_is_rejected_at_commit() {
    let fx = fixture();
    let mut user = User::create("a@b.com").unwrap();
    let id = user.id;

    let uow = fx.context.begin().unwrap();
    uow.repository::<User>().unwrap().create(&mut user).unwrap();
    uow.commit().unwrap();

    // Two sessions hydrate the same version and both try to save.
    let first = fx.context.begin().unwrap();
    let mut copy_a = first.repository::<User>().unwrap().get_or_fail(id).unwrap();
    let second = fx.context.begin().unwrap();
    let mut copy_b = second.repository::<User>().unwrap().get_or_fail(id).unwrap();

    copy_a.rename("first@b.com").unwrap();
    first.repository::<User>().unwrap().save(&mut copy_a).unwrap();
    first.commit().unwrap();

    copy_b.rename("second@b.com").unwrap();
    second.repository::<User>().unwrap().save(&mut copy_b).unwrap();
    assert!(matches!(
        second.commit().unwrap_err(),
        CoreError::Conflict(_)
    ));

    let reader = fx.context.begin().unwrap();
    let stored = reader.repository::<User>().unwrap().get_or_fail(id).unwrap();
    assert_eq!(stored.email, "first@b.com");
    assert_eq!(stored.version, 2);
}

#[test]
fn specification_queries_filter_sort_and_paginate() {
    let fx = fixture();
    let uow = fx.context.begin().unwrap();
    let repo = uow.repository::<User>().unwrap();
    for n in 1..=25 {
        let mut user = User::create(format!("user{n:02}@b.com")).unwrap();
        repo.create(&mut user).unwrap();
    }
    uow.commit().unwrap();

    let reader = fx.context.begin().unwrap();
    let repo = reader.repository::<User>().unwrap();
    let spec = QuerySpec::where_field("email")
        .like("user%@b.com")
        .order_by("email")
        .paginate(2, 10)
        .unwrap();

    let page = repo
        .retrieve_by_specification(&spec)
        .unwrap()
        .collect_all()
        .unwrap();
    let emails: Vec<&str> = page.iter().map(|u| u.email.as_str()).collect();
    assert_eq!(emails.len(), 10);
    assert_eq!(emails[0], "user11@b.com");
    assert_eq!(emails[9], "user20@b.com");

    // Count ignores pagination.
    assert_eq!(repo.count_by_specification(&spec).unwrap(), 25);
}

#[test]
fn shared_cache_never_serves_overwritten_documents() {
    let backend = Arc::new(InMemoryBackend::new());
    let dispatcher = Arc::new(EventDispatcher::new());
    let cache = Arc::new(DocumentCache::new(16));
    let context = StoreContext::new(backend as Arc<dyn StorageBackend>, dispatcher)
        .with_cache(cache.clone());

    let mut user = User::create("a@b.com").unwrap();
    let id = user.id;
    let uow = context.begin().unwrap();
    uow.repository::<User>().unwrap().create(&mut user).unwrap();
    uow.commit().unwrap();

    // Warm the cache.
    let reader = context.begin().unwrap();
    reader.repository::<User>().unwrap().get_or_fail(id).unwrap();
    assert_eq!(cache.len(), 1);

    // A write through another unit of work invalidates the shared entry.
    let writer = context.begin().unwrap();
    let mut fresh = writer.repository::<User>().unwrap().get_or_fail(id).unwrap();
    fresh.rename("new@b.com").unwrap();
    writer.repository::<User>().unwrap().save(&mut fresh).unwrap();
    writer.commit().unwrap();

    let check = context.begin().unwrap();
    let stored = check.repository::<User>().unwrap().get_or_fail(id).unwrap();
    assert_eq!(stored.email, "new@b.com");
}

#[test]
fn cache_never_serves_a_rolled_back_write() {
    let backend = Arc::new(InMemoryBackend::new());
    let dispatcher = Arc::new(EventDispatcher::new());
    let cache = Arc::new(DocumentCache::new(16));
    let context = StoreContext::new(backend as Arc<dyn StorageBackend>, dispatcher)
        .with_cache(cache.clone());

    let mut user = User::create("a@b.com").unwrap();
    let id = user.id;
    let uow = context.begin().unwrap();
    uow.repository::<User>().unwrap().create(&mut user).unwrap();
    uow.commit().unwrap();

    // Stage a rename, re-read our own staged state, then abandon it.
    let doomed = context.begin().unwrap();
    let repo = doomed.repository::<User>().unwrap();
    let mut copy = repo.get_or_fail(id).unwrap();
    copy.rename("dirty@b.com").unwrap();
    repo.save(&mut copy).unwrap();
    let staged = repo.get_or_fail(id).unwrap();
    assert_eq!(staged.email, "dirty@b.com");
    doomed.rollback().unwrap();

    let reader = context.begin().unwrap();
    let stored = reader.repository::<User>().unwrap().get_or_fail(id).unwrap();
    assert_eq!(stored.email, "a@b.com");
}

#[test]
fn timeout_rolls_back_the_owning_unit_of_work() {
    let backend = Arc::new(InMemoryBackend::new());
    let dispatcher = Arc::new(EventDispatcher::new());
    let context = StoreContext::new(backend as Arc<dyn StorageBackend>, dispatcher)
        .with_timeout(Duration::ZERO);

    let uow = context.begin().unwrap();
    let repo = uow.repository::<User>().unwrap();
    let err = repo.retrieve_by_id(EntityId::new()).unwrap_err();
    assert!(matches!(err, CoreError::Timeout(_)));

    assert_eq!(uow.state(), UowState::RolledBack);
    assert!(matches!(
        uow.commit().unwrap_err(),
        CoreError::InvalidState(_)
    ));
}

#[test]
fn zero_timeout_surfaces_as_timeout_error() {
    let backend = Arc::new(InMemoryBackend::new());
    let dispatcher = Arc::new(EventDispatcher::new());
    let context = StoreContext::new(backend as Arc<dyn StorageBackend>, dispatcher)
        .with_timeout(Duration::ZERO);

    let uow = context.begin().unwrap();
    let err = uow
        .repository::<User>()
        .unwrap()
        .retrieve_by_id(EntityId::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::Timeout(_)));
}

#[test]
fn partial_delivery_failure_surfaces_while_the_commit_stands() {
    let fx = fixture();
    fx.dispatcher.subscribe("user.created", "failing", |_| {
        Err(CoreError::storage("projection store down"))
    });

    let mut user = User::create("a@b.com").unwrap();
    let id = user.id;
    let uow = fx.context.begin().unwrap();
    uow.repository::<User>().unwrap().create(&mut user).unwrap();

    let err = uow.commit().unwrap_err();
    assert!(matches!(err, CoreError::Unexpected(_)));
    assert_eq!(uow.state(), UowState::Committed);

    // The write survived the delivery failure.
    let reader = fx.context.begin().unwrap();
    assert!(reader.repository::<User>().unwrap().retrieve_by_id(id).unwrap().is_some());
}
