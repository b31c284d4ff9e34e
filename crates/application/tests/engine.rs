use std::sync::Arc;
use std::time::Duration;

use application::{
    ChatEvent, ChatRegistry, ChatRegistryDependencies, Clock, EventBus, MemoryStore, PageRequest,
    PasswordHasher, PasswordHasherError, PresenceTable, RegisterUserRequest, RetryPolicy,
    SessionCoordinator, SessionCoordinatorDependencies, SessionHandle, SystemClock, UserService,
    UserServiceDependencies,
};
use async_trait::async_trait;
use config::{EventsConfig, FanoutScope};
use domain::{ChatKey, MessageContent, PasswordHash, Username};

struct PlainHasher;

#[async_trait]
impl PasswordHasher for PlainHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}

struct Engine {
    users: Arc<UserService>,
    registry: Arc<ChatRegistry>,
    presence: Arc<PresenceTable>,
    coordinator: Arc<SessionCoordinator>,
}

fn engine() -> Engine {
    let store = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let users = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: store.clone(),
        password_hasher: Arc::new(PlainHasher),
        clock: clock.clone(),
    }));
    let registry = Arc::new(ChatRegistry::new(ChatRegistryDependencies {
        user_repository: store.clone(),
        chat_repository: store.clone(),
        clock: clock.clone(),
        retry: RetryPolicy::default(),
    }));
    let presence = Arc::new(PresenceTable::new());
    let coordinator = Arc::new(SessionCoordinator::new(SessionCoordinatorDependencies {
        presence: presence.clone(),
        event_bus: Arc::new(EventBus::new(&EventsConfig {
            listener_buffer: 64,
            fanout: FanoutScope::Participants,
        })),
        registry: registry.clone(),
        user_repository: store,
        credentials: users.clone(),
        clock,
        retry: RetryPolicy::default(),
        eviction_timeout: Duration::from_millis(100),
    }));
    Engine {
        users,
        registry,
        presence,
        coordinator,
    }
}

async fn register(engine: &Engine, username: &str) -> Username {
    engine
        .users
        .register(RegisterUserRequest {
            username: username.into(),
            email: format!("{username}@example.com"),
            password: "pw".into(),
        })
        .await
        .unwrap()
        .username
}

#[tokio::test]
async fn alice_and_bob_exchange_messages() {
    let engine = engine();
    let alice = register(&engine, "alice").await;
    let bob = register(&engine, "bob").await;

    let (chat, created) = engine
        .registry
        .get_or_create_chat(&[alice.clone(), bob.clone()])
        .await
        .unwrap();
    assert!(created);

    let now = SystemClock.now();
    engine
        .registry
        .append_message(&chat.key, &alice, MessageContent::new("hi").unwrap(), now)
        .await
        .unwrap();
    engine
        .registry
        .append_message(&chat.key, &bob, MessageContent::new("hey").unwrap(), now)
        .await
        .unwrap();

    let messages = engine
        .registry
        .list_messages(&chat.key, PageRequest::new(0, 10).unwrap())
        .await
        .unwrap();
    let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hi", "hey"]);

    let chat = engine.registry.find_chat(&chat.key).await.unwrap();
    assert_eq!(chat.unread_count, 1);
    assert_eq!(chat.last_updated_by, Some(bob));
}

#[tokio::test]
async fn message_slices_follow_append_order() {
    let engine = engine();
    let alice = register(&engine, "alice").await;
    let bob = register(&engine, "bob").await;
    let (chat, _) = engine
        .registry
        .get_or_create_chat(&[alice.clone(), bob])
        .await
        .unwrap();
    for text in ["m1", "m2", "m3"] {
        engine
            .registry
            .append_message(
                &chat.key,
                &alice,
                MessageContent::new(text).unwrap(),
                SystemClock.now(),
            )
            .await
            .unwrap();
    }

    let slice = |skip, limit| {
        let registry = engine.registry.clone();
        let key = chat.key.clone();
        async move {
            registry
                .list_messages(&key, PageRequest::new(skip, limit).unwrap())
                .await
                .unwrap()
                .into_iter()
                .map(|m| m.content.as_str().to_string())
                .collect::<Vec<_>>()
        }
    };
    assert_eq!(slice(0, 2).await, vec!["m1", "m2"]);
    assert_eq!(slice(2, 2).await, vec!["m3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation_yields_one_chat() {
    let engine = engine();
    let alice = register(&engine, "alice").await;
    let bob = register(&engine, "bob").await;

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let registry = engine.registry.clone();
            let participants = vec![bob.clone(), alice.clone()];
            tokio::spawn(async move { registry.get_or_create_chat(&participants).await.unwrap() })
        })
        .collect();

    let mut created = 0;
    let mut keys = Vec::new();
    for task in tasks {
        let (chat, was_created) = task.await.unwrap();
        created += usize::from(was_created);
        keys.push(chat.key);
    }
    assert_eq!(created, 1);
    let expected = ChatKey::canonical([alice, bob].iter()).unwrap();
    assert!(keys.iter().all(|key| *key == expected));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_keep_metadata_consistent() {
    let engine = engine();
    let alice = register(&engine, "alice").await;
    let bob = register(&engine, "bob").await;
    let (chat, _) = engine
        .registry
        .get_or_create_chat(&[alice.clone(), bob.clone()])
        .await
        .unwrap();

    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let registry = engine.registry.clone();
            let key = chat.key.clone();
            let sender = if i % 2 == 0 { alice.clone() } else { bob.clone() };
            tokio::spawn(async move {
                registry
                    .append_message(
                        &key,
                        &sender,
                        MessageContent::new(format!("m{i}")).unwrap(),
                        SystemClock.now(),
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let stored = engine.registry.find_chat(&chat.key).await.unwrap();
    assert_eq!(stored.message_count, 100);

    let messages = engine
        .registry
        .list_messages(&chat.key, PageRequest::new(0, 100).unwrap())
        .await
        .unwrap();
    assert_eq!(messages.len(), 100);

    let last = messages.last().unwrap();
    let trailing_run = messages
        .iter()
        .rev()
        .take_while(|m| m.sender == last.sender)
        .count();
    assert_eq!(stored.unread_count as usize, trailing_run);
    assert_eq!(stored.last_updated_by.as_ref(), Some(&last.sender));
    assert_eq!(stored.latest_message_preview, last.content.as_str());
}

#[tokio::test]
async fn stale_removal_does_not_take_user_offline() {
    let engine = engine();
    let alice = register(&engine, "alice").await;
    let now = SystemClock.now();

    let (s1, _g1) = SessionHandle::new(alice.clone(), now);
    let (s2, _g2) = SessionHandle::new(alice.clone(), now);
    assert!(engine.presence.admit(s1.clone()).is_none());
    assert_eq!(engine.presence.admit(s2.clone()).unwrap().id(), s1.id());

    assert!(!engine.presence.remove(&alice, s1.id()));
    assert!(engine.presence.is_online(&alice));
    assert!(engine.presence.remove(&alice, s2.id()));
    assert!(!engine.presence.is_online(&alice));
}

#[tokio::test]
async fn reconnect_race_keeps_latest_session_online() {
    let engine = engine();
    register(&engine, "alice").await;
    let bob = register(&engine, "bob").await;

    let mut bob_conn = engine.coordinator.open();
    engine
        .coordinator
        .authenticate(&mut bob_conn, "bob", "pw")
        .await
        .unwrap();
    let mut watcher = engine.coordinator.on_connect(&mut bob_conn).await.unwrap();

    // 第一个连接：收到关闭请求后由任务自行断开
    let mut first = engine.coordinator.open();
    engine
        .coordinator
        .authenticate(&mut first, "alice", "pw")
        .await
        .unwrap();
    let first_session = engine.coordinator.on_connect(&mut first).await.unwrap();
    let coordinator = engine.coordinator.clone();
    let first_task = tokio::spawn(async move {
        first_session.handle.shutdown_requested().await;
        let went_offline = coordinator.on_disconnect(&mut first).await;
        drop(first_session.guard);
        went_offline
    });

    let mut second = engine.coordinator.open();
    engine
        .coordinator
        .authenticate(&mut second, "alice", "pw")
        .await
        .unwrap();
    let _second_session = engine.coordinator.on_connect(&mut second).await.unwrap();

    assert!(!first_task.await.unwrap());
    let alice = Username::parse("alice").unwrap();
    assert!(engine.coordinator.is_online(&alice));

    // bob 从未收到 alice 的下线通知
    let mut saw_offline = false;
    while let Some(event) = watcher.events.try_recv() {
        if let ChatEvent::Presence {
            username,
            online: false,
            ..
        } = event
        {
            saw_offline |= username == alice;
        }
    }
    assert!(!saw_offline);
    assert!(engine.coordinator.is_online(&bob));
}
