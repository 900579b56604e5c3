//! Cross-attachment coherency tests
//!
//! Several caches sharing one `LocalLockManager` stand in for separate
//! processes attached to the same database.

#[path = "testutils/mod.rs"]
mod testutils;

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use stmtcache::{
    BlockingCallback, CacheError, CacheResult, CompileContext, DistributedLock, LocalLockManager,
    LockLevel, LockManager, LockWait, RoleContext, StatementCache, StatementCacheConfig,
};
use testutils::test_fixture::{CacheFixture, TestStatement};

fn noop() -> BlockingCallback {
    Arc::new(|| {})
}

#[test]
fn test_lock_taken_on_first_put() {
    let fixture = CacheFixture::new(10_000);
    let cache = &fixture.cache;
    let resource = cache.coherency_resource();

    assert!(cache.get("SELECT 1", &fixture.ctx(), &fixture.role()).unwrap().is_none());
    assert!(fixture.lock_manager.granted_levels(&resource).is_empty());

    fixture.put_idle("SELECT 1", 100);
    assert_eq!(cache.coherency_level(), LockLevel::SharedRead);
    assert_eq!(fixture.lock_manager.granted_levels(&resource), vec![LockLevel::SharedRead]);
}

#[test]
fn test_purge_all_attachments_purges_peers() {
    let fixture = CacheFixture::new(10_000);
    let local = &fixture.cache;
    let remote = fixture.peer("fixture.fdb", StatementCacheConfig::default());
    let (ctx, role) = (fixture.ctx(), fixture.role());

    let running = local.put("SELECT * FROM RDB$RELATIONS", &ctx, &role, TestStatement::new(100));
    let id = running.execute();
    fixture.put_idle("SELECT 2", 100);
    drop(remote.put("SELECT 3", &ctx, &role, TestStatement::new(100)));
    assert_eq!(local.len(), 2);
    assert_eq!(remote.len(), 1);

    remote.purge_all_attachments().unwrap();

    assert!(remote.is_empty());
    assert!(local.is_empty());
    assert_eq!(local.coherency_level(), LockLevel::None);
    assert_eq!(remote.coherency_level(), LockLevel::None);
    assert!(fixture
        .lock_manager
        .granted_levels(&local.coherency_resource())
        .is_empty());

    // A statement in use survives the purge and releases cleanly
    assert!(!running.is_cached());
    assert_eq!(running.execute(), id);
    drop(running);
    assert!(local.is_empty());

    // Caching resumes afterwards
    fixture.put_idle("SELECT * FROM RDB$RELATIONS", 100);
    assert!(local.contains("SELECT * FROM RDB$RELATIONS", &ctx));
    assert_eq!(local.coherency_level(), LockLevel::SharedRead);
    fixture.assert_consistent();
    remote.verify_consistency().unwrap();
}

#[test]
fn test_other_databases_are_untouched() {
    let fixture = CacheFixture::new(10_000);
    let other = fixture.peer("other.fdb", StatementCacheConfig::default());
    let (ctx, role) = (fixture.ctx(), fixture.role());

    drop(other.put("SELECT 1", &ctx, &role, TestStatement::new(100)));
    fixture.put_idle("SELECT 1", 100);

    fixture.cache.purge_all_attachments().unwrap();

    assert!(fixture.cache.is_empty());
    assert_eq!(other.len(), 1);
    assert_eq!(other.coherency_level(), LockLevel::SharedRead);
}

#[test]
fn test_put_skipped_while_peer_holds_exclusive() {
    let fixture = CacheFixture::new(10_000);
    let cache = &fixture.cache;
    let (ctx, role) = (fixture.ctx(), fixture.role());

    let foreign = fixture
        .lock_manager
        .create_lock(&cache.coherency_resource(), noop());
    assert!(foreign.acquire(LockLevel::Exclusive, LockWait::NoWait));

    let handle = cache.put("SELECT 1", &ctx, &role, TestStatement::new(100));
    assert!(!handle.is_cached());
    assert!(handle.execute() > 0);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().skipped_inserts, 1);
    drop(handle);

    foreign.release();
    let handle = cache.put("SELECT 1", &ctx, &role, TestStatement::new(100));
    assert!(handle.is_cached());
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_purge_all_attachments_times_out() {
    let config = StatementCacheConfig {
        lock_timeout: Some(Duration::from_millis(50)),
        ..StatementCacheConfig::with_max_size(10_000)
    };
    let fixture = CacheFixture::with_config(config);
    let cache = &fixture.cache;

    // A holder whose callback ignores the request
    let stubborn = fixture
        .lock_manager
        .create_lock(&cache.coherency_resource(), noop());
    assert!(stubborn.acquire(LockLevel::SharedRead, LockWait::NoWait));

    fixture.put_idle("SELECT 1", 100);
    let result = cache.purge_all_attachments();

    assert_eq!(result, Err(CacheError::LockTimeout(Duration::from_millis(50))));
    // The local part of the purge still happened
    assert!(cache.is_empty());
    assert_eq!(cache.coherency_level(), LockLevel::None);

    drop(stubborn);
    assert!(cache.purge_all_attachments().is_ok());
}

#[test]
fn test_purge_all_attachments_with_unrepresentable_timeout() {
    let json = r#"{
        "max_size_bytes": 4096,
        "lock_timeout": { "secs": 18446744073709551615, "nanos": 0 }
    }"#;
    let config = StatementCacheConfig::from_json_str(json).unwrap();
    let fixture = CacheFixture::with_config(config.clone());
    let peer = fixture.peer("fixture.fdb", config);

    fixture.put_idle("SELECT 1", 100);
    drop(peer.put("SELECT 1", &fixture.ctx(), &fixture.role(), TestStatement::new(100)));

    // The peer's callback releases its lock, so the wait ends without a deadline
    fixture.cache.purge_all_attachments().unwrap();
    assert!(peer.is_empty());
    assert_eq!(peer.coherency_level(), LockLevel::None);
}

#[test]
fn test_peer_dropped_releases_lock() {
    let fixture = CacheFixture::new(10_000);
    let peer = fixture.peer("fixture.fdb", StatementCacheConfig::default());
    let resource = peer.coherency_resource();

    drop(peer.put("SELECT 1", &fixture.ctx(), &fixture.role(), TestStatement::new(100)));
    assert_eq!(fixture.lock_manager.granted_levels(&resource), vec![LockLevel::SharedRead]);

    drop(peer);
    assert!(fixture.lock_manager.granted_levels(&resource).is_empty());
}

#[test]
fn test_purges_racing_with_sessions() {
    let config = StatementCacheConfig {
        lock_timeout: Some(Duration::from_secs(2)),
        ..StatementCacheConfig::with_max_size(2_000)
    };
    let fixture = CacheFixture::with_config(config.clone());
    let local = fixture.cache.clone();
    let remote = fixture.peer("fixture.fdb", config);

    let sessions: Vec<_> = (0..4)
        .map(|session| {
            let cache = local.clone();
            std::thread::spawn(move || {
                let ctx = CompileContext::default();
                let role = RoleContext::new(["PUBLIC"]);
                let compiler = |_text: &str, _ctx: &CompileContext| -> CacheResult<TestStatement> {
                    Ok(TestStatement::new(150))
                };

                for i in 0..300 {
                    let text = format!("SELECT {} FROM RDB$DATABASE", (i + session) % 25);
                    let handle = cache.prepare(&text, &ctx, &role, &compiler).unwrap();
                    handle.execute();
                }
            })
        })
        .collect();

    for _ in 0..20 {
        let result = remote.purge_all_attachments();
        assert!(
            matches!(result, Ok(()) | Err(CacheError::LockTimeout(_))),
            "unexpected purge result: {:?}",
            result
        );
        std::thread::sleep(Duration::from_millis(2));
    }

    for session in sessions {
        session.join().unwrap();
    }

    let stats = local.stats();
    assert_eq!(stats.active_entries, 0);
    assert!(stats.inactive_bytes <= 2_000);
    fixture.assert_consistent();
    remote.verify_consistency().unwrap();
}

#[test]
#[serial]
fn test_global_lock_manager_links_caches() {
    testutils::test_fixture::init_logging();
    let database = "global_lock_manager.fdb";
    let first = StatementCache::<TestStatement>::new(
        StatementCacheConfig::default(),
        database,
        LocalLockManager::global(),
        Arc::new(stmtcache::AllowAll),
    );
    let second = StatementCache::<TestStatement>::new(
        StatementCacheConfig::default(),
        database,
        LocalLockManager::global(),
        Arc::new(stmtcache::AllowAll),
    );
    let ctx = CompileContext::default();
    let role = RoleContext::default();

    drop(first.put("SELECT 1", &ctx, &role, TestStatement::new(100)));
    drop(second.put("SELECT 1", &ctx, &role, TestStatement::new(100)));
    assert_eq!(
        LocalLockManager::global().granted_levels(&first.coherency_resource()),
        vec![LockLevel::SharedRead, LockLevel::SharedRead]
    );

    second.purge_all_attachments().unwrap();
    assert!(first.is_empty());
    assert!(second.is_empty());

    first.shutdown();
    second.shutdown();
    assert!(LocalLockManager::global()
        .granted_levels(&first.coherency_resource())
        .is_empty());
}
