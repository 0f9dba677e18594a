/// Moderation core against a file-backed database
///
/// Exercises the properties that depend on real connection concurrency:
/// concurrent bans on one target, and counters staying equal to the ledger.
use modguard::admin::{
    ActionKind, ActionLedger, AggregateCounters, BanRegistry, ModerationManager, NewAction,
    RoleRegistry,
};
use modguard::db::{Database, DatabaseOptions};
use modguard::ModError;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    _dir: TempDir,
    db: Database,
    roles: RoleRegistry,
    ledger: ActionLedger,
    counters: AggregateCounters,
    bans: BanRegistry,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("modguard.sqlite");
    let db = Database::open(&path, DatabaseOptions::default())
        .await
        .unwrap();

    let roles = RoleRegistry::new(db.clone());
    roles.assign_role("mod1", "Moderator", None).await.unwrap();
    roles.assign_role("mod2", "Administrator", None).await.unwrap();
    roles
        .assign_role("junior", "Junior Moderator", None)
        .await
        .unwrap();

    Harness {
        roles,
        ledger: ActionLedger::new(db.clone(), 500),
        counters: AggregateCounters::new(db.clone()),
        bans: BanRegistry::new(db.clone()),
        db,
        _dir: dir,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bans_on_one_user_yield_one_entry() {
    let h = harness().await;

    let first = h.bans.clone();
    let second = h.bans.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.ban("@userA", "spam", "mod1").await }),
        tokio::spawn(async move { second.ban("@userA", "flood", "mod2").await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let already = results
        .iter()
        .filter(|r| matches!(r, Err(ModError::AlreadyBanned(_))))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(already, 1);

    let history = h.ledger.history("@userA").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, ActionKind::Ban);
    assert_eq!(h.counters.snapshot().await.unwrap().total_bans, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_keep_counters_equal_to_ledger() {
    let h = harness().await;

    let tasks: Vec<_> = (0..30)
        .map(|i| {
            let ledger = h.ledger.clone();
            let kind = ActionKind::ALL[i % 3];
            tokio::spawn(async move {
                ledger
                    .record(NewAction::new("mod1", kind, &format!("@user{}", i), "test"))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_ok!(result.unwrap());
    }

    let audit = h.counters.audit().await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.cached.total_bans, 10);
    assert_eq!(audit.cached.total_mutes, 10);
    assert_eq!(audit.cached.total_warns, 10);
    assert_eq!(h.ledger.len().await.unwrap(), 30);
}

#[tokio::test]
async fn rejected_actions_leave_counters_untouched() {
    let h = harness().await;

    assert_err!(
        h.ledger
            .record(NewAction::new("junior", ActionKind::Ban, "@u1", "spam"))
            .await
    );
    assert_err!(
        h.ledger
            .record(NewAction::new("", ActionKind::Warn, "@u1", "spam"))
            .await
    );
    assert_ok!(
        h.ledger
            .record(NewAction::new("junior", ActionKind::Warn, "@u1", "spam"))
            .await
    );

    let snapshot = h.counters.snapshot().await.unwrap();
    assert_eq!(snapshot.total_bans, 0);
    assert_eq!(snapshot.total_warns, 1);
    assert!(h.counters.audit().await.unwrap().is_consistent());
}

#[tokio::test]
async fn failed_registry_writes_leave_no_ledger_entry() {
    let h = harness().await;

    for table in ["banned_users", "muted_users"] {
        sqlx::query(&format!(
            "CREATE TRIGGER reject_{table} BEFORE INSERT ON {table} \
             BEGIN SELECT RAISE(ABORT, 'disabled'); END"
        ))
        .execute(h.db.pool())
        .await
        .unwrap();
    }

    assert_err!(h.bans.ban("@u1", "spam", "mod1").await);
    assert_err!(
        ModerationManager::new(h.db.clone(), 60, 3)
            .mute("@u1", "flood", "mod1", None)
            .await
    );

    assert!(!h.bans.is_banned("@u1").await.unwrap());
    assert_eq!(h.ledger.len().await.unwrap(), 0);
    let snapshot = h.counters.snapshot().await.unwrap();
    assert_eq!(snapshot.total_bans, 0);
    assert_eq!(snapshot.total_mutes, 0);
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("modguard.sqlite");

    {
        let db = Database::open(&path, DatabaseOptions::default())
            .await
            .unwrap();
        RoleRegistry::new(db.clone())
            .assign_role("mod1", "Moderator", None)
            .await
            .unwrap();
        BanRegistry::new(db.clone())
            .ban("@spammer123", "spam", "mod1")
            .await
            .unwrap();
        ModerationManager::new(db.clone(), 60, 3)
            .mute("@user456", "flood", "mod1", None)
            .await
            .unwrap();
        db.pool().close().await;
    }

    let db = Database::open(&path, DatabaseOptions::default())
        .await
        .unwrap();
    assert!(BanRegistry::new(db.clone())
        .is_banned("@spammer123")
        .await
        .unwrap());
    assert!(ModerationManager::new(db.clone(), 60, 3)
        .is_muted("@user456")
        .await
        .unwrap());

    let snapshot = AggregateCounters::new(db).snapshot().await.unwrap();
    assert_eq!(snapshot.total_bans, 1);
    assert_eq!(snapshot.total_mutes, 1);
}

#[tokio::test]
async fn role_change_takes_effect_immediately() {
    let h = harness().await;

    assert!(matches!(
        h.bans.ban("@u1", "spam", "junior").await,
        Err(ModError::Authorization(_))
    ));

    h.roles
        .assign_role("junior", "Moderator", Some("mod2"))
        .await
        .unwrap();
    assert_ok!(h.bans.ban("@u1", "spam", "junior").await);

    h.roles.revoke_role("junior").await.unwrap();
    assert!(matches!(
        h.bans.ban("@u2", "spam", "junior").await,
        Err(ModError::Authorization(_))
    ));

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM banned_users")
        .fetch_one(h.db.pool())
        .await
        .unwrap();
    assert_eq!(total, 1);
}
