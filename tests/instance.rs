//! Instance pool, reclaim and row id tests.

mod common;

use common::{create_tenant, manual_clock, memory_store, temp_test_dir, test_pool};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tenantplane::core::config::{PoolConfig, PoolSettings};
use tenantplane::core::error::PlaneError;
use tenantplane::core::ids::{InstanceId, SessionId, TenantId};
use tenantplane::core::time::{Clock, ManualClock, SystemClock, Timestamp};
use tenantplane::instance::rowid::INSTANCE_ID_MASK;
use tenantplane::instance::{InstancePool, ReclaimLoop, RowIdGenerator, SlotState};
use tenantplane::store::{FileStore, StateBackend};
use tokio::sync::watch;

// ============================================================================
// Claim tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_return_distinct_ids() {
    let store = memory_store();
    let tenant = create_tenant(store.as_ref(), "app");
    let config = PoolConfig {
        claim_max_retries: 64,
        ..PoolConfig::default()
    };
    let pool = InstancePool::new(store.clone(), Arc::new(SystemClock), &config);
    pool.replenish_once(tenant, 3).unwrap();

    let mut handles = Vec::new();
    for i in 0..12 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.claim(tenant, &format!("10.0.0.{}:26257", i), SessionId::generate())
                .await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let claimed = handle.await.unwrap().unwrap();
        assert!(ids.insert(claimed.instance_id), "duplicate {}", claimed.instance_id);
    }
    assert_eq!(ids.len(), 12);
    assert_eq!(pool.counts(tenant).unwrap().live, 12);
}

#[tokio::test]
async fn claims_across_file_store_handles_are_distinct() {
    let dir = temp_test_dir();
    let path = dir.path().join("plane.db");
    let first = Arc::new(FileStore::open(&path).unwrap());
    let second = Arc::new(FileStore::open(&path).unwrap());
    let tenant = create_tenant(first.as_ref(), "app");

    let clock = manual_clock();
    let a = InstancePool::new(first, clock.clone(), &PoolConfig::default());
    let b = InstancePool::new(second, clock, &PoolConfig::default());
    a.replenish_once(tenant, 1).unwrap();

    let x = a.claim(tenant, "a:1", SessionId::generate()).await.unwrap();
    let y = b.claim(tenant, "b:1", SessionId::generate()).await.unwrap();
    assert_ne!(x.instance_id, y.instance_id);
    assert_eq!(b.counts(tenant).unwrap().live, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn claims_race_replenish_across_file_store_handles() {
    let dir = temp_test_dir();
    let path = dir.path().join("plane.db");
    let config = PoolConfig {
        claim_max_retries: 64,
        ..PoolConfig::default()
    };
    let pools: Vec<InstancePool> = (0..3)
        .map(|_| {
            let store = Arc::new(FileStore::open(&path).unwrap());
            InstancePool::new(store, Arc::new(SystemClock), &config)
        })
        .collect();
    let tenant = create_tenant(&FileStore::open(&path).unwrap(), "app");

    // Workers that are already running before the race starts.
    pools[0].replenish_once(tenant, 2).unwrap();
    let mut running = Vec::new();
    for i in 0..2 {
        running.push(
            pools[i]
                .claim(tenant, &format!("running:{}", i), SessionId::generate())
                .await
                .unwrap(),
        );
    }

    let reclaimer = {
        let pool = pools[2].clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..20 {
                pool.replenish_once(tenant, 4).unwrap();
            }
        })
    };
    let mut claims = Vec::new();
    for i in 0..12 {
        let pool = pools[i % pools.len()].clone();
        claims.push(tokio::spawn(async move {
            pool.claim(tenant, &format!("10.0.0.{}:26257", i), SessionId::generate())
                .await
        }));
    }

    let mut ids: HashSet<InstanceId> = running.iter().map(|c| c.instance_id).collect();
    for claim in claims {
        let claimed = claim.await.unwrap().unwrap();
        assert!(ids.insert(claimed.instance_id), "duplicate {}", claimed.instance_id);
    }
    reclaimer.await.unwrap();
    assert_eq!(ids.len(), 14);

    let now = SystemClock.now();
    let slots = pools[1].slots(tenant).unwrap();
    for held in &running {
        let slot = slots
            .iter()
            .find(|s| s.instance_id == held.instance_id)
            .unwrap();
        assert!(slot.is_held_by(held.session_id));
        assert_eq!(slot.state(now), SlotState::Live);
        assert_eq!(slot.address.as_deref(), Some(held.address.as_str()));
    }
    assert_eq!(pools[1].counts(tenant).unwrap().live, 14);
}

#[tokio::test(flavor = "current_thread")]
async fn contended_store_lock_does_not_stall_other_tasks() {
    let dir = temp_test_dir();
    let path = dir.path().join("plane.db");
    let holder = Arc::new(FileStore::open(&path).unwrap());
    let tenant = create_tenant(holder.as_ref(), "app");
    let pool = InstancePool::new(
        Arc::new(FileStore::open(&path).unwrap()),
        Arc::new(SystemClock),
        &PoolConfig::default(),
    );

    let (held_tx, held_rx) = std::sync::mpsc::channel();
    let lock_holder = std::thread::spawn(move || {
        holder
            .with_write(|_| {
                held_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();
    });
    held_rx.recv().unwrap();

    let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        })
    };

    let claimed = pool.claim(tenant, "a:1", SessionId::generate()).await.unwrap();
    ticker.abort();
    lock_holder.join().unwrap();

    assert_eq!(claimed.instance_id, InstanceId::new(1).unwrap());
    // The only runtime thread kept running timers while the claim waited.
    assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) >= 5);
}

#[tokio::test]
async fn released_slot_is_reclaimed_for_the_next_worker() {
    let store = memory_store();
    let tenant = create_tenant(store.as_ref(), "app");
    let clock = manual_clock();
    let pool = test_pool(store, clock);

    let first = pool.claim(tenant, "a:1", SessionId::generate()).await.unwrap();
    pool.release(&first).await.unwrap();
    assert_eq!(pool.counts(tenant).unwrap().expired, 1);

    let report = pool.replenish_once(tenant, 1).unwrap();
    assert_eq!(report.reclaimed, 1);
    let second = pool.claim(tenant, "b:1", SessionId::generate()).await.unwrap();
    assert_eq!(second.instance_id, first.instance_id);

    // The old session cannot renew a slot that now belongs to someone else.
    assert!(matches!(
        pool.heartbeat(&first).await,
        Err(PlaneError::SlotLost { .. })
    ));
}

#[tokio::test]
async fn crashed_worker_slot_expires_after_lease() {
    let store = memory_store();
    let tenant = create_tenant(store.as_ref(), "app");
    let clock = manual_clock();
    let pool = test_pool(store, clock.clone());

    let claimed = pool.claim(tenant, "a:1", SessionId::generate()).await.unwrap();
    clock.advance(pool.lease_ttl() - Duration::from_millis(1));
    assert_eq!(pool.counts(tenant).unwrap().live, 1);

    clock.advance(Duration::from_millis(1));
    let counts = pool.counts(tenant).unwrap();
    assert_eq!((counts.live, counts.expired), (0, 1));
    assert!(pool.heartbeat(&claimed).await.is_err());
}

#[tokio::test]
async fn claim_during_store_outage_is_fatal() {
    let store = memory_store();
    let tenant = create_tenant(store.as_ref(), "app");
    let pool = test_pool(store.clone(), manual_clock());
    store.set_available(false);

    let err = pool
        .claim(tenant, "a:1", SessionId::generate())
        .await
        .unwrap_err();
    assert!(err.is_fatal_at_startup());
}

// ============================================================================
// Reclaim tests
// ============================================================================

#[test]
fn replenish_reaches_target_and_is_idempotent() {
    let store = memory_store();
    let tenant = create_tenant(store.as_ref(), "app");
    let pool = test_pool(store, manual_clock());

    let report = pool.replenish_once(tenant, 7).unwrap();
    assert_eq!(report.created, 7);
    assert_eq!(pool.counts(tenant).unwrap().unclaimed, 7);

    let again = pool.replenish_once(tenant, 7).unwrap();
    assert_eq!(again.added(), 0);
    assert_eq!(again.deleted, 0);

    let ids: Vec<u32> = pool
        .slots(tenant)
        .unwrap()
        .iter()
        .map(|s| s.instance_id.get())
        .collect();
    assert_eq!(ids, (1..=7).collect::<Vec<_>>());
}

#[test]
fn pools_of_different_tenants_are_independent() {
    let store = memory_store();
    let a = create_tenant(store.as_ref(), "a");
    let b = create_tenant(store.as_ref(), "b");
    let pool = test_pool(store, manual_clock());

    pool.replenish_once(a, 3).unwrap();
    pool.replenish_once(b, 2).unwrap();
    assert_eq!(pool.counts(a).unwrap().unclaimed, 3);
    assert_eq!(pool.counts(b).unwrap().unclaimed, 2);
}

#[tokio::test(start_paused = true)]
async fn reclaim_loop_survives_outage() {
    let store = memory_store();
    let tenant = create_tenant(store.as_ref(), "app");
    let pool = test_pool(store.clone(), manual_clock());
    let settings = PoolSettings {
        reclaim_interval: Duration::from_secs(1),
        preallocated_count: 4,
    };
    let (_settings_tx, settings_rx) = watch::channel(settings);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    store.set_available(false);
    let handle = ReclaimLoop::new(pool.clone(), tenant, settings_rx).spawn(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!handle.is_finished());

    store.set_available(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pool.counts(tenant).unwrap().unclaimed, 4);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

// ============================================================================
// Row id tests
// ============================================================================

#[test]
fn row_ids_carry_instance_id_in_low_bits() {
    let clock = manual_clock();
    let id = InstanceId::new(1234).unwrap();
    let generator = RowIdGenerator::new(id, clock);
    for _ in 0..100 {
        assert_eq!(generator.next() & INSTANCE_ID_MASK, 1234);
    }
}

#[test]
fn row_id_timestamp_round_trips() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
    let generator = RowIdGenerator::new(InstanceId::MAX, clock);
    let parts = RowIdGenerator::decompose(generator.next());
    assert_eq!(parts.instance_id, InstanceId::MAX.get());
    assert_eq!(parts.timestamp_micros(), 1_700_000_000_000_000);
}

proptest! {
    #[test]
    fn distinct_instances_never_collide(
        i in 1u32..=InstanceId::MAX.get(),
        j in 1u32..=InstanceId::MAX.get(),
        calls in 1usize..200,
    ) {
        prop_assume!(i != j);
        // Both generators read the same frozen clock.
        let clock = manual_clock();
        let a = RowIdGenerator::new(InstanceId::new(i).unwrap(), clock.clone());
        let b = RowIdGenerator::new(InstanceId::new(j).unwrap(), clock);

        let mut seen = HashSet::new();
        let mut last_a = 0;
        for _ in 0..calls {
            let x = a.next();
            prop_assert!(x > last_a);
            last_a = x;
            prop_assert!(seen.insert(x));
            prop_assert!(seen.insert(b.next()));
        }
    }
}

#[test]
fn system_tenant_pool_is_usable() {
    let store = memory_store();
    let pool = test_pool(store, manual_clock());
    assert_eq!(pool.replenish_once(TenantId::SYSTEM, 2).unwrap().created, 2);
}
