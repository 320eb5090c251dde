//! Core infrastructure tests.

mod common;

use common::{create_file_store_config, create_minimal_config, load_config, temp_test_dir, write_config};
use std::time::Duration;
use tenantplane::core::config::{Config, ConfigOverrides, StoreMode};
use tenantplane::core::error::PlaneError;
use tenantplane::core::ids::{InstanceId, TenantId, MAX_INSTANCE_ID};
use tenantplane::core::runtime::{ComponentHealth, RuntimeHealth, WorkerRuntime};
use tenantplane::core::time::{Clock, ManualClock, Timestamp};

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_minimal_config() {
    let file = create_minimal_config(4);
    let config = load_config(&file);
    assert_eq!(config.worker.tenant_id, 4);
    assert_eq!(config.store.mode, StoreMode::Memory);
    assert!(!config.worker.pool_owner);
    assert_eq!(config.capabilities.max_propagation(), Duration::from_secs(10));
}

#[test]
fn parse_file_store_config() {
    let dir = temp_test_dir();
    let path = dir.path().join("plane.db");
    let file = create_file_store_config(2, path.to_str().unwrap());
    let config = load_config(&file);
    assert_eq!(config.store.mode, StoreMode::File);
    assert_eq!(config.pool.settings().preallocated_count, 5);
    assert_eq!(
        config.pool.settings().reclaim_interval,
        Duration::from_secs(1)
    );
}

#[test]
fn validate_rejects_tenant_zero() {
    let file = write_config("[worker]\ntenant_id = 0\n");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("tenant_id"));
}

#[test]
fn validate_heartbeat_must_beat_lease() {
    let file = write_config(
        "[worker]\ntenant_id = 2\n[pool]\nlease_ttl_ms = 1000\nheartbeat_interval_ms = 1000\n",
    );
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn validate_unknown_log_level() {
    let file = write_config("[worker]\ntenant_id = 2\n[telemetry]\nlog_level = \"loud\"\n");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn config_overrides_apply() {
    let mut config = Config::for_tenant(2);
    config.apply_overrides(&ConfigOverrides {
        log_level: Some("debug".into()),
        tenant_id: Some(9),
        address: Some("10.1.1.1:26257".into()),
        store_path: Some("/tmp/plane.db".into()),
        pool_owner: true,
    });
    assert_eq!(config.telemetry.log_level, "debug");
    assert_eq!(config.worker.tenant_id, 9);
    assert_eq!(config.worker.address, "10.1.1.1:26257");
    assert_eq!(config.store.mode, StoreMode::File);
    assert!(config.worker.pool_owner);
    config.validate().unwrap();
}

#[test]
fn config_toml_round_trip() {
    let mut config = Config::for_tenant(3);
    config.worker.codec_tenant_id = Some(3);
    let parsed = Config::from_toml(&config.to_toml().unwrap()).unwrap();
    assert_eq!(parsed.worker.codec_tenant_id, Some(3));
    assert_eq!(parsed.pool.lease_ttl_ms, config.pool.lease_ttl_ms);
}

#[test]
fn shipped_sample_config_is_valid() {
    let config = Config::from_toml(include_str!("../config/tenantplane.toml")).unwrap();
    config.validate().unwrap();
    assert_eq!(config.store.mode, StoreMode::File);
    assert!(config.worker.pool_owner);
}

// ============================================================================
// Id and time tests
// ============================================================================

#[test]
fn instance_ids_fit_the_row_id_field() {
    assert!(InstanceId::new(0).is_none());
    assert!(InstanceId::new(MAX_INSTANCE_ID + 1).is_none());
    assert_eq!(InstanceId::all().count(), MAX_INSTANCE_ID as usize);
}

#[test]
fn tenant_id_parsing() {
    assert_eq!("12".parse::<TenantId>().unwrap().get(), 12);
    assert!("0".parse::<TenantId>().is_err());
    assert!("x".parse::<TenantId>().is_err());
    assert!(TenantId::SYSTEM.is_system());
}

#[test]
fn manual_clock_advances() {
    let clock = ManualClock::new(Timestamp::from_millis(5));
    clock.advance(Duration::from_millis(10));
    assert_eq!(clock.now().as_millis(), 15);
    assert!(clock.now().is_at_or_after(Timestamp::from_millis(15)));
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn error_classification() {
    let conflict = PlaneError::conflict("slot 3");
    assert!(conflict.is_retriable());
    assert!(!conflict.is_fatal_at_startup());

    let unavailable = PlaneError::unavailable("down");
    assert!(unavailable.is_retriable());
    assert_eq!(unavailable.code(), "store_unavailable");

    let exhausted = PlaneError::PoolExhausted {
        tenant_id: TenantId::SYSTEM,
        reason: "all 32767 instance ids are in use".into(),
    };
    assert!(exhausted.is_fatal_at_startup());
}

// ============================================================================
// Runtime tests
// ============================================================================

#[test]
fn runtime_health_default_is_starting() {
    let health = RuntimeHealth::default();
    assert_eq!(health.keyspace, ComponentHealth::Starting);
    assert!(!health.is_ready());
    assert!(health.is_alive());
}

#[test]
fn runtime_health_ready_with_degraded_capabilities() {
    let health = RuntimeHealth {
        keyspace: ComponentHealth::Healthy,
        instance: ComponentHealth::Healthy,
        capabilities: ComponentHealth::Degraded,
        reclaim: ComponentHealth::Healthy,
    };
    assert!(health.is_ready());
}

#[tokio::test]
async fn runtime_creates_with_valid_config() {
    let file = create_minimal_config(1);
    let config = load_config(&file);
    let mut runtime = WorkerRuntime::new(config).unwrap();
    assert!(!runtime.is_running());

    runtime.start().await.unwrap();
    assert!(runtime.is_running());
    assert!(runtime.keyspace().is_some());
    let export = runtime.metrics().export();
    assert!(export.contains("tenantplane_pool_claims_total"));
    runtime.stop().await.unwrap();
}

#[test]
fn runtime_rejects_invalid_config() {
    let mut config = Config::for_tenant(2);
    config.pool.claim_max_retries = 0;
    assert!(WorkerRuntime::new(config).is_err());
}
