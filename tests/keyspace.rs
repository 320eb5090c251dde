//! Keyspace codec and boundary guard tests.

mod common;

use common::assert_err;
use proptest::prelude::*;
use tenantplane::core::error::PlaneError;
use tenantplane::core::ids::TenantId;
use tenantplane::keyspace::codec::{decode_tenant_prefix, tenant_span};
use tenantplane::keyspace::{validate, TenantCodec};

fn tid(id: u64) -> TenantId {
    TenantId::new(id).unwrap()
}

// ============================================================================
// Codec tests
// ============================================================================

#[test]
fn tenant_keys_decode_to_their_tenant() {
    let codec = TenantCodec::new(tid(10));
    let key = codec.encode_key(b"table/1/row");
    let (tenant, rest) = decode_tenant_prefix(&key).unwrap();
    assert_eq!(tenant, tid(10));
    assert_eq!(rest, b"table/1/row");
    assert_eq!(codec.strip_prefix(&key).unwrap(), b"table/1/row");
}

#[test]
fn adjacent_tenant_spans_do_not_overlap() {
    let ten = tenant_span(tid(10));
    let eleven = tenant_span(tid(11));
    assert_eq!(ten.end, eleven.start);
    assert!(!ten.contains_key(&eleven.start));
}

#[test]
fn system_codec_has_empty_prefix() {
    let codec = TenantCodec::new(TenantId::SYSTEM);
    assert!(codec.prefix().is_empty());
    assert_eq!(codec.implied_tenant().unwrap(), TenantId::SYSTEM);
}

// ============================================================================
// Guard tests
// ============================================================================

#[test]
fn mismatched_codec_is_a_keyspace_violation() {
    let err = assert_err(validate(TenantId::SYSTEM, &TenantCodec::new(tid(2))));
    assert!(matches!(err, PlaneError::KeyspaceViolation { .. }));
    assert!(err.is_fatal_at_startup());
    assert!(!err.is_retriable());
}

#[test]
fn guard_rejects_neighbouring_tenant_keys() {
    let guard = validate(tid(10), &TenantCodec::new(tid(10))).unwrap();
    let own = TenantCodec::new(tid(10)).encode_key(b"a");
    let neighbour = TenantCodec::new(tid(11)).encode_key(b"a");

    assert!(guard.check_key(&own).is_ok());
    let err = assert_err(guard.check_key(&neighbour));
    assert_eq!(
        err.to_string(),
        "requested key /Tenant/11/a not fully contained in tenant keyspace /Tenant/1{0-1}"
    );
}

proptest! {
    #[test]
    fn validate_fails_iff_tenants_differ(assigned in 1u64..5_000, implied in 1u64..5_000) {
        let result = validate(tid(assigned), &TenantCodec::new(tid(implied)));
        prop_assert_eq!(result.is_err(), assigned != implied);
        if let Err(e) = result {
            prop_assert!(
                matches!(e, PlaneError::KeyspaceViolation { .. }),
                "unexpected error kind: {:?}",
                e
            );
        }
    }

    #[test]
    fn validate_is_pure(assigned in 1u64..5_000, implied in 1u64..5_000) {
        let codec = TenantCodec::new(tid(implied));
        let first = validate(tid(assigned), &codec)
            .map(|g| g.span().clone())
            .map_err(|e| e.to_string());
        let second = validate(tid(assigned), &codec)
            .map(|g| g.span().clone())
            .map_err(|e| e.to_string());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn encoded_keys_stay_inside_their_span(tenant in 2u64..u64::MAX / 2, suffix in proptest::collection::vec(any::<u8>(), 0..32)) {
        let codec = TenantCodec::new(tid(tenant));
        prop_assert!(codec.span().contains_key(&codec.encode_key(&suffix)));
    }
}
