//! Tenant key-prefix codec.
//!
//! Secondary tenant keys start with [`TENANT_PREFIX`] followed by the
//! ascending uvarint encoding of the tenant id:
//!
//! ```text
//! 0xfe | uvarint(tenant_id) | suffix...
//! ```
//!
//! The system tenant owns every key below `0xfe` and uses no prefix.
//! Ascending uvarints sort in numeric order, so the keyspace of tenant `t`
//! is exactly `[prefix(t), prefix(t + 1))`.

use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::TenantId;
use bytes::{BufMut, Bytes, BytesMut};

/// Leading byte of every secondary-tenant key.
pub const TENANT_PREFIX: u8 = 0xfe;

const INT_MAX: u8 = 0xfd;
const INT_MAX_WIDTH: u8 = 8;
const INT_ZERO: u8 = 0x80 + INT_MAX_WIDTH;
const INT_SMALL: u64 = (INT_MAX - INT_ZERO - INT_MAX_WIDTH) as u64;

/// Append the order-preserving encoding of `v`.
///
/// Values up to 109 take one byte; larger values take a length byte
/// followed by the minimal big-endian representation.
pub fn encode_uvarint_ascending(buf: &mut BytesMut, v: u64) {
    if v <= INT_SMALL {
        buf.put_u8(INT_ZERO + v as u8);
        return;
    }
    let width = 8 - (v.leading_zeros() / 8) as usize;
    buf.put_u8(INT_MAX - INT_MAX_WIDTH + width as u8);
    buf.put_slice(&v.to_be_bytes()[8 - width..]);
}

/// Decode an ascending uvarint, returning the value and the remaining bytes.
pub fn decode_uvarint_ascending(b: &[u8]) -> PlaneResult<(u64, &[u8])> {
    let (&first, rest) = b.split_first().ok_or_else(|| PlaneError::InvalidKey {
        message: "insufficient bytes to decode uvarint".to_string(),
    })?;
    if first < INT_ZERO {
        return Err(PlaneError::InvalidKey {
            message: format!("invalid uvarint tag {:#04x}", first),
        });
    }
    let small = u64::from(first - INT_ZERO);
    if small <= INT_SMALL {
        return Ok((small, rest));
    }
    let width = (small - INT_SMALL) as usize;
    if width > INT_MAX_WIDTH as usize {
        return Err(PlaneError::InvalidKey {
            message: format!("invalid uvarint length {}", width),
        });
    }
    if rest.len() < width {
        return Err(PlaneError::InvalidKey {
            message: format!(
                "insufficient bytes to decode uvarint: need {}, have {}",
                width,
                rest.len()
            ),
        });
    }
    let value = rest[..width]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    Ok((value, &rest[width..]))
}

/// Key prefix owned by a tenant. Empty for the system tenant.
pub fn tenant_prefix(tenant_id: TenantId) -> Bytes {
    if tenant_id.is_system() {
        return Bytes::new();
    }
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u8(TENANT_PREFIX);
    encode_uvarint_ascending(&mut buf, tenant_id.get());
    buf.freeze()
}

/// Split a key into the tenant it belongs to and the tenant-relative suffix.
pub fn decode_tenant_prefix(key: &[u8]) -> PlaneResult<(TenantId, &[u8])> {
    match key.split_first() {
        Some((&TENANT_PREFIX, rest)) => {
            let (raw, suffix) = decode_uvarint_ascending(rest)?;
            let tenant_id = TenantId::new(raw).ok_or_else(|| PlaneError::InvalidKey {
                message: "tenant id 0 is not valid".to_string(),
            })?;
            if tenant_id.is_system() {
                return Err(PlaneError::InvalidKey {
                    message: "system tenant keys are never prefixed".to_string(),
                });
            }
            Ok((tenant_id, suffix))
        }
        _ => Ok((TenantId::SYSTEM, key)),
    }
}

/// Half-open key span `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpan {
    /// Inclusive start key.
    pub start: Bytes,
    /// Exclusive end key.
    pub end: Bytes,
}

impl KeySpan {
    /// Create a new span.
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Check if a key lies inside the span.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.start.as_ref() && key < self.end.as_ref()
    }

    /// Check if another span lies entirely inside this one.
    pub fn contains_span(&self, other: &KeySpan) -> bool {
        other.start.as_ref() >= self.start.as_ref()
            && other.end.as_ref() <= self.end.as_ref()
            && other.start.as_ref() < other.end.as_ref()
    }

    /// Render the span compactly, factoring out the common printable prefix:
    /// `/Tenant/10`..`/Tenant/11` prints as `/Tenant/1{0-1}`.
    pub fn pretty(&self) -> String {
        let start = pretty_key(&self.start);
        let end = pretty_key(&self.end);
        let common = start
            .char_indices()
            .zip(end.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map(|((i, c), _)| i + c.len_utf8())
            .unwrap_or(0);
        if common == 0 {
            return format!("{{{}-{}}}", start, end);
        }
        format!("{}{{{}-{}}}", &start[..common], &start[common..], &end[common..])
    }
}

impl std::fmt::Display for KeySpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

/// Keyspace owned by a tenant.
pub fn tenant_span(tenant_id: TenantId) -> KeySpan {
    if tenant_id.is_system() {
        return KeySpan::new(Bytes::new(), Bytes::from_static(&[TENANT_PREFIX]));
    }
    let end = match tenant_id.next() {
        Some(next) => tenant_prefix(next),
        None => Bytes::from_static(&[0xff]),
    };
    KeySpan::new(tenant_prefix(tenant_id), end)
}

/// Human-readable rendering of a key.
pub fn pretty_key(key: &[u8]) -> String {
    match key {
        [] => "/Min".to_string(),
        [0xff, ..] => "/Max".to_string(),
        [TENANT_PREFIX] => "/Tenant/Min".to_string(),
        [TENANT_PREFIX, ..] => match decode_tenant_prefix(key) {
            Ok((tenant_id, [])) => format!("/Tenant/{}", tenant_id),
            Ok((tenant_id, suffix)) => format!("/Tenant/{}/{}", tenant_id, escape(suffix)),
            Err(_) => format!("/Tenant/?/{}", escape(&key[1..])),
        },
        _ => format!("/{}", escape(key)),
    }
}

fn escape(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|b| std::ascii::escape_default(*b))
        .map(char::from)
        .collect()
}

/// Key codec bound to one tenant.
///
/// Workers encode every key they write through their codec. The codec's
/// tenant is normally the worker's assigned tenant; the boundary guard
/// exists to catch the case where it is not.
#[derive(Debug, Clone)]
pub struct TenantCodec {
    tenant_id: TenantId,
    prefix: Bytes,
}

impl TenantCodec {
    /// Create a codec for a tenant.
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            prefix: tenant_prefix(tenant_id),
        }
    }

    /// Tenant the codec was constructed for.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Encoded tenant prefix.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Tenant implied by the codec's encoding, recovered by decoding its prefix.
    pub fn implied_tenant(&self) -> PlaneResult<TenantId> {
        let (tenant_id, rest) = decode_tenant_prefix(&self.prefix)?;
        if !rest.is_empty() {
            return Err(PlaneError::InvalidKey {
                message: "trailing bytes after tenant prefix".to_string(),
            });
        }
        Ok(tenant_id)
    }

    /// Keyspace the codec writes into.
    pub fn span(&self) -> KeySpan {
        tenant_span(self.tenant_id)
    }

    /// Prefix a tenant-relative key.
    pub fn encode_key(&self, suffix: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.prefix.len() + suffix.len());
        buf.put_slice(&self.prefix);
        buf.put_slice(suffix);
        buf.freeze()
    }

    /// Strip the tenant prefix, rejecting keys of other tenants.
    pub fn strip_prefix<'a>(&self, key: &'a [u8]) -> PlaneResult<&'a [u8]> {
        let (tenant_id, suffix) = decode_tenant_prefix(key)?;
        if tenant_id != self.tenant_id {
            return Err(PlaneError::KeyspaceViolation {
                key: pretty_key(key),
                keyspace: self.span().pretty(),
            });
        }
        Ok(suffix)
    }
}
