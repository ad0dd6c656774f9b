//! Mapped entities: typed values with a wire format.
//!
//! An entity type implements [`MappedEntity`] to describe its fields once. The
//! capability traits built on top of that are composed, not inherited:
//!
//! - [`WireConvertible`]: to and from a sparse [`WireMap`].
//! - [`SnapshotAbsorbing`]: fill in from a fetched document.
//! - [`Located`]: owns a cached document location.

use std::sync::OnceLock;

use crate::convert::{DocumentForm, WireConvert};
use crate::error::{ConfigurationError, DocResult, Outcome};
use crate::location::{DocumentRef, LocationResolver};
use crate::metadata::{EntityMetadata, FieldWrite, MetadataBuilder, MetadataCache};
use crate::storage::DocumentSnapshot;
use crate::value::{Value, WireMap};

/// A type whose fields are mapped to document fields.
pub trait MappedEntity: Default + Send + Sync + 'static {
    /// Registers the type's fields. Runs once per type.
    fn describe(fields: &mut MetadataBuilder<Self>);

    /// Name the entity reports for itself, used as a child document id or a
    /// field name.
    fn identity(&self) -> Option<String> {
        None
    }

    /// Fresh instance keyed by `key`.
    fn with_identity(key: &str) -> Self {
        let _ = key;
        Self::default()
    }
}

/// Builds the process-wide field table for `T`.
///
/// Conversions of `T` fail with `ConfigurationError::MetadataMissing` until
/// this has run.
///
/// # Errors
///
/// Returns `DocError::Internal` if the cache lock is poisoned.
pub fn initialize<T: MappedEntity>() -> Outcome {
    MetadataCache::global().ensure_built::<T>().map(|_| ())
}

fn usable_table<T: MappedEntity>(table: &EntityMetadata<T>) -> DocResult<()> {
    if table.is_empty() {
        return Err(ConfigurationError::MetadataEmpty {
            type_name: table.type_name(),
        }
        .into());
    }
    Ok(())
}

fn encode<T: MappedEntity>(table: &EntityMetadata<T>, entity: &T) -> DocResult<WireMap> {
    usable_table(table)?;
    Ok(table
        .fields()
        .filter_map(|d| d.read(entity).map(|v| (d.wire_name().to_string(), v)))
        .collect())
}

fn decode<T: MappedEntity>(table: &EntityMetadata<T>, entity: &mut T, data: &WireMap) -> Outcome {
    if data.is_empty() {
        return Ok(());
    }
    usable_table(table)?;
    for (key, value) in data {
        let Some(descriptor) = table.field(key) else {
            continue;
        };
        match descriptor.write(entity, value) {
            FieldWrite::Assigned => {}
            FieldWrite::NullRejected => {
                tracing::warn!(
                    target: "docbatch::metadata",
                    type_name = table.type_name(),
                    field = %key,
                    local_type = descriptor.local_type(),
                    "null value for a field that cannot hold null; skipped"
                );
            }
            FieldWrite::Unconverted => {
                tracing::debug!(
                    target: "docbatch::metadata",
                    type_name = table.type_name(),
                    field = %key,
                    wire_type = value.type_name(),
                    local_type = descriptor.local_type(),
                    "wire value did not convert; field left untouched"
                );
            }
        }
    }
    Ok(())
}

/// Conversion to and from the wire format.
pub trait WireConvertible {
    /// Sparse wire map of the value: absent fields are left out.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` when the type's metadata is missing or empty.
    fn to_wire_format(&self) -> DocResult<WireMap>;

    /// Assigns every known, convertible entry of `data`.
    ///
    /// Unknown keys are ignored and unconvertible values leave their field
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` when the type's metadata is missing or empty.
    fn apply_wire_format(&mut self, data: &WireMap) -> Outcome;
}

impl<T: MappedEntity> WireConvertible for T {
    fn to_wire_format(&self) -> DocResult<WireMap> {
        let result = MetadataCache::global()
            .lookup::<T>()
            .and_then(|table| encode(&table, self));
        if let Err(err) = &result {
            tracing::error!(target: "docbatch::metadata", error = %err, "cannot convert to wire format");
        }
        result
    }

    fn apply_wire_format(&mut self, data: &WireMap) -> Outcome {
        let result = MetadataCache::global()
            .lookup::<T>()
            .and_then(|table| decode(&table, self, data));
        if let Err(err) = &result {
            tracing::error!(target: "docbatch::metadata", error = %err, "cannot apply wire format");
        }
        result
    }
}

/// Fills a value in from a fetched document.
pub trait SnapshotAbsorbing {
    /// Absorbs the snapshot's fields.
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying conversion reports.
    fn absorb_snapshot(&mut self, snapshot: &DocumentSnapshot) -> Outcome;
}

impl<T: MappedEntity> SnapshotAbsorbing for T {
    fn absorb_snapshot(&mut self, snapshot: &DocumentSnapshot) -> Outcome {
        self.apply_wire_format(&snapshot.data)
    }
}

/// Entities nested as field values convert to a nested map. Their field table
/// is built on first use.
impl<T: MappedEntity> WireConvert for T {
    fn to_wire(&self) -> Option<Value> {
        let table = MetadataCache::global().ensure_built::<T>().ok()?;
        encode(&table, self).ok().map(Value::Map)
    }

    fn from_wire(_field: &str, value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        let table = MetadataCache::global().ensure_built::<T>().ok()?;
        let mut entity = T::default();
        decode(&table, &mut entity, map).ok()?;
        Some(entity)
    }

    fn from_document(key: &str, data: &WireMap) -> DocResult<Self> {
        let table = MetadataCache::global().ensure_built::<T>()?;
        let mut entity = T::with_identity(key);
        decode(&table, &mut entity, data)?;
        Ok(entity)
    }

    fn to_document(&self) -> Option<DocumentForm> {
        Some(DocumentForm {
            name: self.identity(),
            data: MetadataCache::global()
                .ensure_built::<T>()
                .and_then(|table| encode(&table, self)),
        })
    }
}

/// Lazily resolved document location of one entity instance.
#[derive(Debug, Clone, Default)]
pub struct LocationSlot(OnceLock<DocumentRef>);

#[allow(missing_docs)]
impl LocationSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot that already holds `document`.
    #[must_use]
    pub fn at(document: DocumentRef) -> Self {
        Self(OnceLock::from(document))
    }

    #[must_use]
    pub fn get(&self) -> Option<&DocumentRef> {
        self.0.get()
    }

    /// Records `document` unless a location is already cached; returns the cached one.
    pub fn record(&self, document: DocumentRef) -> &DocumentRef {
        self.0.get_or_init(|| document)
    }
}

/// A value that owns a document location.
pub trait Located: Sized + 'static {
    /// Storage for the cached location.
    fn location_slot(&self) -> &LocationSlot;

    /// Cached location, or the one the resolver produces for `Self`.
    ///
    /// The first resolution is cached for the lifetime of the instance.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::NotRegistered` if the type has no location
    /// factory and nothing is cached.
    fn location(&self, resolver: &LocationResolver, args: &[&str]) -> DocResult<DocumentRef> {
        let slot = self.location_slot();
        if let Some(document) = slot.get() {
            return Ok(document.clone());
        }
        let document = resolver.resolve_document::<Self>(args)?;
        Ok(slot.record(document).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct Badge {
        label: String,
        rank: i64,
    }

    impl MappedEntity for Badge {
        fn describe(fields: &mut MetadataBuilder<Self>) {
            fields
                .field("label", |b| &b.label, |b| &mut b.label)
                .field("rank", |b| &b.rank, |b| &mut b.rank);
        }
    }

    #[derive(Default, Debug)]
    struct Profile {
        id: String,
        display_name: String,
        nickname: Option<String>,
        level: i64,
        badge: Option<Badge>,
        slot: LocationSlot,
    }

    impl MappedEntity for Profile {
        fn describe(fields: &mut MetadataBuilder<Self>) {
            fields
                .field("displayName", |p| &p.display_name, |p| &mut p.display_name)
                .field("nickname", |p| &p.nickname, |p| &mut p.nickname)
                .field("level", |p| &p.level, |p| &mut p.level)
                .field("badge", |p| &p.badge, |p| &mut p.badge);
        }

        fn identity(&self) -> Option<String> {
            Some(self.id.clone())
        }

        fn with_identity(key: &str) -> Self {
            Self {
                id: key.to_string(),
                ..Self::default()
            }
        }
    }

    impl Located for Profile {
        fn location_slot(&self) -> &LocationSlot {
            &self.slot
        }
    }

    #[derive(Default)]
    struct NeverInitialized {
        value: i64,
    }

    impl MappedEntity for NeverInitialized {
        fn describe(fields: &mut MetadataBuilder<Self>) {
            fields.field("value", |n| &n.value, |n| &mut n.value);
        }
    }

    fn profile() -> Profile {
        initialize::<Profile>().unwrap();
        Profile {
            id: "nova".to_string(),
            display_name: "Nova".to_string(),
            nickname: None,
            level: 12,
            badge: Some(Badge {
                label: "founder".to_string(),
                rank: 1,
            }),
            slot: LocationSlot::new(),
        }
    }

    #[test]
    fn test_to_wire_format_is_sparse() {
        let wire = profile().to_wire_format().unwrap();
        assert_eq!(wire.len(), 3);
        assert_eq!(wire.get("display_name"), Some(&Value::from("Nova")));
        assert_eq!(wire.get("level"), Some(&Value::Int(12)));
        assert!(!wire.contains_key("nickname"));
        let badge = wire.get("badge").and_then(Value::as_map).unwrap();
        assert_eq!(badge.get("rank"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_round_trip_restores_fields() {
        let original = profile();
        let wire = original.to_wire_format().unwrap();

        let mut restored = Profile::default();
        restored.apply_wire_format(&wire).unwrap();
        assert_eq!(restored.display_name, "Nova");
        assert_eq!(restored.level, 12);
        assert_eq!(restored.badge, original.badge);
        assert_eq!(restored.nickname, None);
    }

    #[test]
    fn test_apply_ignores_unknown_and_unconvertible() {
        let mut p = profile();
        let mut data = WireMap::new();
        data.insert("unknown".to_string(), Value::Int(1));
        data.insert("level".to_string(), Value::from("not a number"));
        data.insert("display_name".to_string(), Value::Null);
        data.insert("nickname".to_string(), Value::Null);

        p.nickname = Some("n".to_string());
        p.apply_wire_format(&data).unwrap();
        assert_eq!(p.level, 12);
        assert_eq!(p.display_name, "Nova");
        assert_eq!(p.nickname, None);
    }

    #[test]
    fn test_uninitialized_type_is_configuration_error() {
        let err = NeverInitialized::default().to_wire_format().unwrap_err();
        assert!(err.is_configuration());
        assert!(NeverInitialized::default().apply_wire_format(&WireMap::new()).is_err());
    }

    #[test]
    fn test_document_form_uses_identity() {
        let form = profile().to_document().unwrap();
        assert_eq!(form.name.as_deref(), Some("nova"));
        assert!(form.data.unwrap().contains_key("display_name"));

        let mut data = WireMap::new();
        data.insert("level".to_string(), Value::Int(3));
        let p = Profile::from_document("p1", &data).unwrap();
        assert_eq!(p.id, "p1");
        assert_eq!(p.level, 3);
    }

    #[test]
    fn test_location_resolves_once() {
        let resolver = LocationResolver::new();
        resolver.register_document::<Profile>("profiles/{0}").unwrap();
        let p = profile();

        let first = p.location(&resolver, &["nova"]).unwrap();
        let second = p.location(&resolver, &["someone-else"]).unwrap();
        assert_eq!(first.path(), "profiles/nova");
        assert_eq!(first, second);
    }

    #[test]
    fn test_location_unregistered() {
        let p = profile();
        assert!(p.location(&LocationResolver::new(), &[]).unwrap_err().is_configuration());

        let preset = Profile {
            slot: LocationSlot::at(DocumentRef::new("profiles/x").unwrap()),
            ..Profile::default()
        };
        assert_eq!(preset.location(&LocationResolver::new(), &[]).unwrap().id(), "x");
    }
}
