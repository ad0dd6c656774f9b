//! Entity metadata cache.
//!
//! Every mapped type describes its fields once, through [`MappedEntity::describe`].
//! The cache turns that description into an immutable [`EntityMetadata`] table of
//! wire name → [`FieldDescriptor`] and keeps it for the life of the process.
//!
//! Descriptions are walked from the most-derived type outward: a type registers
//! its own fields first, then the parts it [`include`](MetadataBuilder::include)s.
//! When two fields share a wire name, the first one registered wins.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use convert_case::{Case, Casing};

use crate::convert::WireConvert;
use crate::entity::MappedEntity;
use crate::error::{ConfigurationError, DocError, DocResult};
use crate::value::Value;

type Reader<T> = Arc<dyn Fn(&T) -> Option<Value> + Send + Sync>;
type Writer<T> = Arc<dyn Fn(&mut T, &str, &Value) -> bool + Send + Sync>;

fn lock_err(context: &'static str) -> DocError {
    DocError::internal(format!("poisoned lock: {context}"))
}

/// Wire name for a local field name: its snake_case form.
#[must_use]
pub fn wire_name_of(local_name: &str) -> String {
    local_name.to_case(Case::Snake)
}

/// What happened when a wire value was written into a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWrite {
    /// The converted value was assigned.
    Assigned,
    /// The value did not convert; the field was left untouched.
    Unconverted,
    /// An explicit null arrived for a field that cannot hold one.
    NullRejected,
}

/// One mapped field of an entity type.
pub struct FieldDescriptor<T> {
    local_name: &'static str,
    wire_name: String,
    local_type: &'static str,
    nullable: bool,
    read: Reader<T>,
    write: Writer<T>,
}

impl<T> FieldDescriptor<T> {
    /// Local (Rust) field name.
    #[must_use]
    pub const fn local_name(&self) -> &'static str {
        self.local_name
    }

    /// Name of the field on the wire.
    #[must_use]
    pub fn wire_name(&self) -> &str {
        &self.wire_name
    }

    /// Label of the local field type.
    #[must_use]
    pub const fn local_type(&self) -> &'static str {
        self.local_type
    }

    /// True if the local type can represent null.
    #[must_use]
    pub const fn nullable(&self) -> bool {
        self.nullable
    }

    /// Reads the field and converts it to its wire form.
    #[must_use]
    pub fn read(&self, entity: &T) -> Option<Value> {
        (self.read)(entity)
    }

    /// Converts `value` and assigns it to the field when the conversion succeeds.
    pub fn write(&self, entity: &mut T, value: &Value) -> FieldWrite {
        if value.is_null() && !self.nullable {
            return FieldWrite::NullRejected;
        }
        if (self.write)(entity, &self.wire_name, value) {
            FieldWrite::Assigned
        } else {
            FieldWrite::Unconverted
        }
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("local_name", &self.local_name)
            .field("wire_name", &self.wire_name)
            .field("local_type", &self.local_type)
            .field("nullable", &self.nullable)
            .finish_non_exhaustive()
    }
}

/// Immutable field table of one entity type.
pub struct EntityMetadata<T> {
    type_name: &'static str,
    fields: Vec<FieldDescriptor<T>>,
    by_wire_name: HashMap<String, usize>,
}

impl<T> fmt::Debug for EntityMetadata<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl<T> EntityMetadata<T> {
    /// Name of the described type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Descriptors in registration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor<T>> {
        self.fields.iter()
    }

    /// Descriptor for a wire field name.
    #[must_use]
    pub fn field(&self, wire_name: &str) -> Option<&FieldDescriptor<T>> {
        self.by_wire_name.get(wire_name).map(|&i| &self.fields[i])
    }

    /// Number of registered fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no field is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Collects the field registrations of one type.
///
/// # Examples
///
/// ```
/// use docbatch::{MappedEntity, MetadataBuilder};
///
/// #[derive(Default)]
/// struct Player {
///     display_name: String,
///     level: i64,
/// }
///
/// impl MappedEntity for Player {
///     fn describe(fields: &mut MetadataBuilder<Self>) {
///         fields
///             .field("displayName", |p| &p.display_name, |p| &mut p.display_name)
///             .field_as("lvl", "level", |p| &p.level, |p| &mut p.level);
///     }
/// }
/// ```
pub struct MetadataBuilder<T> {
    type_name: &'static str,
    fields: Vec<FieldDescriptor<T>>,
    seen: HashSet<String>,
}

impl<T: 'static> MetadataBuilder<T> {
    fn new() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            fields: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Registers a field whose wire name is the snake_case form of `local_name`.
    pub fn field<F>(&mut self, local_name: &'static str, get: fn(&T) -> &F, get_mut: fn(&mut T) -> &mut F) -> &mut Self
    where
        F: WireConvert + 'static,
    {
        let wire_name = wire_name_of(local_name);
        self.field_as(&wire_name, local_name, get, get_mut)
    }

    /// Registers a field under an explicit wire name.
    pub fn field_as<F>(
        &mut self,
        wire_name: &str,
        local_name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> &mut Self
    where
        F: WireConvert + 'static,
    {
        let read: Reader<T> = Arc::new(move |entity: &T| get(entity).to_wire());
        let write: Writer<T> = Arc::new(move |entity: &mut T, wire_name: &str, value: &Value| {
            match F::from_wire(wire_name, value) {
                Some(converted) => {
                    *get_mut(entity) = converted;
                    true
                }
                None => false,
            }
        });
        self.push(FieldDescriptor {
            local_name,
            wire_name: wire_name.to_string(),
            local_type: F::type_label(),
            nullable: F::nullable(),
            read,
            write,
        });
        self
    }

    /// Registers every field of an embedded part, after this type's own fields.
    pub fn include<B>(&mut self, get: fn(&T) -> &B, get_mut: fn(&mut T) -> &mut B) -> &mut Self
    where
        B: MappedEntity,
    {
        let mut part = MetadataBuilder::<B>::new();
        B::describe(&mut part);
        for descriptor in part.fields {
            let inner_read = descriptor.read;
            let inner_write = descriptor.write;
            let read: Reader<T> = Arc::new(move |entity: &T| inner_read(get(entity)));
            let write: Writer<T> = Arc::new(move |entity: &mut T, wire_name: &str, value: &Value| {
                inner_write(get_mut(entity), wire_name, value)
            });
            self.push(FieldDescriptor {
                local_name: descriptor.local_name,
                wire_name: descriptor.wire_name,
                local_type: descriptor.local_type,
                nullable: descriptor.nullable,
                read,
                write,
            });
        }
        self
    }

    fn push(&mut self, descriptor: FieldDescriptor<T>) {
        if !self.seen.insert(descriptor.wire_name.clone()) {
            tracing::debug!(
                target: "docbatch::metadata",
                type_name = self.type_name,
                wire_name = %descriptor.wire_name,
                "field shadowed by an earlier registration"
            );
            return;
        }
        tracing::trace!(
            target: "docbatch::metadata",
            type_name = self.type_name,
            local_name = descriptor.local_name,
            wire_name = %descriptor.wire_name,
            local_type = descriptor.local_type,
            "field registered"
        );
        self.fields.push(descriptor);
    }

    fn build(self) -> EntityMetadata<T> {
        let by_wire_name = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, d)| (d.wire_name.clone(), i))
            .collect();
        EntityMetadata {
            type_name: self.type_name,
            fields: self.fields,
            by_wire_name,
        }
    }
}

/// Per-type field tables, built once and shared read-only afterwards.
#[derive(Default)]
pub struct MetadataCache {
    tables: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl MetadataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by entity conversions.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<MetadataCache> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Builds the table for `T` if it does not exist yet.
    ///
    /// Building twice is a no-op; concurrent callers get the same table.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if the cache lock is poisoned.
    pub fn ensure_built<T: MappedEntity>(&self) -> DocResult<Arc<EntityMetadata<T>>> {
        if let Some(table) = self.get::<T>()? {
            return Ok(table);
        }

        let mut tables = self.tables.write().map_err(|_| lock_err("metadata.ensure_built"))?;
        let entry = tables.entry(TypeId::of::<T>()).or_insert_with(|| {
            let mut builder = MetadataBuilder::<T>::new();
            T::describe(&mut builder);
            let table = builder.build();
            tracing::debug!(
                target: "docbatch::metadata",
                type_name = table.type_name(),
                fields = table.len(),
                "metadata built"
            );
            Arc::new(table)
        });
        Arc::clone(entry)
            .downcast::<EntityMetadata<T>>()
            .map_err(|_| DocError::internal("metadata table stored under the wrong type"))
    }

    /// Returns the table for `T`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::MetadataMissing` if `T` was never built.
    pub fn lookup<T: MappedEntity>(&self) -> DocResult<Arc<EntityMetadata<T>>> {
        self.get::<T>()?.ok_or_else(|| {
            ConfigurationError::MetadataMissing {
                type_name: std::any::type_name::<T>(),
            }
            .into()
        })
    }

    /// True if a table for `T` exists.
    #[must_use]
    pub fn is_built<T: MappedEntity>(&self) -> bool {
        matches!(self.get::<T>(), Ok(Some(_)))
    }

    fn get<T: MappedEntity>(&self) -> DocResult<Option<Arc<EntityMetadata<T>>>> {
        let tables = self.tables.read().map_err(|_| lock_err("metadata.get"))?;
        Ok(tables
            .get(&TypeId::of::<T>())
            .and_then(|table| Arc::clone(table).downcast::<EntityMetadata<T>>().ok()))
    }
}

impl fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.tables.read().map(|t| t.len()).unwrap_or_default();
        f.debug_struct("MetadataCache").field("types", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Stats {
        level: i64,
        display_name: String,
    }

    impl MappedEntity for Stats {
        fn describe(fields: &mut MetadataBuilder<Self>) {
            fields
                .field("level", |s| &s.level, |s| &mut s.level)
                .field("displayName", |s| &s.display_name, |s| &mut s.display_name);
        }
    }

    #[derive(Default)]
    struct Hero {
        title: String,
        stats: Stats,
    }

    impl MappedEntity for Hero {
        fn describe(fields: &mut MetadataBuilder<Self>) {
            fields
                .field_as("display_name", "title", |h| &h.title, |h| &mut h.title)
                .include(|h| &h.stats, |h| &mut h.stats);
        }
    }

    #[derive(Default)]
    struct Marker;

    impl MappedEntity for Marker {
        fn describe(_fields: &mut MetadataBuilder<Self>) {}
    }

    #[test]
    fn test_wire_name_is_snake_case() {
        assert_eq!(wire_name_of("displayName"), "display_name");
        assert_eq!(wire_name_of("DisplayName"), "display_name");
        assert_eq!(wire_name_of("level"), "level");
    }

    #[test]
    fn test_most_derived_field_wins() {
        let cache = MetadataCache::new();
        let table = cache.ensure_built::<Hero>().unwrap();

        assert_eq!(table.len(), 2);
        let names: Vec<_> = table.fields().map(FieldDescriptor::wire_name).collect();
        assert_eq!(names, vec!["display_name", "level"]);
        assert_eq!(table.field("display_name").unwrap().local_name(), "title");
    }

    #[test]
    fn test_included_fields_read_and_write_through() {
        let cache = MetadataCache::new();
        let table = cache.ensure_built::<Hero>().unwrap();
        let mut hero = Hero::default();

        let level = table.field("level").unwrap();
        assert_eq!(level.write(&mut hero, &Value::Int(7)), FieldWrite::Assigned);
        assert_eq!(hero.stats.level, 7);
        assert_eq!(level.read(&hero), Some(Value::Int(7)));
    }

    #[test]
    fn test_write_rejects_null_and_skips_unconvertible() {
        let cache = MetadataCache::new();
        let table = cache.ensure_built::<Stats>().unwrap();
        let mut stats = Stats {
            level: 3,
            ..Stats::default()
        };
        let level = table.field("level").unwrap();

        assert_eq!(level.write(&mut stats, &Value::Null), FieldWrite::NullRejected);
        assert_eq!(level.write(&mut stats, &Value::from("x")), FieldWrite::Unconverted);
        assert_eq!(stats.level, 3);
    }

    #[test]
    fn test_lookup_before_build_is_missing() {
        let cache = MetadataCache::new();
        let err = cache.lookup::<Stats>().unwrap_err();
        assert!(err.is_configuration());
        assert!(!cache.is_built::<Stats>());

        cache.ensure_built::<Stats>().unwrap();
        assert!(cache.is_built::<Stats>());
        assert_eq!(cache.lookup::<Stats>().unwrap().len(), 2);
    }

    #[test]
    fn test_debug_does_not_need_entity_debug() {
        let cache = MetadataCache::new();
        let table = cache.ensure_built::<Stats>().unwrap();
        let rendered = format!("{table:?}");
        assert!(rendered.contains("EntityMetadata"));
        assert!(rendered.contains("display_name"));
    }

    #[test]
    fn test_empty_type_is_present_but_empty() {
        let cache = MetadataCache::new();
        let table = cache.ensure_built::<Marker>().unwrap();
        assert!(table.is_empty());
        assert!(cache.lookup::<Marker>().is_ok());
    }

    #[test]
    fn test_build_is_idempotent() {
        let cache = MetadataCache::new();
        let a = cache.ensure_built::<Stats>().unwrap();
        let b = cache.ensure_built::<Stats>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
