//! Document and collection locations, and the per-type location resolver.
//!
//! Paths are slash-separated. A document path has an even number of segments
//! (`users/alice`), a collection path an odd number (`users/alice/items`).

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;

use crate::error::{ConfigurationError, DocError, DocResult};

fn lock_err(context: &'static str) -> DocError {
    DocError::internal(format!("poisoned lock: {context}"))
}

fn split_path(path: &str) -> DocResult<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(invalid_path(path, "path is empty"));
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(invalid_path(path, "path contains an empty segment"));
    }
    Ok(segments)
}

fn invalid_path(path: &str, reason: &str) -> DocError {
    ConfigurationError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Handle to one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    /// Parses a document path.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidPath` for empty segments or an odd
    /// segment count.
    pub fn new(path: impl AsRef<str>) -> DocResult<Self> {
        let segments = split_path(path.as_ref())?;
        if segments.len() % 2 != 0 {
            return Err(invalid_path(path.as_ref(), "document paths need an even number of segments"));
        }
        Ok(Self {
            path: segments.join("/"),
        })
    }

    /// Full slash-separated path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    #[must_use]
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Collection this document lives in.
    #[must_use]
    pub fn parent(&self) -> CollectionRef {
        let parent = self.path.rsplit_once('/').map_or("", |(head, _)| head);
        CollectionRef {
            path: parent.to_string(),
        }
    }

    /// Sub-collection under this document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidPath` if `name` is blank or has a slash.
    pub fn collection(&self, name: &str) -> DocResult<CollectionRef> {
        if name.trim().is_empty() || name.contains('/') {
            return Err(invalid_path(name, "collection name must be a single segment"));
        }
        Ok(CollectionRef {
            path: format!("{}/{name}", self.path),
        })
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Handle to one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    path: String,
}

#[allow(missing_docs)]
impl CollectionRef {
    /// Parses a collection path.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidPath` for empty segments or an even
    /// segment count.
    pub fn new(path: impl AsRef<str>) -> DocResult<Self> {
        let segments = split_path(path.as_ref())?;
        if segments.len() % 2 == 0 {
            return Err(invalid_path(path.as_ref(), "collection paths need an odd number of segments"));
        }
        Ok(Self {
            path: segments.join("/"),
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Document this collection is nested under, if any.
    #[must_use]
    pub fn parent(&self) -> Option<DocumentRef> {
        self.path.rsplit_once('/').map(|(head, _)| DocumentRef {
            path: head.to_string(),
        })
    }

    /// Child document with the given id.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidPath` if `id` is blank or has a slash.
    pub fn document(&self, id: &str) -> DocResult<DocumentRef> {
        if id.trim().is_empty() || id.contains('/') {
            return Err(invalid_path(id, "document id must be a single segment"));
        }
        Ok(DocumentRef {
            path: format!("{}/{id}", self.path),
        })
    }

    /// Child document with a freshly generated id.
    #[must_use]
    pub fn new_document(&self) -> DocumentRef {
        DocumentRef {
            path: format!("{}/{}", self.path, uuid::Uuid::new_v4().simple()),
        }
    }

    /// True if `document` is a direct child of this collection.
    #[must_use]
    pub fn contains(&self, document: &DocumentRef) -> bool {
        document.parent() == *self
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Either kind of location.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Document(DocumentRef),
    Collection(CollectionRef),
}

#[allow(missing_docs)]
impl Location {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Document(d) => d.path(),
            Self::Collection(c) => c.path(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Document(d) => d.id(),
            Self::Collection(c) => c.id(),
        }
    }
}

impl From<DocumentRef> for Location {
    fn from(value: DocumentRef) -> Self {
        Self::Document(value)
    }
}

impl From<CollectionRef> for Location {
    fn from(value: CollectionRef) -> Self {
        Self::Collection(value)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\d+)\}").expect("placeholder pattern is valid"))
}

/// Substitutes `{0}`, `{1}`, ... in `template` with `args`.
///
/// Extra arguments are ignored.
///
/// # Errors
///
/// Returns `ConfigurationError::TemplateArguments` when a placeholder has no
/// matching argument.
///
/// # Examples
///
/// ```
/// use docbatch::location::format_template;
///
/// let path = format_template("users/{0}/items/{1}", &["alice", "sword"]).unwrap();
/// assert_eq!(path, "users/alice/items/sword");
/// assert!(format_template("users/{1}", &["alice"]).is_err());
/// ```
pub fn format_template(template: &str, args: &[&str]) -> DocResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder().captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let index: usize = caps[1].parse().unwrap_or(usize::MAX);
        let Some(arg) = args.get(index) else {
            return Err(ConfigurationError::TemplateArguments {
                template: template.to_string(),
                index,
                provided: args.len(),
            }
            .into());
        };
        out.push_str(&template[last..whole.start()]);
        out.push_str(arg);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

type Factory<R> = Arc<dyn Fn(&[&str]) -> DocResult<R> + Send + Sync>;

struct Registration<R> {
    type_name: &'static str,
    factory: Factory<R>,
}

/// Maps a type to a factory producing its location from caller arguments.
///
/// # Examples
///
/// ```
/// use docbatch::LocationResolver;
///
/// struct Player;
///
/// let resolver = LocationResolver::new();
/// resolver.register_document::<Player>("players/{0}").unwrap();
///
/// let doc = resolver.resolve_document::<Player>(&["nova"]).unwrap();
/// assert_eq!(doc.path(), "players/nova");
/// ```
#[derive(Default)]
pub struct LocationResolver {
    documents: RwLock<HashMap<TypeId, Registration<DocumentRef>>>,
    collections: RwLock<HashMap<TypeId, Registration<CollectionRef>>>,
}

#[allow(missing_docs)]
impl LocationResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a document path template for `T`.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if the registry lock is poisoned.
    pub fn register_document<T: 'static>(&self, template: &str) -> DocResult<()> {
        let template = template.to_string();
        self.register_document_factory::<T, _>(move |args| DocumentRef::new(format_template(&template, args)?))
    }

    /// Registers a document factory for `T`.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if the registry lock is poisoned.
    pub fn register_document_factory<T, F>(&self, factory: F) -> DocResult<()>
    where
        T: 'static,
        F: Fn(&[&str]) -> DocResult<DocumentRef> + Send + Sync + 'static,
    {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| lock_err("resolver.register_document"))?;
        documents.insert(
            TypeId::of::<T>(),
            Registration {
                type_name: std::any::type_name::<T>(),
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Registers a collection path template for `T`.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if the registry lock is poisoned.
    pub fn register_collection<T: 'static>(&self, template: &str) -> DocResult<()> {
        let template = template.to_string();
        self.register_collection_factory::<T, _>(move |args| CollectionRef::new(format_template(&template, args)?))
    }

    /// Registers a collection factory for `T`.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if the registry lock is poisoned.
    pub fn register_collection_factory<T, F>(&self, factory: F) -> DocResult<()>
    where
        T: 'static,
        F: Fn(&[&str]) -> DocResult<CollectionRef> + Send + Sync + 'static,
    {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| lock_err("resolver.register_collection"))?;
        collections.insert(
            TypeId::of::<T>(),
            Registration {
                type_name: std::any::type_name::<T>(),
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Resolves the document location of `T`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::NotRegistered` if `T` has no document
    /// factory, or whatever the factory reports.
    pub fn resolve_document<T: 'static>(&self, args: &[&str]) -> DocResult<DocumentRef> {
        let factory = {
            let documents = self
                .documents
                .read()
                .map_err(|_| lock_err("resolver.resolve_document"))?;
            let registration = documents.get(&TypeId::of::<T>()).ok_or(ConfigurationError::NotRegistered {
                type_name: std::any::type_name::<T>(),
                kind: "document",
            })?;
            tracing::trace!(type_name = registration.type_name, "resolving document location");
            Arc::clone(&registration.factory)
        };
        factory(args)
    }

    /// Resolves the collection location of `T`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::NotRegistered` if `T` has no collection
    /// factory, or whatever the factory reports.
    pub fn resolve_collection<T: 'static>(&self, args: &[&str]) -> DocResult<CollectionRef> {
        let factory = {
            let collections = self
                .collections
                .read()
                .map_err(|_| lock_err("resolver.resolve_collection"))?;
            let registration = collections.get(&TypeId::of::<T>()).ok_or(ConfigurationError::NotRegistered {
                type_name: std::any::type_name::<T>(),
                kind: "collection",
            })?;
            tracing::trace!(type_name = registration.type_name, "resolving collection location");
            Arc::clone(&registration.factory)
        };
        factory(args)
    }

    /// True if `T` has a document factory.
    #[must_use]
    pub fn has_document<T: 'static>(&self) -> bool {
        self.documents
            .read()
            .map(|d| d.contains_key(&TypeId::of::<T>()))
            .unwrap_or(false)
    }
}

impl fmt::Debug for LocationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let documents = self.documents.read().map(|d| d.len()).unwrap_or_default();
        let collections = self.collections.read().map(|c| c.len()).unwrap_or_default();
        f.debug_struct("LocationResolver")
            .field("documents", &documents)
            .field("collections", &collections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Player;
    struct Inventory;

    #[test]
    fn test_document_path_parity() {
        assert!(DocumentRef::new("users/alice").is_ok());
        assert!(DocumentRef::new("users").is_err());
        assert!(DocumentRef::new("users//alice").is_err());
        assert!(CollectionRef::new("users").is_ok());
        assert!(CollectionRef::new("users/alice").is_err());
    }

    #[test]
    fn test_document_and_collection_navigation() {
        let doc = DocumentRef::new("/users/alice/").unwrap();
        assert_eq!(doc.path(), "users/alice");
        assert_eq!(doc.id(), "alice");
        assert_eq!(doc.parent().path(), "users");

        let items = doc.collection("items").unwrap();
        assert_eq!(items.path(), "users/alice/items");
        assert_eq!(items.parent(), Some(doc.clone()));

        let sword = items.document("sword").unwrap();
        assert!(items.contains(&sword));
        assert!(!items.contains(&doc));
        assert!(items.document("a/b").is_err());
    }

    #[test]
    fn test_new_document_is_a_child() {
        let items = CollectionRef::new("items").unwrap();
        let a = items.new_document();
        let b = items.new_document();
        assert!(items.contains(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_format_template() {
        assert_eq!(format_template("users/{0}", &["alice", "extra"]).unwrap(), "users/alice");
        assert_eq!(format_template("static/doc", &[]).unwrap(), "static/doc");

        let err = format_template("users/{0}/items/{1}", &["alice"]).unwrap_err();
        assert!(matches!(
            err,
            DocError::Configuration(ConfigurationError::TemplateArguments { index: 1, provided: 1, .. })
        ));
    }

    #[test]
    fn test_resolver_by_type() {
        let resolver = LocationResolver::new();
        resolver.register_document::<Player>("players/{0}").unwrap();
        resolver.register_collection::<Inventory>("players/{0}/items").unwrap();

        assert_eq!(resolver.resolve_document::<Player>(&["nova"]).unwrap().path(), "players/nova");
        assert_eq!(
            resolver.resolve_collection::<Inventory>(&["nova"]).unwrap().path(),
            "players/nova/items"
        );
        assert!(resolver.has_document::<Player>());
        assert!(!resolver.has_document::<Inventory>());
    }

    #[test]
    fn test_resolver_unregistered_type() {
        let resolver = LocationResolver::new();
        let err = resolver.resolve_document::<Player>(&[]).unwrap_err();
        assert!(matches!(
            err,
            DocError::Configuration(ConfigurationError::NotRegistered { kind: "document", .. })
        ));
    }

    #[test]
    fn test_resolver_factory() {
        let resolver = LocationResolver::new();
        resolver
            .register_document_factory::<Player, _>(|args| {
                DocumentRef::new(format!("players/{}", args.first().copied().unwrap_or("anonymous")))
            })
            .unwrap();
        assert_eq!(resolver.resolve_document::<Player>(&[]).unwrap().id(), "anonymous");
    }
}
