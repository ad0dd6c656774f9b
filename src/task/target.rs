//! Task targets: what a write task points at, and the store operations it
//! turns into.

use crate::error::ValidationError;
use crate::location::{CollectionRef, DocumentRef};
use crate::metadata::wire_name_of;
use crate::storage::WriteOperation;
use crate::task::action::TaskAction;
use crate::value::{Value, WireMap};

/// Target and payload of a write task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTarget {
    /// A single field of a document.
    Field {
        /// Owning document.
        document: Option<DocumentRef>,
        /// Field name; snake-cased before the task runs.
        field: Option<String>,
        /// New value.
        value: Option<Value>,
    },
    /// A whole document.
    Document {
        /// Target document.
        document: Option<DocumentRef>,
        /// Fields to write.
        data: Option<WireMap>,
    },
    /// A collection; the payload maps child document id to child fields.
    Collection {
        /// Target collection.
        collection: Option<CollectionRef>,
        /// Child id to child fields.
        data: Option<WireMap>,
    },
}

impl TaskTarget {
    /// Shape label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Field { .. } => "field",
            Self::Document { .. } => "document",
            Self::Collection { .. } => "collection",
        }
    }

    /// Path of the target, or `"<unset>"`.
    #[must_use]
    pub fn path(&self) -> String {
        let path = match self {
            Self::Field { document, .. } | Self::Document { document, .. } => {
                document.as_ref().map(|d| d.path().to_string())
            }
            Self::Collection { collection, .. } => collection.as_ref().map(|c| c.path().to_string()),
        };
        path.unwrap_or_else(|| "<unset>".to_string())
    }

    pub(crate) fn validate(&self, action: TaskAction) -> Result<(), ValidationError> {
        let task = self.kind();
        let unsupported = ValidationError::UnsupportedAction {
            action: action.as_str(),
            task,
        };
        match self {
            Self::Field { document, field, value } => {
                let Some(document) = document else {
                    return Err(ValidationError::MissingTarget { task });
                };
                if action == TaskAction::AddDocuments {
                    return Err(unsupported);
                }
                if field.as_deref().map_or(true, |f| f.trim().is_empty()) {
                    return Err(ValidationError::BlankFieldName {
                        path: document.path().to_string(),
                    });
                }
                if action.needs_payload() && value.is_none() {
                    return Err(ValidationError::MissingPayload {
                        path: document.path().to_string(),
                    });
                }
            }
            Self::Document { document, data } => {
                let Some(document) = document else {
                    return Err(ValidationError::MissingTarget { task });
                };
                if action == TaskAction::AddDocuments {
                    return Err(unsupported);
                }
                if action.needs_payload() && data.is_none() {
                    return Err(ValidationError::MissingPayload {
                        path: document.path().to_string(),
                    });
                }
            }
            Self::Collection { collection, data } => {
                let Some(collection) = collection else {
                    return Err(ValidationError::MissingTarget { task });
                };
                match action {
                    TaskAction::AddDocuments if data.is_none() => {
                        return Err(ValidationError::MissingPayload {
                            path: collection.path().to_string(),
                        });
                    }
                    TaskAction::AddDocuments | TaskAction::Delete => {}
                    _ => return Err(unsupported),
                }
                if let Some(data) = data {
                    validate_children(collection, data, action)?;
                }
            }
        }
        Ok(())
    }

    /// Normalizes a field task right before it runs: the field name becomes
    /// snake_case and a leaked `UnixTime` value becomes a plain integer.
    pub(crate) fn prepare(&mut self) {
        if let Self::Field { field, value, .. } = self {
            if let Some(name) = field.as_mut() {
                *name = wire_name_of(name);
            }
            if let Some(Value::UnixTime(t)) = value {
                *value = Some(Value::Int(t.as_secs()));
            }
        }
    }

    /// Store operations for `action`. Call [`validate`](Self::validate) first;
    /// an invalid target yields no operations.
    pub(crate) fn operations(&self, action: TaskAction) -> Vec<WriteOperation> {
        match self {
            Self::Field {
                document: Some(document),
                field: Some(field),
                value,
            } => field_operation(document, field, value.as_ref(), action).into_iter().collect(),
            Self::Document {
                document: Some(document),
                data,
            } => document_operation(document, data.as_ref(), action).into_iter().collect(),
            Self::Collection {
                collection: Some(collection),
                data,
            } => collection_operations(collection, data.as_ref(), action),
            _ => Vec::new(),
        }
    }
}

/// Every payload entry must name a valid child; added children must be maps.
fn validate_children(collection: &CollectionRef, data: &WireMap, action: TaskAction) -> Result<(), ValidationError> {
    for (id, value) in data {
        let invalid = |reason: String| ValidationError::InvalidChild {
            path: collection.path().to_string(),
            id: id.clone(),
            reason,
        };
        if let Err(err) = collection.document(id) {
            return Err(invalid(err.to_string()));
        }
        if action == TaskAction::AddDocuments && !value.is_map() {
            return Err(invalid(format!("expected a map of fields, got {}", value.type_name())));
        }
    }
    Ok(())
}

fn single(field: &str, value: &Value) -> WireMap {
    let mut data = WireMap::new();
    data.insert(field.to_string(), value.clone());
    data
}

fn field_operation(
    document: &DocumentRef,
    field: &str,
    value: Option<&Value>,
    action: TaskAction,
) -> Option<WriteOperation> {
    let document = document.clone();
    match (action, value) {
        (TaskAction::Delete, _) => Some(WriteOperation::DeleteField {
            document,
            field: field.to_string(),
        }),
        (TaskAction::MergeAll, Some(value)) => Some(WriteOperation::Set {
            document,
            data: single(field, value),
            merge: true,
        }),
        (TaskAction::Overwrite, Some(value)) => Some(WriteOperation::Set {
            document,
            data: single(field, value),
            merge: false,
        }),
        (TaskAction::Update, Some(value)) => Some(WriteOperation::Update {
            document,
            data: single(field, value),
        }),
        _ => None,
    }
}

fn document_operation(document: &DocumentRef, data: Option<&WireMap>, action: TaskAction) -> Option<WriteOperation> {
    let document = document.clone();
    match (action, data) {
        (TaskAction::Delete, _) => Some(WriteOperation::Delete { document }),
        (TaskAction::MergeAll, Some(data)) => Some(WriteOperation::Set {
            document,
            data: data.clone(),
            merge: true,
        }),
        (TaskAction::Overwrite, Some(data)) => Some(WriteOperation::Set {
            document,
            data: data.clone(),
            merge: false,
        }),
        (TaskAction::Update, Some(data)) => Some(WriteOperation::Update {
            document,
            data: data.clone(),
        }),
        _ => None,
    }
}

fn collection_operations(collection: &CollectionRef, data: Option<&WireMap>, action: TaskAction) -> Vec<WriteOperation> {
    match action {
        TaskAction::AddDocuments => data
            .into_iter()
            .flatten()
            .filter_map(|(id, value)| {
                let Some(fields) = value.as_map() else {
                    tracing::warn!(
                        target: "docbatch::task",
                        collection = %collection,
                        id = %id,
                        wire_type = value.type_name(),
                        "child document payload is not a map; skipped"
                    );
                    return None;
                };
                child(collection, id).map(|document| WriteOperation::Set {
                    document,
                    data: fields.clone(),
                    merge: false,
                })
            })
            .collect(),
        TaskAction::Delete => match data {
            Some(data) => data
                .keys()
                .filter_map(|id| child(collection, id))
                .map(|document| WriteOperation::Delete { document })
                .collect(),
            None => vec![WriteOperation::Delete {
                document: collection.new_document(),
            }],
        },
        _ => Vec::new(),
    }
}

fn child(collection: &CollectionRef, id: &str) -> Option<DocumentRef> {
    match collection.document(id) {
        Ok(document) => Some(document),
        Err(err) => {
            tracing::warn!(target: "docbatch::task", collection = %collection, error = %err, "invalid child id; skipped");
            None
        }
    }
}
