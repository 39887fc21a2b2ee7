//! Collection storage and validation rules.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::matcher;
use atomicdoc_common::StoreResult;

/// A constraint checked on every write to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldConstraint {
    /// Numeric field, when present, must be >= `minimum`.
    Minimum { field: String, minimum: f64 },
    /// Numeric field, when present, must be <= `maximum`.
    Maximum { field: String, maximum: f64 },
    /// Field must be present.
    Required { field: String },
}

impl FieldConstraint {
    /// Check a document, returning a description of the violation.
    fn check(&self, document: &Document) -> Result<(), String> {
        match self {
            FieldConstraint::Minimum { field, minimum } => {
                match matcher::get_path(document, field).and_then(matcher::as_f64) {
                    Some(value) if value < *minimum => Err(format!(
                        "{} must be at least {}, got {}",
                        field, minimum, value
                    )),
                    _ => Ok(()),
                }
            }
            FieldConstraint::Maximum { field, maximum } => {
                match matcher::get_path(document, field).and_then(matcher::as_f64) {
                    Some(value) if value > *maximum => Err(format!(
                        "{} must be at most {}, got {}",
                        field, maximum, value
                    )),
                    _ => Ok(()),
                }
            }
            FieldConstraint::Required { field } => {
                if matcher::get_path(document, field).is_some() {
                    Ok(())
                } else {
                    Err(format!("{} is required", field))
                }
            }
        }
    }
}

/// Validation rules attached to a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionRules {
    pub constraints: Vec<FieldConstraint>,
}

impl CollectionRules {
    /// Rules that accept every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a minimum-value constraint.
    pub fn minimum(mut self, field: impl Into<String>, minimum: f64) -> Self {
        self.constraints.push(FieldConstraint::Minimum {
            field: field.into(),
            minimum,
        });
        self
    }

    /// Add a maximum-value constraint.
    pub fn maximum(mut self, field: impl Into<String>, maximum: f64) -> Self {
        self.constraints.push(FieldConstraint::Maximum {
            field: field.into(),
            maximum,
        });
        self
    }

    /// Add a required-field constraint.
    pub fn required(mut self, field: impl Into<String>) -> Self {
        self.constraints.push(FieldConstraint::Required {
            field: field.into(),
        });
        self
    }

    /// Validate a document against every constraint.
    pub fn validate(&self, document: &Document) -> Result<(), String> {
        self.constraints
            .iter()
            .try_for_each(|constraint| constraint.check(document))
    }
}

/// Canonical string key for a document `_id`.
pub fn id_key(id: &Bson) -> String {
    id.to_string()
}

/// A document together with the commit sequence that last wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: Bson,
    pub version: u64,
    pub document: Document,
}

impl StoredDocument {
    pub fn key(&self) -> String {
        id_key(&self.id)
    }
}

/// Documents of one collection in insertion order.
#[derive(Debug, Clone, Default)]
pub struct CollectionData {
    pub rules: CollectionRules,
    pub documents: Vec<StoredDocument>,
}

impl CollectionData {
    pub fn new(rules: CollectionRules) -> Self {
        Self {
            rules,
            documents: Vec::new(),
        }
    }

    /// Index of the first document matching `filter`.
    pub fn position(&self, filter: &Document) -> StoreResult<Option<usize>> {
        for (index, stored) in self.documents.iter().enumerate() {
            if matcher::matches(&stored.document, filter)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Look up a document by `_id` key.
    pub fn get(&self, key: &str) -> Option<&StoredDocument> {
        self.documents.iter().find(|stored| stored.key() == key)
    }

    /// Replace the document with the same `_id`, or append it.
    pub fn put(&mut self, stored: StoredDocument) {
        let key = stored.key();
        match self.documents.iter_mut().find(|existing| existing.key() == key) {
            Some(existing) => *existing = stored,
            None => self.documents.push(stored),
        }
    }

    /// Remove a document by `_id` key.
    pub fn remove(&mut self, key: &str) -> Option<StoredDocument> {
        let index = self.documents.iter().position(|stored| stored.key() == key)?;
        Some(self.documents.remove(index))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
