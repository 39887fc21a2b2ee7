//! Mutation plans and the steps they are built from.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bson::Document;

use atomicdoc_common::PlanId;

use crate::outcome::OperationResult;

/// What a step does to its collection.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOperation {
    /// Insert one document.
    Insert { document: Document },
    /// Update the first document matching `filter`.
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    /// Delete the first document matching `filter`.
    DeleteOne { filter: Document },
    /// Look up the first document matching `filter` without writing.
    FindOne { filter: Document },
}

impl StepOperation {
    /// Short operation name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StepOperation::Insert { .. } => "insert",
            StepOperation::UpdateOne { .. } => "update_one",
            StepOperation::DeleteOne { .. } => "delete_one",
            StepOperation::FindOne { .. } => "find_one",
        }
    }
}

type Predicate = Arc<dyn Fn(&OperationResult) -> bool + Send + Sync>;

/// A check on a step's own result. Failing it aborts the plan.
///
/// Count conditions compare by exact equality.
#[derive(Clone)]
pub enum PostCondition {
    MatchedCount(u64),
    ModifiedCount(u64),
    DeletedCount(u64),
    /// The lookup found a document.
    Found,
    /// The lookup found nothing.
    NotFound,
    Custom {
        description: String,
        predicate: Predicate,
    },
}

impl PostCondition {
    /// Build a condition from an arbitrary predicate.
    pub fn custom<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&OperationResult) -> bool + Send + Sync + 'static,
    {
        PostCondition::Custom {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Check a step result, returning the reason on failure.
    pub fn check(&self, result: &OperationResult) -> Result<(), String> {
        let satisfied = match (self, result) {
            (PostCondition::MatchedCount(n), OperationResult::Updated { matched_count, .. }) => {
                matched_count == n
            }
            (PostCondition::ModifiedCount(n), OperationResult::Updated { modified_count, .. }) => {
                modified_count == n
            }
            (PostCondition::DeletedCount(n), OperationResult::Deleted { deleted_count }) => {
                deleted_count == n
            }
            (PostCondition::Found, OperationResult::Found(found)) => found.is_some(),
            (PostCondition::NotFound, OperationResult::Found(found)) => found.is_none(),
            (PostCondition::Custom { predicate, .. }, result) => predicate(result),
            (condition, result) => {
                return Err(format!(
                    "expected {}, but the step returned {}",
                    condition,
                    result.summary()
                ))
            }
        };

        if satisfied {
            Ok(())
        } else {
            Err(format!("expected {}, got {}", self, result.summary()))
        }
    }
}

impl fmt::Display for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostCondition::MatchedCount(n) => write!(f, "matched_count == {}", n),
            PostCondition::ModifiedCount(n) => write!(f, "modified_count == {}", n),
            PostCondition::DeletedCount(n) => write!(f, "deleted_count == {}", n),
            PostCondition::Found => write!(f, "a matching document"),
            PostCondition::NotFound => write!(f, "no matching document"),
            PostCondition::Custom { description, .. } => write!(f, "{}", description),
        }
    }
}

impl fmt::Debug for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostCondition::Custom { description, .. } => {
                f.debug_struct("Custom").field("description", description).finish()
            }
            other => write!(f, "{}", other),
        }
    }
}

/// A business conflict lookup run after a step: if any document in
/// `collection` matches `filter`, the plan aborts.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictCheck {
    pub collection: String,
    pub filter: Document,
    /// Why a match is a conflict, e.g. "listing already booked".
    pub description: String,
}

/// One unit of work against one collection.
#[derive(Debug, Clone)]
pub struct MutationStep {
    pub name: String,
    pub collection: String,
    pub operation: StepOperation,
    pub post_condition: Option<PostCondition>,
    pub conflict_check: Option<ConflictCheck>,
}

impl MutationStep {
    fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        operation: StepOperation,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            operation,
            post_condition: None,
            conflict_check: None,
        }
    }

    pub fn insert(
        name: impl Into<String>,
        collection: impl Into<String>,
        document: Document,
    ) -> Self {
        Self::new(name, collection, StepOperation::Insert { document })
    }

    pub fn update_one(
        name: impl Into<String>,
        collection: impl Into<String>,
        filter: Document,
        update: Document,
    ) -> Self {
        Self::new(
            name,
            collection,
            StepOperation::UpdateOne {
                filter,
                update,
                upsert: false,
            },
        )
    }

    pub fn delete_one(
        name: impl Into<String>,
        collection: impl Into<String>,
        filter: Document,
    ) -> Self {
        Self::new(name, collection, StepOperation::DeleteOne { filter })
    }

    pub fn find_one(
        name: impl Into<String>,
        collection: impl Into<String>,
        filter: Document,
    ) -> Self {
        Self::new(name, collection, StepOperation::FindOne { filter })
    }

    /// Insert a document when an update matches nothing. No effect on other
    /// operations.
    pub fn upsert(mut self) -> Self {
        if let StepOperation::UpdateOne { upsert, .. } = &mut self.operation {
            *upsert = true;
        }
        self
    }

    pub fn expect(mut self, condition: PostCondition) -> Self {
        self.post_condition = Some(condition);
        self
    }

    pub fn expect_modified(self, count: u64) -> Self {
        self.expect(PostCondition::ModifiedCount(count))
    }

    pub fn expect_deleted(self, count: u64) -> Self {
        self.expect(PostCondition::DeletedCount(count))
    }

    pub fn expect_found(self) -> Self {
        self.expect(PostCondition::Found)
    }

    pub fn expect_not_found(self) -> Self {
        self.expect(PostCondition::NotFound)
    }

    /// Abort the plan after this step if `filter` matches in `collection`.
    pub fn abort_if_exists(
        mut self,
        collection: impl Into<String>,
        filter: Document,
        description: impl Into<String>,
    ) -> Self {
        self.conflict_check = Some(ConflictCheck {
            collection: collection.into(),
            filter,
            description: description.into(),
        });
        self
    }

    /// Collections this step reads or writes.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.collection.as_str())
            .chain(self.conflict_check.iter().map(|c| c.collection.as_str()))
    }
}

/// An ordered list of steps forming one business transaction.
#[derive(Debug, Clone)]
pub struct MutationPlan {
    pub id: PlanId,
    pub name: String,
    pub steps: Vec<MutationStep>,
}

impl MutationPlan {
    pub fn new(name: impl Into<String>, steps: Vec<MutationStep>) -> Self {
        Self {
            id: PlanId::new(),
            name: name.into(),
            steps,
        }
    }

    pub fn builder(name: impl Into<String>) -> MutationPlanBuilder {
        MutationPlanBuilder {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every collection named by any step, deduplicated.
    pub fn collections(&self) -> BTreeSet<&str> {
        self.steps.iter().flat_map(|s| s.collections()).collect()
    }
}

/// Builder for [`MutationPlan`].
#[derive(Debug)]
pub struct MutationPlanBuilder {
    name: String,
    steps: Vec<MutationStep>,
}

impl MutationPlanBuilder {
    pub fn step(mut self, step: MutationStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = MutationStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn build(self) -> MutationPlan {
        MutationPlan::new(self.name, self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, Bson};

    fn updated(matched: u64, modified: u64) -> OperationResult {
        OperationResult::Updated {
            matched_count: matched,
            modified_count: modified,
            upserted_id: None,
        }
    }

    #[test]
    fn test_count_conditions_are_exact() {
        let condition = PostCondition::ModifiedCount(1);
        assert!(condition.check(&updated(1, 1)).is_ok());
        assert!(condition.check(&updated(1, 0)).is_err());
        assert!(condition.check(&updated(2, 2)).is_err());
        assert!(PostCondition::MatchedCount(0).check(&updated(0, 0)).is_ok());
    }

    #[test]
    fn test_condition_on_wrong_result_kind_fails() {
        let reason = PostCondition::DeletedCount(1)
            .check(&updated(1, 1))
            .unwrap_err();
        assert!(reason.contains("deleted_count == 1"));
    }

    #[test]
    fn test_found_conditions() {
        let hit = OperationResult::Found(Some(doc! { "name": "Infinite Views" }));
        let miss = OperationResult::Found(None);
        assert!(PostCondition::Found.check(&hit).is_ok());
        assert!(PostCondition::Found.check(&miss).is_err());
        assert!(PostCondition::NotFound.check(&miss).is_ok());
    }

    #[test]
    fn test_custom_condition() {
        let condition = PostCondition::custom("an upserted id", |result| {
            matches!(result, OperationResult::Updated { upserted_id: Some(_), .. })
        });
        let upserted = OperationResult::Updated {
            matched_count: 0,
            modified_count: 0,
            upserted_id: Some(Bson::Int32(1)),
        };
        assert!(condition.check(&upserted).is_ok());
        let reason = condition.check(&updated(1, 1)).unwrap_err();
        assert!(reason.starts_with("expected an upserted id"));
        assert_eq!(format!("{:?}", condition), "Custom { description: \"an upserted id\" }");
    }

    #[test]
    fn test_plan_builder_and_collections() {
        let plan = MutationPlan::builder("reservation")
            .step(
                MutationStep::update_one(
                    "add reservation to user",
                    "users",
                    doc! { "email": "leslie@example.com" },
                    doc! { "$addToSet": { "reservations": { "name": "Infinite Views" } } },
                )
                .expect_modified(1)
                .abort_if_exists(
                    "listingsAndReviews",
                    doc! { "name": "Infinite Views", "datesReserved": { "$in": [1] } },
                    "listing already booked",
                ),
            )
            .step(MutationStep::find_one("check", "users", doc! {}).expect_found())
            .build();

        assert_eq!(plan.len(), 2);
        assert!(!plan.is_empty());
        let collections: Vec<&str> = plan.collections().into_iter().collect();
        assert_eq!(collections, vec!["listingsAndReviews", "users"]);
    }

    #[test]
    fn test_upsert_only_applies_to_updates() {
        let update =
            MutationStep::update_one("u", "c", doc! {}, doc! { "$set": { "a": 1 } }).upsert();
        assert!(matches!(update.operation, StepOperation::UpdateOne { upsert: true, .. }));

        let insert = MutationStep::insert("i", "c", doc! {}).upsert();
        assert_eq!(insert.operation, StepOperation::Insert { document: doc! {} });
        assert_eq!(insert.operation.kind(), "insert");
    }
}
