//! Query filter evaluation.
//!
//! Supports the subset of the MongoDB query language the flows rely on:
//! equality (including array membership and dotted paths), `$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`, and the logical
//! `$and`, `$or`, `$nor`.

use std::cmp::Ordering;

use bson::{Bson, Document};

use atomicdoc_common::{StoreError, StoreResult};

/// Check whether `document` satisfies `filter`. An empty filter matches all.
pub fn matches(document: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        if !matches_entry(document, key, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Get the value at a dotted path. Numeric segments index into arrays.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Numeric value of a BSON number.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Equality that treats numbers of different BSON types as comparable.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between two values of comparable types.
pub fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn matches_entry(document: &Document, key: &str, condition: &Bson) -> StoreResult<bool> {
    match key {
        "$and" => {
            for clause in clauses(key, condition)? {
                if !matches(document, clause)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "$or" => {
            for clause in clauses(key, condition)? {
                if matches(document, clause)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$nor" => {
            for clause in clauses(key, condition)? {
                if matches(document, clause)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        op if op.starts_with('$') => Err(StoreError::InvalidOperation(format!(
            "unsupported top-level operator {}",
            op
        ))),
        path => matches_field(&values_at(document, path), condition),
    }
}

fn clauses<'a>(op: &str, condition: &'a Bson) -> StoreResult<Vec<&'a Document>> {
    let invalid = || {
        StoreError::InvalidOperation(format!("{} requires a non-empty array of documents", op))
    };
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Bson::Document(clause) => Ok(clause),
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

/// Every value reachable at `path`, descending through arrays of documents.
fn values_at<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = document.get(parts[0]) {
        resolve(first, &parts[1..], &mut out);
    }
    out
}

fn resolve<'a>(value: &'a Bson, parts: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Bson::Document(inner) => {
            if let Some(next) = inner.get(*head) {
                resolve(next, rest, out);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(item) = items.get(index) {
                    resolve(item, rest, out);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    resolve(item, parts, out);
                }
            }
        },
        _ => {}
    }
}

fn operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(inner) if inner.keys().next().map_or(false, |k| k.starts_with('$')) => {
            Some(inner)
        }
        _ => None,
    }
}

fn matches_field(values: &[&Bson], condition: &Bson) -> StoreResult<bool> {
    match operator_document(condition) {
        Some(operators) => {
            for (op, operand) in operators {
                if !apply_operator(values, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        None => Ok(equals_any(values, condition)),
    }
}

/// Each value plus, for arrays, each of its elements.
fn candidates<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(*value);
        if let Bson::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn equals_any(values: &[&Bson], target: &Bson) -> bool {
    if values.is_empty() {
        return matches!(target, Bson::Null);
    }
    candidates(values)
        .into_iter()
        .any(|candidate| values_equal(candidate, target))
}

fn compare_any(values: &[&Bson], operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    candidates(values)
        .into_iter()
        .any(|candidate| compare(candidate, operand).map_or(false, accept))
}

fn apply_operator(values: &[&Bson], op: &str, operand: &Bson) -> StoreResult<bool> {
    match op {
        "$eq" => Ok(equals_any(values, operand)),
        "$ne" => Ok(!equals_any(values, operand)),
        "$gt" => Ok(compare_any(values, operand, |o| o == Ordering::Greater)),
        "$gte" => Ok(compare_any(values, operand, |o| o != Ordering::Less)),
        "$lt" => Ok(compare_any(values, operand, |o| o == Ordering::Less)),
        "$lte" => Ok(compare_any(values, operand, |o| o != Ordering::Greater)),
        "$in" => Ok(in_list(values, op, operand)?),
        "$nin" => Ok(!in_list(values, op, operand)?),
        "$exists" => {
            let wanted = match operand {
                Bson::Boolean(flag) => *flag,
                other => as_f64(other).map_or(true, |n| n != 0.0),
            };
            Ok(values.is_empty() != wanted)
        }
        other => Err(StoreError::InvalidOperation(format!(
            "unsupported query operator {}",
            other
        ))),
    }
}

fn in_list(values: &[&Bson], op: &str, operand: &Bson) -> StoreResult<bool> {
    match operand {
        Bson::Array(targets) => Ok(targets.iter().any(|target| equals_any(values, target))),
        _ => Err(StoreError::InvalidOperation(format!("{} requires an array", op))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, DateTime};

    fn listing() -> Document {
        doc! {
            "name": "Infinite Views",
            "bedrooms": 5,
            "price": 180.5,
            "address": { "country": "Australia", "market": "Sydney" },
            "datesReserved": [
                DateTime::from_millis(1_577_750_400_000),
                DateTime::from_millis(1_577_836_800_000),
            ],
            "reviews": [ { "score": 90 }, { "score": 70 } ],
        }
    }

    #[test]
    fn test_equality_and_dotted_paths() {
        let doc = listing();
        assert!(matches(&doc, &doc! { "name": "Infinite Views" }).unwrap());
        assert!(matches(&doc, &doc! { "address.market": "Sydney" }).unwrap());
        assert!(!matches(&doc, &doc! { "address.market": "Melbourne" }).unwrap());
        assert!(matches(&doc, &doc! {}).unwrap());
    }

    #[test]
    fn test_numeric_types_compare_across_widths() {
        let doc = listing();
        assert!(matches(&doc, &doc! { "bedrooms": 5_i64 }).unwrap());
        assert!(matches(&doc, &doc! { "bedrooms": 5.0 }).unwrap());
        assert!(matches(&doc, &doc! { "bedrooms": { "$gte": 5, "$lt": 6 } }).unwrap());
        assert!(!matches(&doc, &doc! { "price": { "$gt": 200 } }).unwrap());
    }

    #[test]
    fn test_in_against_array_field() {
        let doc = listing();
        let booked = doc! {
            "datesReserved": { "$in": [ DateTime::from_millis(1_577_836_800_000) ] }
        };
        let free = doc! {
            "datesReserved": { "$in": [ DateTime::from_millis(1_600_000_000_000) ] }
        };
        assert!(matches(&doc, &booked).unwrap());
        assert!(!matches(&doc, &free).unwrap());
        let filter = doc! { "datesReserved": { "$nin": [ DateTime::from_millis(0) ] } };
        assert!(matches(&doc, &filter).unwrap());
    }

    #[test]
    fn test_arrays_of_documents() {
        let doc = listing();
        assert!(matches(&doc, &doc! { "reviews.score": 70 }).unwrap());
        assert!(matches(&doc, &doc! { "reviews.0.score": { "$gt": 80 } }).unwrap());
        assert!(!matches(&doc, &doc! { "reviews.score": { "$gt": 95 } }).unwrap());
    }

    #[test]
    fn test_exists_and_null() {
        let doc = listing();
        assert!(matches(&doc, &doc! { "property_type": { "$exists": false } }).unwrap());
        assert!(matches(&doc, &doc! { "property_type": null }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$exists": true } }).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let doc = listing();
        let either = doc! { "$or": [ { "bedrooms": 1 }, { "address.country": "Australia" } ] };
        let both = doc! { "$and": [ { "bedrooms": 1 }, { "address.country": "Australia" } ] };
        assert!(matches(&doc, &either).unwrap());
        assert!(!matches(&doc, &both).unwrap());
        assert!(matches(&doc, &doc! { "$nor": [ { "bedrooms": 1 } ] }).unwrap());
    }

    #[test]
    fn test_unsupported_operator_is_rejected() {
        let doc = listing();
        assert!(matches(&doc, &doc! { "name": { "$regex": "^Inf" } }).is_err());
        assert!(matches(&doc, &doc! { "$where": "true" }).is_err());
        assert!(matches(&doc, &doc! { "$or": [] }).is_err());
    }

    #[test]
    fn test_get_path() {
        let doc = listing();
        assert_eq!(get_path(&doc, "address.country"), Some(&Bson::String("Australia".into())));
        assert_eq!(get_path(&doc, "reviews.1.score"), Some(&Bson::Int32(70)));
        assert_eq!(get_path(&doc, "address.missing"), None);
    }
}
