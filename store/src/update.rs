//! Update operator evaluation.
//!
//! Supported operators: `$set`, `$unset`, `$inc`, `$push` and `$addToSet`
//! (both accepting `{ $each: [...] }`). Replacement-style updates are not
//! supported; every top-level key must be an operator.

use bson::{oid::ObjectId, Bson, Document};

use atomicdoc_common::{StoreError, StoreResult};

use crate::matcher::{as_f64, values_equal};

/// Apply `update` to `document`. Returns whether the document changed.
pub fn apply_update(document: &mut Document, update: &Document) -> StoreResult<bool> {
    if update.is_empty() {
        return Err(invalid("update document must not be empty"));
    }

    let before = document.clone();

    for (op, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            _ => return Err(invalid(format!("{} requires a document of fields", op))),
        };

        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(invalid("the _id field is immutable"));
            }
            match op.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$unset" => {
                    remove_path(document, path);
                }
                "$inc" => increment(document, path, value)?,
                "$push" => append(document, path, value, false)?,
                "$addToSet" => append(document, path, value, true)?,
                other if other.starts_with('$') => {
                    return Err(invalid(format!("unsupported update operator {}", other)))
                }
                _ => return Err(invalid("update document requires update operators")),
            }
        }
    }

    Ok(*document != before)
}

/// Build the document inserted by an upsert that matched nothing: equality
/// fields from the filter, then the update applied on top.
pub fn upsert_document(filter: &Document, update: &Document) -> StoreResult<Document> {
    let mut seed = Document::new();
    for (path, condition) in filter {
        if path.starts_with('$') {
            continue;
        }
        let is_operator = matches!(
            condition,
            Bson::Document(inner) if inner.keys().next().map_or(false, |k| k.starts_with('$'))
        );
        if !is_operator {
            set_path(&mut seed, path, condition.clone())?;
        }
    }

    let id = seed
        .remove("_id")
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));

    apply_update(&mut seed, update)?;
    Ok(with_id_first(id, seed))
}

/// Put `_id` at the front of the document.
pub fn with_id_first(id: Bson, document: Document) -> Document {
    let mut ordered = Document::new();
    ordered.insert("_id", id);
    for (key, value) in document {
        if key != "_id" {
            ordered.insert(key, value);
        }
    }
    ordered
}

/// Set a value at a dotted path, creating intermediate documents.
pub fn set_path(document: &mut Document, path: &str, value: Bson) -> StoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            match child {
                Bson::Document(inner) => set_path(inner, rest, value),
                _ => Err(invalid(format!(
                    "cannot create field '{}' inside non-document '{}'",
                    rest, head
                ))),
            }
        }
    }
}

/// Remove the value at a dotted path, if present.
pub fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            _ => None,
        },
    }
}

fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        None => document.get_mut(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => get_path_mut(inner, rest),
            _ => None,
        },
    }
}

fn increment(document: &mut Document, path: &str, amount: &Bson) -> StoreResult<()> {
    if as_f64(amount).is_none() {
        return Err(invalid(format!("cannot increment {} by a non-numeric value", path)));
    }
    let updated = match get_path_mut(document, path) {
        None => amount.clone(),
        Some(current) => add_numbers(current, amount, path)?,
    };
    set_path(document, path, updated)
}

/// Integer sums widen from 32 to 64 bits; overflowing 64 bits is an error.
fn add_numbers(current: &Bson, amount: &Bson, path: &str) -> StoreResult<Bson> {
    let overflow = || invalid(format!("$inc on {} would overflow", path));
    match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b)))),
        (Bson::Int32(a), Bson::Int64(b)) => i64::from(*a)
            .checked_add(*b)
            .map(Bson::Int64)
            .ok_or_else(overflow),
        (Bson::Int64(a), Bson::Int32(b)) => a
            .checked_add(i64::from(*b))
            .map(Bson::Int64)
            .ok_or_else(overflow),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64).ok_or_else(overflow),
        _ => match (as_f64(current), as_f64(amount)) {
            (Some(a), Some(b)) => Ok(Bson::Double(a + b)),
            _ => Err(invalid(format!("cannot apply $inc to non-numeric field {}", path))),
        },
    }
}

fn append(document: &mut Document, path: &str, value: &Bson, unique: bool) -> StoreResult<()> {
    let items: Vec<Bson> = match value {
        Bson::Document(modifier) if modifier.contains_key("$each") => match modifier.get("$each") {
            Some(Bson::Array(each)) => each.clone(),
            _ => return Err(invalid("$each requires an array")),
        },
        other => vec![other.clone()],
    };

    let mut array = match get_path_mut(document, path) {
        None => Vec::new(),
        Some(Bson::Array(existing)) => existing.clone(),
        Some(_) => {
            return Err(invalid(format!(
                "cannot append to non-array field {}",
                path
            )))
        }
    };

    for item in items {
        if unique && array.iter().any(|existing| values_equal(existing, &item)) {
            continue;
        }
        array.push(item);
    }

    set_path(document, path, Bson::Array(array))
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidOperation(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_inc_reports_change() {
        let mut account = doc! { "_id": "account1", "balance": 500 };
        assert!(apply_update(&mut account, &doc! { "$inc": { "balance": -100 } }).unwrap());
        assert_eq!(account.get_i32("balance").unwrap(), 400);

        // Incrementing by zero is not a modification.
        assert!(!apply_update(&mut account, &doc! { "$inc": { "balance": 0 } }).unwrap());
    }

    #[test]
    fn test_inc_widens_then_rejects_overflow() {
        let mut account = doc! { "balance": i32::MAX };
        apply_update(&mut account, &doc! { "$inc": { "balance": 1 } }).unwrap();
        assert_eq!(account.get_i64("balance").unwrap(), i64::from(i32::MAX) + 1);

        let mut account = doc! { "balance": i64::MAX };
        let error = apply_update(&mut account, &doc! { "$inc": { "balance": 1i64 } }).unwrap_err();
        assert!(matches!(error, StoreError::InvalidOperation(ref m) if m.contains("overflow")));
        assert!(apply_update(&mut account, &doc! { "$inc": { "balance": 1i32 } }).is_err());

        let mut account = doc! { "balance": 1 };
        assert!(apply_update(&mut account, &doc! { "$inc": { "balance": i64::MAX } }).is_err());
        assert_eq!(account.get_i32("balance").unwrap(), 1);
    }

    #[test]
    fn test_inc_promotes_types() {
        let mut doc = doc! { "a": i32::MAX, "b": 1, "c": 1.5 };
        apply_update(&mut doc, &doc! { "$inc": { "a": 1, "b": 2_i64, "c": 1 } }).unwrap();
        assert_eq!(doc.get("a"), Some(&Bson::Int64(i64::from(i32::MAX) + 1)));
        assert_eq!(doc.get("b"), Some(&Bson::Int64(3)));
        assert_eq!(doc.get("c"), Some(&Bson::Double(2.5)));
    }

    #[test]
    fn test_inc_rejects_non_numeric() {
        let mut doc = doc! { "name": "book" };
        assert!(apply_update(&mut doc, &doc! { "$inc": { "name": 1 } }).is_err());
        assert!(apply_update(&mut doc, &doc! { "$inc": { "count": "one" } }).is_err());
    }

    #[test]
    fn test_set_and_unset_nested() {
        let mut doc = doc! { "name": "Cozy Cottage" };
        let update = doc! { "$set": { "address.city": "Porto", "beds": 2 } };
        assert!(apply_update(&mut doc, &update).unwrap());
        assert_eq!(doc.get_document("address").unwrap().get_str("city").unwrap(), "Porto");

        assert!(apply_update(&mut doc, &doc! { "$unset": { "address.city": "" } }).unwrap());
        assert!(doc.get_document("address").unwrap().is_empty());

        // Setting the same value again changes nothing.
        assert!(!apply_update(&mut doc, &doc! { "$set": { "beds": 2 } }).unwrap());
    }

    #[test]
    fn test_add_to_set_each_skips_existing() {
        let mut listing = doc! { "datesReserved": [1, 2] };
        let changed = apply_update(
            &mut listing,
            &doc! { "$addToSet": { "datesReserved": { "$each": [2, 3] } } },
        )
        .unwrap();
        assert!(changed);
        assert_eq!(listing.get_array("datesReserved").unwrap().len(), 3);

        let unchanged =
            apply_update(&mut listing, &doc! { "$addToSet": { "datesReserved": 3 } }).unwrap();
        assert!(!unchanged);
    }

    #[test]
    fn test_push_creates_array() {
        let mut user = doc! { "email": "leslie@example.com" };
        let push = doc! { "$push": { "reservations": { "name": "Infinite Views" } } };
        apply_update(&mut user, &push).unwrap();
        assert_eq!(user.get_array("reservations").unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_id_and_replacement_updates() {
        let mut doc = doc! { "_id": 1, "a": 1 };
        assert!(apply_update(&mut doc, &doc! { "$set": { "_id": 2 } }).is_err());
        assert!(apply_update(&mut doc, &doc! { "a": 2 }).is_err());
        assert!(apply_update(&mut doc, &doc! { "$rename": { "a": "b" } }).is_err());
        assert!(apply_update(&mut doc, &doc! {}).is_err());
    }

    #[test]
    fn test_upsert_document_uses_filter_equality_fields() {
        let filter = doc! { "name": "Cozy Cottage", "bedrooms": { "$gte": 1 } };
        let update = doc! { "$set": { "bathrooms": 1 } };
        let created = upsert_document(&filter, &update).unwrap();

        let keys: Vec<&String> = created.keys().collect();
        assert_eq!(keys[0], "_id");
        assert_eq!(created.get_str("name").unwrap(), "Cozy Cottage");
        assert_eq!(created.get_i32("bathrooms").unwrap(), 1);
        assert!(!created.contains_key("bedrooms"));
    }
}
