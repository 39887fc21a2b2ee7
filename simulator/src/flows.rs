//! Business flows expressed as mutation plans.

use atomicdoc_common::{bson::DateTime, doc, Bson, Document};
use atomicdoc_coordinator::{MutationPlan, MutationStep};

pub const ACCOUNTS: &str = "accounts";
pub const INVENTORY: &str = "inventory";
pub const ORDERS: &str = "orders";
pub const USERS: &str = "users";
pub const LISTINGS: &str = "listingsAndReviews";

/// Move `amount` from one account to another.
///
/// The debit only matches while the balance covers the amount, so an
/// overdraft shows up as zero modified documents and aborts the plan.
pub fn transfer_funds(from: &str, to: &str, amount: i64) -> MutationPlan {
    MutationPlan::builder(format!("transfer {} {} -> {}", amount, from, to))
        .step(
            MutationStep::update_one(
                format!("debit {}", from),
                ACCOUNTS,
                doc! { "_id": from, "balance": { "$gte": amount } },
                doc! { "$inc": { "balance": -amount } },
            )
            .expect_modified(1),
        )
        .step(
            MutationStep::update_one(
                format!("credit {}", to),
                ACCOUNTS,
                doc! { "_id": to },
                doc! { "$inc": { "balance": amount } },
            )
            .expect_modified(1),
        )
        .build()
}

/// Take `quantity` copies of a book out of stock and record the order.
pub fn purchase_book(user_id: &str, book_id: &str, quantity: i32, status: &str) -> MutationPlan {
    MutationPlan::builder(format!("purchase {} x{} for {}", book_id, quantity, user_id))
        .step(
            MutationStep::update_one(
                format!("take {} from stock", book_id),
                INVENTORY,
                doc! { "_id": book_id, "numberInStock": { "$gte": quantity } },
                doc! { "$inc": { "numberInStock": -quantity } },
            )
            .expect_modified(1),
        )
        .step(MutationStep::insert(
            "record order",
            ORDERS,
            doc! {
                "userId": user_id,
                "bookId": book_id,
                "quantity": quantity,
                "status": status,
            },
        ))
        .build()
}

/// The reservation stored on the user: listing name, dates, then every
/// detail field.
pub fn reservation_document(listing: &str, dates: &[DateTime], details: &Document) -> Document {
    let mut reservation = doc! {
        "name": listing,
        "dates": dates_array(dates),
    };
    for (key, value) in details {
        reservation.insert(key.clone(), value.clone());
    }
    reservation
}

/// Reserve a listing for `dates` on behalf of a user.
///
/// The user's reservation is written first; the plan then aborts if any of
/// the dates is already taken, which rolls the user update back too.
pub fn create_reservation(
    user_email: &str,
    listing: &str,
    dates: &[DateTime],
    details: &Document,
) -> MutationPlan {
    let reservation = reservation_document(listing, dates, details);

    MutationPlan::builder(format!("reserve {} for {}", listing, user_email))
        .step(
            MutationStep::update_one(
                format!("add reservation to {}", user_email),
                USERS,
                doc! { "email": user_email },
                doc! { "$addToSet": { "reservations": reservation } },
            )
            .expect_modified(1)
            .abort_if_exists(
                LISTINGS,
                doc! { "name": listing, "datesReserved": { "$in": dates_array(dates) } },
                format!("{} is already reserved for at least one of the dates", listing),
            ),
        )
        .step(
            MutationStep::update_one(
                format!("reserve dates on {}", listing),
                LISTINGS,
                doc! { "name": listing },
                doc! { "$addToSet": { "datesReserved": { "$each": dates_array(dates) } } },
            )
            .expect_modified(1),
        )
        .build()
}

fn dates_array(dates: &[DateTime]) -> Bson {
    Bson::Array(dates.iter().copied().map(Bson::DateTime).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use atomicdoc_coordinator::{TransactionOutcome, TransactionalMutationCoordinator};
    use atomicdoc_store::{CollectionRules, MemoryStore};

    use super::*;

    fn date(millis: i64) -> DateTime {
        DateTime::from_millis(millis)
    }

    async fn airbnb_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_collection(USERS);
        store.create_collection(LISTINGS);
        store
            .insert_many(USERS, vec![doc! { "email": "leslie@example.com", "name": "Leslie Yepp" }])
            .await
            .unwrap();
        store
            .insert_many(
                LISTINGS,
                vec![doc! { "name": "Infinite Views", "datesReserved": [] }],
            )
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_reservation_document_merges_details() {
        let reservation = reservation_document(
            "Infinite Views",
            &[date(1), date(2)],
            &doc! { "pricePerNight": 180, "breakfastIncluded": true },
        );
        let keys: Vec<&str> = reservation.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "dates", "pricePerNight", "breakfastIncluded"]);
        assert_eq!(reservation.get_array("dates").unwrap().len(), 2);
    }

    #[test]
    fn test_transfer_plan_shape() {
        let plan = transfer_funds("account1", "account2", 100);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.collections().into_iter().collect::<Vec<_>>(), vec![ACCOUNTS]);
        assert_eq!(plan.steps[0].name, "debit account1");
    }

    #[tokio::test]
    async fn test_purchase_decrements_stock_and_records_order() {
        let store = MemoryStore::new();
        store.create_collection_with_rules(
            INVENTORY,
            CollectionRules::new().minimum("numberInStock", 0.0),
        );
        store.create_collection(ORDERS);
        store
            .insert_many(INVENTORY, vec![doc! { "_id": "parks-rec-book", "numberInStock": 5 }])
            .await
            .unwrap();
        let coordinator = TransactionalMutationCoordinator::with_defaults(Arc::new(store.clone()));

        let outcome = coordinator
            .execute(&purchase_book("User1", "parks-rec-book", 2, "paid"))
            .await;
        assert!(outcome.is_committed(), "{}", outcome);

        let book = store.find_one(INVENTORY, &doc! { "_id": "parks-rec-book" }).unwrap().unwrap();
        assert_eq!(book.get_i32("numberInStock").unwrap(), 3);
        assert_eq!(store.count(ORDERS, &doc! { "userId": "User1" }).unwrap(), 1);

        let outcome = coordinator
            .execute(&purchase_book("User2", "parks-rec-book", 4, "paid"))
            .await;
        assert!(outcome.is_aborted());
        assert_eq!(store.count(ORDERS, &doc! {}).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_double_booking_rolls_back_user() {
        let store = airbnb_store().await;
        let coordinator = TransactionalMutationCoordinator::with_defaults(Arc::new(store.clone()));
        let details = doc! { "pricePerNight": 180 };

        let first = coordinator
            .execute(&create_reservation(
                "leslie@example.com",
                "Infinite Views",
                &[date(1_577_750_400_000), date(1_577_836_800_000)],
                &details,
            ))
            .await;
        assert!(first.is_committed(), "{}", first);

        let second = coordinator
            .execute(&create_reservation(
                "leslie@example.com",
                "Infinite Views",
                &[date(1_577_836_800_000)],
                &details,
            ))
            .await;
        match second {
            TransactionOutcome::AbortedByPolicy { step_index, .. } => assert_eq!(step_index, 0),
            other => panic!("expected abort, got {}", other),
        }

        let user = store.find_one(USERS, &doc! { "email": "leslie@example.com" }).unwrap().unwrap();
        assert_eq!(user.get_array("reservations").unwrap().len(), 1);
        let listing = store
            .find_one(LISTINGS, &doc! { "name": "Infinite Views" })
            .unwrap()
            .unwrap();
        assert_eq!(listing.get_array("datesReserved").unwrap().len(), 2);
    }
}
