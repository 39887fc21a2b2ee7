//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// Midnight UTC, 2019-12-31.
pub const NEW_YEARS_EVE: i64 = 1_577_750_400_000;
/// Midnight UTC, 2020-01-01.
pub const NEW_YEARS_DAY: i64 = 1_577_836_800_000;

/// Names accepted by [`Scenario::load`], in the order `all` runs them.
pub const SCENARIOS: &[&str] = &[
    "transfer",
    "insufficient-funds",
    "purchase",
    "double-booking",
    "transient-retry",
    "concurrent-transfers",
];

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Move money between accounts.
    Transfer { from: String, to: String, amount: i64 },
    /// Buy copies of a book.
    Purchase {
        user: String,
        book: String,
        quantity: i32,
    },
    /// Reserve a listing. Dates are milliseconds since the epoch.
    Reserve {
        email: String,
        listing: String,
        dates: Vec<i64>,
    },
    /// Run random transfers between the seeded accounts at the same time.
    ConcurrentTransfers { count: usize, max_amount: i64 },
    /// Fail the next operation on a collection with a transient error.
    InjectTransient { collection: String },
    /// Remove pending faults.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// The previous plan ended with this status.
    LastStatus { status: String },
    /// The previous plan took this many attempts.
    LastAttempts { attempts: u32 },
    /// Account balance equals.
    BalanceEquals { account: String, balance: i64 },
    /// Sum of the seeded account balances equals.
    TotalBalance { balance: i64 },
    /// Book stock equals.
    StockEquals { book: String, in_stock: i64 },
    /// Number of reservations stored on a user.
    ReservationCount { email: String, count: usize },
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "transfer" => Ok(Self::transfer()),
            "insufficient-funds" => Ok(Self::insufficient_funds()),
            "purchase" => Ok(Self::purchase()),
            "double-booking" => Ok(Self::double_booking()),
            "transient-retry" => Ok(Self::transient_retry()),
            "concurrent-transfers" => Ok(Self::concurrent_transfers()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {} or all)",
                name,
                SCENARIOS.join(", ")
            )),
        }
    }

    /// Resolve `all` or a single scenario name.
    pub fn load_many(name: &str) -> anyhow::Result<Vec<Self>> {
        if name == "all" {
            SCENARIOS.iter().map(|name| Self::load(name)).collect()
        } else {
            Ok(vec![Self::load(name)?])
        }
    }

    fn transfer() -> Self {
        Self {
            name: "transfer".to_string(),
            description: "Move 100 from account1 to account2".to_string(),
            steps: vec![
                transfer("account1", "account2", 100),
                expect_status("COMMITTED"),
                expect_balance("account1", 400),
                expect_balance("account2", 100),
            ],
        }
    }

    fn insufficient_funds() -> Self {
        Self {
            name: "insufficient-funds".to_string(),
            description: "Overdraw account2 and leave both balances untouched".to_string(),
            steps: vec![
                transfer("account2", "account1", 100),
                expect_status("ABORTED"),
                expect_balance("account1", 500),
                expect_balance("account2", 0),
            ],
        }
    }

    fn purchase() -> Self {
        Self {
            name: "purchase".to_string(),
            description: "Buy one book, then try to buy more than is in stock".to_string(),
            steps: vec![
                ScenarioStep::Purchase {
                    user: "User1".to_string(),
                    book: "parks-rec-book".to_string(),
                    quantity: 1,
                },
                expect_status("COMMITTED"),
                expect_stock("parks-rec-book", 4),
                ScenarioStep::Purchase {
                    user: "User2".to_string(),
                    book: "parks-rec-book".to_string(),
                    quantity: 10,
                },
                expect_status("ABORTED"),
                expect_stock("parks-rec-book", 4),
            ],
        }
    }

    fn double_booking() -> Self {
        Self {
            name: "double-booking".to_string(),
            description: "Reserve Infinite Views twice for overlapping dates".to_string(),
            steps: vec![
                reserve(vec![NEW_YEARS_EVE, NEW_YEARS_DAY]),
                expect_status("COMMITTED"),
                reserve(vec![NEW_YEARS_DAY]),
                expect_status("ABORTED"),
                ScenarioStep::Assert {
                    condition: AssertCondition::ReservationCount {
                        email: "leslie@example.com".to_string(),
                        count: 1,
                    },
                },
            ],
        }
    }

    fn transient_retry() -> Self {
        Self {
            name: "transient-retry".to_string(),
            description: "A transient error on the first attempt is retried".to_string(),
            steps: vec![
                ScenarioStep::InjectTransient {
                    collection: "accounts".to_string(),
                },
                transfer("account1", "account2", 50),
                expect_status("COMMITTED"),
                ScenarioStep::Assert {
                    condition: AssertCondition::LastAttempts { attempts: 2 },
                },
                expect_balance("account2", 50),
                ScenarioStep::ClearFaults,
            ],
        }
    }

    fn concurrent_transfers() -> Self {
        Self {
            name: "concurrent-transfers".to_string(),
            description: "Random transfers race on the same accounts; money is conserved"
                .to_string(),
            steps: vec![
                ScenarioStep::ConcurrentTransfers {
                    count: 20,
                    max_amount: 120,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::TotalBalance { balance: 750 },
                },
            ],
        }
    }
}

fn transfer(from: &str, to: &str, amount: i64) -> ScenarioStep {
    ScenarioStep::Transfer {
        from: from.to_string(),
        to: to.to_string(),
        amount,
    }
}

fn reserve(dates: Vec<i64>) -> ScenarioStep {
    ScenarioStep::Reserve {
        email: "leslie@example.com".to_string(),
        listing: "Infinite Views".to_string(),
        dates,
    }
}

fn expect_status(status: &str) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::LastStatus {
            status: status.to_string(),
        },
    }
}

fn expect_balance(account: &str, balance: i64) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::BalanceEquals {
            account: account.to_string(),
            balance,
        },
    }
}

fn expect_stock(book: &str, in_stock: i64) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::StockEquals {
            book: book.to_string(),
            in_stock,
        },
    }
}
