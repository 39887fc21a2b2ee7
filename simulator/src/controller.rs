//! Simulation controller.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use atomicdoc_common::{bson::DateTime, doc, Document};
use atomicdoc_coordinator::{
    CoordinatorConfig, MutationPlan, TransactionOutcome, TransactionalMutationCoordinator,
};

use crate::fixtures::{integer, Fixtures};
use crate::flows::{self, ACCOUNTS, INVENTORY, LISTINGS, ORDERS, USERS};
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Scenario, ScenarioStep};

/// Accounts seeded before every scenario, with their opening balances.
pub const SEED_ACCOUNTS: &[(&str, i32)] = &[("account1", 500), ("account2", 0), ("account3", 250)];

/// One printed outcome.
#[derive(Debug, Serialize)]
struct OutcomeLine<'a> {
    scenario: &'a str,
    plan: &'a str,
    status: &'a str,
    attempts: u32,
    explanation: String,
}

/// Runs scenarios against one store.
pub struct SimulationController<S: Fixtures> {
    store: Arc<S>,
    coordinator: Arc<TransactionalMutationCoordinator<S>>,
    rng: StdRng,
    metrics: SimulationMetrics,
    last: Option<TransactionOutcome>,
    failures: Vec<String>,
    json: bool,
}

impl<S: Fixtures> SimulationController<S> {
    pub fn new(store: Arc<S>, config: CoordinatorConfig, seed: Option<u64>, json: bool) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            coordinator: Arc::new(TransactionalMutationCoordinator::new(store.clone(), config)),
            store,
            rng,
            metrics: SimulationMetrics::new(),
            last: None,
            failures: Vec::new(),
            json,
        }
    }

    /// Reset every collection the flows touch and load the sample data.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        self.store.reset(ACCOUNTS, Some(("balance", 0.0))).await?;
        self.store.reset(INVENTORY, Some(("numberInStock", 0.0))).await?;
        self.store.reset(ORDERS, None).await?;
        self.store.reset(USERS, None).await?;
        self.store.reset(LISTINGS, None).await?;

        let accounts = SEED_ACCOUNTS
            .iter()
            .map(|(id, balance)| doc! { "_id": *id, "balance": *balance })
            .collect();
        self.store.seed(ACCOUNTS, accounts).await?;
        self.store
            .seed(
                INVENTORY,
                vec![doc! {
                    "_id": "parks-rec-book",
                    "name": "The Ultimate Parks and Rec Book for the Ultimate Fans",
                    "numberInStock": 5,
                }],
            )
            .await?;
        self.store
            .seed(
                USERS,
                vec![doc! { "email": "leslie@example.com", "name": "Leslie Yepp" }],
            )
            .await?;
        self.store
            .seed(
                LISTINGS,
                vec![doc! { "name": "Infinite Views", "datesReserved": [] }],
            )
            .await?;

        info!(backend = self.store.backend(), "Sample data loaded");
        Ok(())
    }

    /// Run a scenario from freshly seeded data.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        self.store.clear_faults();
        self.initialize().await?;
        self.last = None;

        for step in &scenario.steps {
            self.execute_step(&scenario.name, step).await?;
        }

        Ok(())
    }

    async fn execute_step(&mut self, scenario: &str, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Transfer { from, to, amount } => {
                self.run_plan(scenario, flows::transfer_funds(from, to, *amount))
                    .await;
            }
            ScenarioStep::Purchase {
                user,
                book,
                quantity,
            } => {
                self.run_plan(scenario, flows::purchase_book(user, book, *quantity, "paid"))
                    .await;
            }
            ScenarioStep::Reserve {
                email,
                listing,
                dates,
            } => {
                let dates: Vec<DateTime> =
                    dates.iter().copied().map(DateTime::from_millis).collect();
                let details = doc! {
                    "pricePerNight": 180,
                    "specialRequests": "Late checkout",
                    "breakfastIncluded": true,
                };
                self.run_plan(
                    scenario,
                    flows::create_reservation(email, listing, &dates, &details),
                )
                .await;
            }
            ScenarioStep::ConcurrentTransfers { count, max_amount } => {
                self.concurrent_transfers(scenario, *count, *max_amount).await;
            }
            ScenarioStep::InjectTransient { collection } => {
                if self.store.inject_transient(collection) {
                    info!("Injected transient fault on {}", collection);
                } else {
                    warn!(
                        backend = self.store.backend(),
                        "Fault injection not supported, expect assertions on attempts to fail"
                    );
                }
            }
            ScenarioStep::ClearFaults => self.store.clear_faults(),
            ScenarioStep::Assert { condition } => {
                if let Err(failure) = self.check(condition).await? {
                    warn!(scenario, "Assertion failed: {}", failure);
                    self.failures.push(format!("{}: {}", scenario, failure));
                }
            }
        }

        Ok(())
    }

    async fn run_plan(&mut self, scenario: &str, plan: MutationPlan) {
        let started = Instant::now();
        let outcome = self.coordinator.execute(&plan).await;
        self.metrics.record(&outcome, started.elapsed());
        self.report(scenario, &outcome);
        self.last = Some(outcome);
    }

    async fn concurrent_transfers(&mut self, scenario: &str, count: usize, max_amount: i64) {
        let plans: Vec<MutationPlan> = (0..count)
            .map(|_| {
                let from = self.rng.gen_range(0..SEED_ACCOUNTS.len());
                let mut to = self.rng.gen_range(0..SEED_ACCOUNTS.len());
                while to == from {
                    to = self.rng.gen_range(0..SEED_ACCOUNTS.len());
                }
                let amount = self.rng.gen_range(1..=max_amount.max(1));
                flows::transfer_funds(SEED_ACCOUNTS[from].0, SEED_ACCOUNTS[to].0, amount)
            })
            .collect();

        let runs = plans.iter().map(|plan| {
            let coordinator = self.coordinator.clone();
            async move {
                let started = Instant::now();
                let outcome = coordinator.execute(plan).await;
                (outcome, started.elapsed())
            }
        });

        for (outcome, latency) in join_all(runs).await {
            self.metrics.record(&outcome, latency);
            self.report(scenario, &outcome);
            self.last = Some(outcome);
        }
    }

    fn report(&self, scenario: &str, outcome: &TransactionOutcome) {
        if self.json {
            let line = OutcomeLine {
                scenario,
                plan: outcome.plan_name(),
                status: outcome.status(),
                attempts: outcome.attempts(),
                explanation: outcome.explanation(),
            };
            match serde_json::to_string(&line) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Could not encode outcome: {}", e),
            }
        } else {
            println!("[{}] {:<9} {}", scenario, outcome.status(), outcome.explanation());
        }
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<Result<(), String>> {
        let verdict = match condition {
            AssertCondition::LastStatus { status } => {
                let actual = self.last.as_ref().map(|o| o.status());
                expect_eq("last status", actual, Some(status.as_str()))
            }
            AssertCondition::LastAttempts { attempts } => {
                let actual = self.last.as_ref().map(|o| o.attempts());
                expect_eq("last attempts", actual, Some(*attempts))
            }
            AssertCondition::BalanceEquals { account, balance } => {
                let actual = self.number(ACCOUNTS, doc! { "_id": account }, "balance").await?;
                expect_eq(&format!("{} balance", account), actual, Some(*balance))
            }
            AssertCondition::TotalBalance { balance } => {
                let mut total = 0;
                for (account, _) in SEED_ACCOUNTS {
                    total += self
                        .number(ACCOUNTS, doc! { "_id": *account }, "balance")
                        .await?
                        .unwrap_or(0);
                }
                expect_eq("total balance", total, *balance)
            }
            AssertCondition::StockEquals { book, in_stock } => {
                let actual = self
                    .number(INVENTORY, doc! { "_id": book }, "numberInStock")
                    .await?;
                expect_eq(&format!("{} stock", book), actual, Some(*in_stock))
            }
            AssertCondition::ReservationCount { email, count } => {
                let actual = self
                    .store
                    .read(USERS, doc! { "email": email })
                    .await?
                    .and_then(|user| user.get_array("reservations").ok().map(Vec::len))
                    .unwrap_or(0);
                expect_eq(&format!("{} reservations", email), actual, *count)
            }
        };
        Ok(verdict)
    }

    async fn number(
        &self,
        collection: &str,
        filter: Document,
        field: &str,
    ) -> anyhow::Result<Option<i64>> {
        Ok(self
            .store
            .read(collection, filter)
            .await?
            .and_then(|document| integer(&document, field)))
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    pub fn coordinator(&self) -> &TransactionalMutationCoordinator<S> {
        &self.coordinator
    }

    /// Assertions that did not hold, prefixed with their scenario.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}

fn expect_eq<T: PartialEq + std::fmt::Debug>(
    what: &str,
    actual: T,
    expected: T,
) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("{}: expected {:?}, got {:?}", what, expected, actual))
    }
}

#[cfg(test)]
mod tests {
    use atomicdoc_coordinator::RetryPolicy;
    use atomicdoc_store::MemoryStore;

    use super::*;

    fn controller(store: MemoryStore) -> SimulationController<MemoryStore> {
        let mut config = CoordinatorConfig::default();
        config.retry = RetryPolicy::default().with_max_attempts(10).without_jitter();
        SimulationController::new(Arc::new(store), config, Some(7), false)
    }

    #[tokio::test]
    async fn test_every_scenario_passes_on_memory_store() {
        let mut controller = controller(MemoryStore::new());
        for scenario in Scenario::load_many("all").unwrap() {
            controller.run_scenario(&scenario).await.unwrap();
        }
        assert!(controller.failures().is_empty(), "{:?}", controller.failures());

        let metrics = controller.metrics();
        assert!(metrics.committed > 0);
        assert!(metrics.aborted >= 3);
        assert!(metrics.extra_attempts >= 1);
    }

    #[tokio::test]
    async fn test_failed_assertion_is_collected() {
        let mut controller = controller(MemoryStore::new());
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "expects the wrong balance".to_string(),
            steps: vec![
                ScenarioStep::Transfer {
                    from: "account1".to_string(),
                    to: "account2".to_string(),
                    amount: 10,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        account: "account2".to_string(),
                        balance: 999,
                    },
                },
            ],
        };
        controller.run_scenario(&scenario).await.unwrap();
        assert_eq!(controller.failures().len(), 1);
        assert!(controller.failures()[0].contains("expected Some(999), got Some(10)"));
    }

    #[tokio::test]
    async fn test_scenarios_reseed() {
        let store = MemoryStore::new();
        let mut controller = controller(store.clone());
        let transfer = Scenario::load("transfer").unwrap();
        controller.run_scenario(&transfer).await.unwrap();
        controller.run_scenario(&transfer).await.unwrap();
        assert!(controller.failures().is_empty(), "{:?}", controller.failures());
        assert_eq!(store.count(ORDERS, &doc! {}).unwrap(), 0);
    }
}
