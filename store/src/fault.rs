//! Fault injection for exercising retry and failure paths.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use atomicdoc_common::StoreError;

/// Where an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultPoint {
    /// Opening a scope.
    StartScope,
    /// Any document operation inside a scope.
    Operation,
    /// Committing a scope.
    Commit,
}

/// A one-shot fault: the next matching call fails with `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedFault {
    pub point: FaultPoint,
    /// Restrict an `Operation` fault to one collection.
    pub collection: Option<String>,
    pub error: StoreError,
}

impl InjectedFault {
    pub fn new(point: FaultPoint, error: StoreError) -> Self {
        Self {
            point,
            collection: None,
            error,
        }
    }

    /// Only fire for operations on `collection`.
    pub fn on_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    fn applies(&self, point: FaultPoint, collection: Option<&str>) -> bool {
        if self.point != point {
            return false;
        }
        match (&self.collection, collection) {
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Queue of pending faults plus simulated latency.
#[derive(Debug, Default)]
pub struct FaultInjector {
    pending: Mutex<VecDeque<InjectedFault>>,
    latency: Mutex<Option<Duration>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, fault: InjectedFault) {
        self.pending.lock().push_back(fault);
    }

    /// Remove and return the first fault that applies here.
    pub fn take(&self, point: FaultPoint, collection: Option<&str>) -> Option<StoreError> {
        let mut pending = self.pending.lock();
        let index = pending
            .iter()
            .position(|fault| fault.applies(point, collection))?;
        pending.remove(index).map(|fault| fault.error)
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }
}
