use std::fmt;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::store::KeyValueStore;

/// Storage key holding the notified history. The ledger is the single writer.
pub const NOTIFIED_STORE_KEY: &str = "notified_customers";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReminderCategory {
    Flight,
    Hotel,
}

impl fmt::Display for ReminderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderCategory::Flight => f.write_str("Flight"),
            ReminderCategory::Hotel => f.write_str("Hotel"),
        }
    }
}

/// Customer who may need a travel reminder. Built fresh on every fetch cycle;
/// never persisted. Identity is the booking reference together with the
/// category, so one customer can hold a flight and a hotel reminder at once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderCandidate {
    pub booking_ref: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub category: ReminderCategory,
    /// Departure date for flights, check-in date for hotels.
    pub date: NaiveDate,
}

impl ReminderCandidate {
    pub fn key(&self) -> (ReminderCategory, &str) {
        (self.category, self.booking_ref.as_str())
    }
}

/// A candidate the agency has already contacted, stamped at promotion time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifiedRecord {
    pub customer: ReminderCandidate,
    pub notified_at: DateTime<Utc>,
}

/// Per-category reminder feed supplied by the backend collaborator.
pub trait ReminderSource: Send + Sync {
    fn fetch_candidates(&self, category: ReminderCategory) -> Result<Vec<ReminderCandidate>>;
}

/// Pulls both feeds, flights first. A failing feed aborts the cycle; the
/// caller retries on its next load.
pub fn collect_candidates(source: &dyn ReminderSource) -> Result<Vec<ReminderCandidate>> {
    let mut all = source
        .fetch_candidates(ReminderCategory::Flight)
        .context("flight reminder feed failed")?;
    let hotels = source
        .fetch_candidates(ReminderCategory::Hotel)
        .context("hotel reminder feed failed")?;
    all.extend(hotels);
    Ok(all)
}

/// Durable record of which customers were already reminded, most recent
/// first. Owns the persisted list exclusively: every mutation rewrites the
/// whole value under [`NOTIFIED_STORE_KEY`].
pub struct ReminderLedger {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    retention_days: i64,
    notified: Vec<NotifiedRecord>,
}

impl ReminderLedger {
    /// Loads the persisted history and immediately prunes entries older than
    /// the retention window, so the list stays bounded without the host
    /// remembering housekeeping. Unreadable stored data degrades to an empty
    /// history; a store read failure propagates.
    #[instrument(skip(store, clock))]
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        retention_days: i64,
    ) -> Result<Self> {
        ensure!(retention_days > 0, "retention window must be positive");

        let notified = match store.read(NOTIFIED_STORE_KEY)? {
            Some(raw) => match serde_json::from_str::<Vec<NotifiedRecord>>(&raw) {
                Ok(records) => records,
                Err(err) => {
                    warn!(%err, "stored reminder history is unreadable, starting empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut ledger = Self {
            store,
            clock,
            retention_days,
            notified,
        };
        ledger.prune()?;
        Ok(ledger)
    }

    /// Notified history, most recent first.
    pub fn notified(&self) -> &[NotifiedRecord] {
        &self.notified
    }

    pub fn len(&self) -> usize {
        self.notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notified.is_empty()
    }

    /// Filters `candidates` down to the ones not yet contacted. Pure with
    /// respect to ledger state.
    pub fn pending(&self, candidates: &[ReminderCandidate]) -> Vec<ReminderCandidate> {
        candidates
            .iter()
            .filter(|candidate| !self.contains(candidate.key()))
            .cloned()
            .collect()
    }

    fn contains(&self, key: (ReminderCategory, &str)) -> bool {
        self.notified.iter().any(|record| record.customer.key() == key)
    }

    /// Records that the customer has been contacted. `confirmed` carries the
    /// outcome of the host's confirmation dialog; a cancelled dialog leaves
    /// the ledger untouched. Promotion is a set union over the stable key, so
    /// a double-submitted candidate lands in the history exactly once.
    /// Returns whether an entry was added.
    pub fn promote(&mut self, candidate: &ReminderCandidate, confirmed: bool) -> Result<bool> {
        if !confirmed {
            return Ok(false);
        }
        if self.contains(candidate.key()) {
            debug!(
                booking_ref = %candidate.booking_ref,
                category = %candidate.category,
                "customer already notified, skipping duplicate"
            );
            return Ok(false);
        }
        self.notified.insert(
            0,
            NotifiedRecord {
                customer: candidate.clone(),
                notified_at: self.clock.now(),
            },
        );
        self.persist()?;
        Ok(true)
    }

    /// Removes the history row at `index`, matching the host's table
    /// addressing. Out-of-range indexes are ignored. Returns whether a row
    /// was removed.
    pub fn remove(&mut self, index: usize) -> Result<bool> {
        if index >= self.notified.len() {
            return Ok(false);
        }
        self.notified.remove(index);
        self.persist()?;
        Ok(true)
    }

    /// Empties the history. The host must have confirmed with the operator
    /// before calling; the ledger never prompts.
    pub fn clear_all(&mut self) -> Result<()> {
        self.notified.clear();
        self.persist()
    }

    /// Drops entries notified longer than the retention window ago. The store
    /// is rewritten only when something was actually dropped. Returns the
    /// number of dropped entries.
    pub fn prune(&mut self) -> Result<usize> {
        let cutoff = self.clock.now() - Duration::days(self.retention_days);
        let before = self.notified.len();
        self.notified.retain(|record| record.notified_at >= cutoff);
        let dropped = before - self.notified.len();
        if dropped > 0 {
            self.persist()?;
            debug!(dropped, retention_days = self.retention_days, "pruned reminder history");
        }
        Ok(dropped)
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.notified)
            .context("failed to serialize reminder history")?;
        self.store.write(NOTIFIED_STORE_KEY, &raw)?;
        Ok(())
    }
}
