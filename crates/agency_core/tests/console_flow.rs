use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::tempdir;

use agency_core::clock::ManualClock;
use agency_core::notifications::{Notification, NotificationSink};
use agency_core::reminder::{
    collect_candidates, NotifiedRecord, ReminderCandidate, ReminderCategory, ReminderLedger,
    ReminderSource, NOTIFIED_STORE_KEY,
};
use agency_core::store::{FileStore, KeyValueStore};
use agency_core::task::TaskEntry;
use agency_core::{TaskPoller, TaskSource};

struct ScriptedFeed {
    responses: Mutex<Vec<Result<Vec<TaskEntry>>>>,
}

impl ScriptedFeed {
    fn new(mut responses: Vec<Result<Vec<TaskEntry>>>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses),
        })
    }
}

impl TaskSource for ScriptedFeed {
    fn fetch_tasks(&self, _actor_id: &str) -> Result<Vec<TaskEntry>> {
        self.responses
            .lock()
            .pop()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Default)]
struct CollectingSink {
    seen: Mutex<Vec<Notification>>,
}

impl NotificationSink for CollectingSink {
    fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}

fn customer(booking_ref: &str, category: ReminderCategory, name: &str) -> ReminderCandidate {
    ReminderCandidate {
        booking_ref: booking_ref.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        phone: "555-0100".to_string(),
        category,
        date: NaiveDate::from_ymd_opt(2026, 9, 15).expect("valid date"),
    }
}

#[test]
fn poller_surfaces_the_newly_assigned_task() {
    let feed = ScriptedFeed::new(vec![
        Ok(vec![TaskEntry::new(1, "Book flight")]),
        Ok(vec![
            TaskEntry::new(1, "Book flight"),
            TaskEntry::new(2, "Call hotel"),
        ]),
        Ok(vec![
            TaskEntry::new(1, "Book flight"),
            TaskEntry::new(2, "Call hotel"),
        ]),
    ]);
    let sink = Arc::new(CollectingSink::default());
    let poller = TaskPoller::new(feed, sink.clone());

    poller.poll_now("maria");
    assert!(sink.seen.lock().is_empty(), "seeding tick must stay silent");

    poller.poll_now("maria");
    poller.poll_now("maria");

    let seen = sink.seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].message.contains("Call hotel"));
    assert!(seen[0].suggested_duration() > StdDuration::ZERO);
}

#[test]
fn background_polling_stops_cleanly() {
    let feed = ScriptedFeed::new(vec![
        Ok(vec![TaskEntry::new(1, "Book flight")]),
        Ok(vec![
            TaskEntry::new(1, "Book flight"),
            TaskEntry::new(2, "Call hotel"),
        ]),
    ]);
    let sink = Arc::new(CollectingSink::default());
    let mut poller = TaskPoller::new(feed, sink.clone());

    poller
        .start("maria", StdDuration::from_millis(10))
        .expect("start polling");
    let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
    while sink.seen.lock().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(StdDuration::from_millis(10));
    }
    poller.stop();
    poller.stop();

    let count = sink.seen.lock().len();
    assert_eq!(count, 1);
    std::thread::sleep(StdDuration::from_millis(50));
    assert_eq!(sink.seen.lock().len(), count, "no ticks after stop");
}

#[test]
fn ledger_state_survives_reopen() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(FileStore::open(temp.path().join("state")).expect("open store"));
    let t0 = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
    let jane = customer("BK-5", ReminderCategory::Flight, "Jane");
    let omar = customer("BK-6", ReminderCategory::Hotel, "Omar");

    {
        let mut ledger = ReminderLedger::open(
            store.clone(),
            Arc::new(ManualClock::starting_at(t0)),
            30,
        )
        .expect("open ledger");
        assert!(ledger.promote(&jane, true).expect("promote jane"));
    }

    let mut reopened = ReminderLedger::open(
        store.clone(),
        Arc::new(ManualClock::starting_at(t0)),
        30,
    )
    .expect("reopen ledger");
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.notified()[0].customer.name, "Jane");
    assert_eq!(reopened.notified()[0].notified_at, t0);

    let pending = reopened.pending(&[jane.clone(), omar.clone()]);
    assert_eq!(pending, vec![omar]);

    assert!(reopened.remove(0).expect("remove"));
    let raw = store
        .read(NOTIFIED_STORE_KEY)
        .expect("read store")
        .expect("key present");
    assert_eq!(raw, "[]");
}

#[test]
fn retention_window_is_enforced_across_reopen() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(FileStore::open(temp.path().join("state")).expect("open store"));
    let t0 = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::starting_at(t0 - Duration::days(40)));

    {
        let mut ledger =
            ReminderLedger::open(store.clone(), clock.clone(), 365).expect("open ledger");
        ledger
            .promote(&customer("BK-1", ReminderCategory::Flight, "Aged"), true)
            .expect("promote aged");
        clock.advance(Duration::days(30));
        ledger
            .promote(&customer("BK-2", ReminderCategory::Hotel, "Mid"), true)
            .expect("promote mid");
        clock.advance(Duration::days(9));
        ledger
            .promote(&customer("BK-3", ReminderCategory::Flight, "Fresh"), true)
            .expect("promote fresh");
    }

    clock.set(t0);
    let ledger = ReminderLedger::open(store.clone(), clock, 30).expect("reopen ledger");
    assert_eq!(ledger.len(), 2);
    assert!(ledger
        .notified()
        .iter()
        .all(|record| record.customer.booking_ref != "BK-1"));

    let raw = store
        .read(NOTIFIED_STORE_KEY)
        .expect("read store")
        .expect("key present");
    let persisted: Vec<NotifiedRecord> = serde_json::from_str(&raw).expect("parse history");
    assert_eq!(persisted.len(), 2);
}

#[test]
fn corrupt_state_file_degrades_to_an_empty_history() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(FileStore::open(temp.path().join("state")).expect("open store"));
    store
        .write(NOTIFIED_STORE_KEY, "{\"definitely\": \"not a history\"}")
        .expect("seed corrupt value");

    let t0 = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
    let ledger = ReminderLedger::open(store, Arc::new(ManualClock::starting_at(t0)), 30)
        .expect("open ledger despite corrupt state");
    assert!(ledger.is_empty());
}

#[test]
fn candidate_feeds_compose_with_the_ledger() {
    struct FixtureFeed;
    impl ReminderSource for FixtureFeed {
        fn fetch_candidates(&self, category: ReminderCategory) -> Result<Vec<ReminderCandidate>> {
            Ok(match category {
                ReminderCategory::Flight => vec![
                    customer("BK-10", ReminderCategory::Flight, "Jane"),
                    customer("BK-11", ReminderCategory::Flight, "Omar"),
                ],
                ReminderCategory::Hotel => {
                    vec![customer("BK-10", ReminderCategory::Hotel, "Jane")]
                }
            })
        }
    }

    let t0 = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
    let mut ledger = ReminderLedger::open(
        Arc::new(agency_core::store::MemoryStore::new()),
        Arc::new(ManualClock::starting_at(t0)),
        30,
    )
    .expect("open ledger");

    let candidates = collect_candidates(&FixtureFeed).expect("collect candidates");
    assert_eq!(candidates.len(), 3);

    ledger
        .promote(&candidates[0], true)
        .expect("promote first flight");
    let pending = ledger.pending(&candidates);
    assert_eq!(pending.len(), 2);
    assert!(pending
        .iter()
        .all(|candidate| candidate.key() != candidates[0].key()));
}
