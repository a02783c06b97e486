//! Recent-activity telemetry.
//!
//! Best-effort counters for monitoring only; nothing here is durable.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::ActivityConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activity {
    Uploaded { file_id: i64, user_id: i64, size: u64 },
    Processed { file_id: i64, chapter_id: i64, pages: u32 },
    Failed { file_id: i64, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub activity: Activity,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivitySnapshot {
    pub uploads: Vec<ActivityEntry>,
    pub processed: Vec<ActivityEntry>,
    pub failures: Vec<ActivityEntry>,
}

pub trait ActivityLog: Send + Sync {
    fn record(&self, activity: Activity);
    fn snapshot(&self) -> ActivitySnapshot;

    /// Progress tick after page `stored` of `file_id` is saved. Not retained.
    fn page_stored(&self, _file_id: i64, _stored: u32) {}
}

/// Three bounded lists behind one lock, each capped by count and age.
pub struct RecentActivity {
    max_entries: usize,
    max_age: TimeDelta,
    lists: Mutex<Lists>,
}

#[derive(Default)]
struct Lists {
    uploads: VecDeque<ActivityEntry>,
    processed: VecDeque<ActivityEntry>,
    failures: VecDeque<ActivityEntry>,
}

impl RecentActivity {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            max_entries,
            max_age: TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX),
            lists: Mutex::new(Lists::default()),
        }
    }

    pub fn from_config(config: &ActivityConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.max_age_secs))
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn record_at(&self, activity: Activity, at: DateTime<Utc>) {
        let cutoff = self.cutoff(at);
        let mut lists = self.lists.lock();
        let list = match activity {
            Activity::Uploaded { .. } => &mut lists.uploads,
            Activity::Processed { .. } => &mut lists.processed,
            Activity::Failed { .. } => &mut lists.failures,
        };
        list.push_back(ActivityEntry { at, activity });
        while list.len() > self.max_entries {
            list.pop_front();
        }
        while list.front().is_some_and(|e| e.at < cutoff) {
            list.pop_front();
        }
    }

    fn snapshot_at(&self, now: DateTime<Utc>) -> ActivitySnapshot {
        let cutoff = self.cutoff(now);
        let lists = self.lists.lock();
        let fresh = |list: &VecDeque<ActivityEntry>| {
            list.iter().filter(|e| e.at >= cutoff).cloned().collect()
        };
        ActivitySnapshot {
            uploads: fresh(&lists.uploads),
            processed: fresh(&lists.processed),
            failures: fresh(&lists.failures),
        }
    }
}

impl ActivityLog for RecentActivity {
    fn record(&self, activity: Activity) {
        self.record_at(activity, Utc::now());
    }

    fn snapshot(&self) -> ActivitySnapshot {
        self.snapshot_at(Utc::now())
    }
}
