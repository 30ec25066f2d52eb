//! Gathering work list
//!
//! The ordered list of items the gathering controller works through, with
//! per-item progress. The host replaces the list and reads progress while the
//! controller runs, so it is shared as [`SharedWorkList`].

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::Serialize;

use super::catalog::{self, Job};

pub type SharedWorkList = Arc<RwLock<WorkList>>;

/// One item to gather and how far along it is
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatherItem {
    pub name: String,
    pub job: Job,
    pub level: u32,
    pub note_index: u32,
    pub gather_index: u32,
    pub need: u32,
    pub complete: u32,
    /// Collection rate since the first success
    pub num_per_min: f64,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
}

impl GatherItem {
    pub fn new(name: impl Into<String>, job: Job, level: u32, note_index: u32, need: u32) -> Self {
        Self {
            name: name.into(),
            job,
            level,
            note_index,
            gather_index: 1,
            need,
            complete: 0,
            num_per_min: 0.0,
            start_time: None,
            end_time: None,
        }
    }

    /// Build from the catalog entry of `name`
    pub fn from_catalog(name: &str, need: u32) -> Option<Self> {
        let entry = catalog::lookup(name)?;
        Some(Self {
            gather_index: entry.gather_index,
            ..Self::new(name, entry.job, entry.level, entry.note_index, need)
        })
    }

    pub fn with_complete(mut self, complete: u32) -> Self {
        self.complete = complete.min(self.need);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.complete >= self.need
    }

    pub fn remaining(&self) -> u32 {
        self.need.saturating_sub(self.complete)
    }
}

/// Progress view reported to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemProgress {
    pub need: u32,
    pub complete: u32,
    pub num_per_min: f64,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
}

/// Ordered gathering targets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkList {
    items: Vec<GatherItem>,
}

impl WorkList {
    pub fn new(items: Vec<GatherItem>) -> Self {
        let mut list = Self::default();
        list.set(items);
        list
    }

    /// Build from `(name, need)` pairs, skipping names the catalog lacks
    pub fn from_needs<'a>(needs: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        let items = needs
            .into_iter()
            .filter_map(|(name, need)| {
                let item = GatherItem::from_catalog(name, need);
                if item.is_none() {
                    log::warn!("{} is not in the gather catalog", name);
                }
                item
            })
            .collect();
        Self::new(items)
    }

    pub fn shared(self) -> SharedWorkList {
        Arc::new(RwLock::new(self))
    }

    /// Replace the whole list. Duplicate names keep their first occurrence
    /// and `complete` is capped at `need`.
    pub fn set(&mut self, items: Vec<GatherItem>) {
        self.items.clear();
        for mut item in items {
            if self.items.iter().any(|i| i.name == item.name) {
                log::warn!("Duplicate work list entry {} ignored", item.name);
                continue;
            }
            item.complete = item.complete.min(item.need);
            self.items.push(item);
        }
    }

    pub fn items(&self) -> &[GatherItem] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&GatherItem> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Whether `name` is on the list and still short of its need
    pub fn is_pending(&self, name: &str) -> bool {
        self.get(name).is_some_and(|i| !i.is_complete())
    }

    /// First item, in list order, still short of its need
    pub fn next_target(&self) -> Option<&GatherItem> {
        self.items.iter().find(|i| !i.is_complete())
    }

    pub fn all_complete(&self) -> bool {
        self.next_target().is_none()
    }

    /// Count one successful collect of `name` at `now`.
    ///
    /// Ignored once the item has reached its need. Returns the updated item.
    pub fn record_success(&mut self, name: &str, now: SystemTime) -> Option<&GatherItem> {
        let item = self.items.iter_mut().find(|i| i.name == name)?;
        if item.is_complete() {
            return Some(item);
        }
        item.complete += 1;
        let start = *item.start_time.get_or_insert(now);
        if item.is_complete() && item.end_time.is_none() {
            item.end_time = Some(now);
        }
        let minutes = now
            .duration_since(start)
            .map(|d| d.as_secs_f64() / 60.0)
            .unwrap_or(0.0);
        if minutes > 0.0 {
            item.num_per_min = (item.complete as f64 / minutes * 100.0).round() / 100.0;
        }
        Some(item)
    }

    /// Per-item progress keyed by name
    pub fn progress(&self) -> BTreeMap<String, ItemProgress> {
        self.items
            .iter()
            .map(|i| {
                (
                    i.name.clone(),
                    ItemProgress {
                        need: i.need,
                        complete: i.complete,
                        num_per_min: i.num_per_min,
                        start_time: i.start_time,
                        end_time: i.end_time,
                    },
                )
            })
            .collect()
    }
}
