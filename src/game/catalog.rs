//! Gatherable item catalog
//!
//! Static data telling the gathering controller which job collects an item
//! and where it sits in the in-game gathering log.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Gathering job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Job {
    Miner,
    Botanist,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Miner => write!(f, "Miner"),
            Job::Botanist => write!(f, "Botanist"),
        }
    }
}

/// Where an item lives in the gathering log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub job: Job,
    /// Level band the log page is filed under
    pub level: u32,
    /// 1-based position in the log page
    pub note_index: u32,
    /// 1-based slot in the node's gathering window
    pub gather_index: u32,
}

static CATALOG: Lazy<BTreeMap<String, CatalogEntry>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../assets/gather_catalog.json")).unwrap_or_else(|e| {
        log::error!("Gather catalog is corrupt: {}", e);
        BTreeMap::new()
    })
});

/// Look an item up by its exact name
pub fn lookup(name: &str) -> Option<&'static CatalogEntry> {
    CATALOG.get(name)
}

/// Look an item up ignoring case, spacing and punctuation
pub fn lookup_loose(text: &str) -> Option<(&'static str, &'static CatalogEntry)> {
    let wanted = crate::vision::normalise_text(text);
    if wanted.is_empty() {
        return None;
    }
    CATALOG
        .iter()
        .find(|(name, _)| crate::vision::normalise_text(name) == wanted)
        .map(|(name, entry)| (name.as_str(), entry))
}

/// Every catalog item name, sorted
pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.keys().map(String::as_str)
}

/// Items for one job, ordered by level
pub fn by_job(job: Job) -> Vec<(&'static str, &'static CatalogEntry)> {
    let mut items: Vec<_> = CATALOG
        .iter()
        .filter(|(_, e)| e.job == job)
        .map(|(n, e)| (n.as_str(), e))
        .collect();
    items.sort_by_key(|(n, e)| (e.level, e.note_index, *n));
    items
}

pub fn len() -> usize {
    CATALOG.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_parses() {
        assert!(len() > 50);
        let copper = lookup("Copper Ore").unwrap();
        assert_eq!(copper.job, Job::Miner);
        assert_eq!(copper.level, 1);
        assert_eq!(copper.note_index, 1);

        let latex = lookup("Latex").unwrap();
        assert_eq!(latex.job, Job::Botanist);
    }

    #[test]
    fn test_loose_lookup() {
        let (name, entry) = lookup_loose("copper ore.").unwrap();
        assert_eq!(name, "Copper Ore");
        assert_eq!(entry.gather_index, 1);
        assert!(lookup_loose("").is_none());
        assert!(lookup_loose("Unobtainium").is_none());
    }

    #[test]
    fn test_by_job_sorted() {
        let miner = by_job(Job::Miner);
        assert!(!miner.is_empty());
        assert!(miner.windows(2).all(|w| w[0].1.level <= w[1].1.level));
        assert!(miner.iter().all(|(_, e)| e.job == Job::Miner));
        assert!(names().count() == len());
    }
}
