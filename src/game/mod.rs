//! Game data module
//!
//! The gatherable item catalog and the gathering work list.

pub mod catalog;
pub mod worklist;

pub use catalog::{CatalogEntry, Job};
pub use worklist::{GatherItem, ItemProgress, SharedWorkList, WorkList};
