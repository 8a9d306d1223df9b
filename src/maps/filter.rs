//! Filters over map lists. See [`crate::filtered_list`].

use std::collections::HashSet;

use super::Map;
use crate::filtered_list::ListFilter;

/// Only shows maps from the enabled sources
#[derive(Debug, Default)]
pub struct SourceFilter {
    enabled: HashSet<String>,
}

impl SourceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources<S: Into<String>>(sources: impl IntoIterator<Item = S>) -> Self {
        Self {
            enabled: sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn set_source_enabled(&mut self, source: &str, enabled: bool) {
        if enabled {
            self.enabled.insert(source.to_string());
        } else {
            self.enabled.remove(source);
        }
    }

    pub fn is_source_enabled(&self, source: &str) -> bool {
        self.enabled.contains(source)
    }
}

impl ListFilter<Map> for SourceFilter {
    fn accept(&mut self, map: &Map) -> bool {
        self.enabled.contains(&map.source().name)
    }
}

/// Case-insensitive substring match on the map name. An empty query accepts everything.
#[derive(Debug, Default)]
pub struct NameFilter {
    query: String,
}

impl NameFilter {
    pub fn new(query: &str) -> Self {
        let mut filter = Self::default();
        filter.set_query(query);
        filter
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.trim().to_lowercase();
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl ListFilter<Map> for NameFilter {
    fn accept(&mut self, map: &Map) -> bool {
        self.query.is_empty() || map.name().to_lowercase().contains(&self.query)
    }
}

/// Hides every map whose name, ignoring case, was already accepted earlier in the pass.
///
/// Put it after the source and name filters: it only sees the maps they let through,
/// so the first visible copy of a map wins.
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    seen: HashSet<String>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListFilter<Map> for DuplicateFilter {
    fn reset(&mut self) {
        self.seen.clear();
    }

    fn accept(&mut self, map: &Map) -> bool {
        self.seen.insert(map.name().to_lowercase())
    }
}

/// Rejects the maps that ship with the game
#[derive(Debug, Default, Clone)]
pub struct StockFilter {
    stock: HashSet<String>,
}

impl StockFilter {
    pub fn new<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            stock: names
                .into_iter()
                .map(|name| name.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn is_stock(&self, name: &str) -> bool {
        self.stock.contains(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.stock.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stock.is_empty()
    }
}

impl ListFilter<Map> for StockFilter {
    fn accept(&mut self, map: &Map) -> bool {
        !self.is_stock(map.name())
    }
}
