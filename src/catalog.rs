//! The browsable list of remote maps.
//!
//! Maps from every source share one backing list, viewed through a source filter, a
//! name search and deduplication, in that order. Stock maps are dropped on insert.

use std::sync::Arc;

use tracing::debug;

use crate::{
    filtered_list::{FilterError, FilteredList},
    maps::{
        Map, MapSource,
        filter::{DuplicateFilter, NameFilter, SourceFilter, StockFilter},
        sort_maps,
    },
};

const SOURCE_FILTER: usize = 0;
const NAME_FILTER: usize = 1;
const DUPLICATE_FILTER: usize = 2;

pub struct MapCatalog {
    maps: FilteredList<Map>,
    stock: StockFilter,
}

impl MapCatalog {
    /// Create an empty catalog showing maps from all of `sources`
    pub fn new(sources: &[Arc<MapSource>], stock: StockFilter) -> Self {
        let maps = FilteredList::new();
        maps.set_filters(vec![
            Box::new(SourceFilter::with_sources(
                sources.iter().map(|source| source.name.clone()),
            )),
            Box::new(NameFilter::default()),
            Box::new(DuplicateFilter::new()),
        ]);
        Self { maps, stock }
    }

    /// Add maps, skipping stock ones, and keep the backing list sorted.
    /// Returns how many were added.
    pub fn add_maps(&self, maps: impl IntoIterator<Item = Map>) -> usize {
        let added: Vec<Map> = maps
            .into_iter()
            .filter(|map| !self.stock.is_stock(map.name()))
            .collect();
        let count = added.len();

        self.maps.mutate_backing(|backing| {
            backing.extend(added);
            sort_maps(backing);
        });
        debug!(added = count, total = self.maps.backing_len(), "Added maps to catalog");
        count
    }

    pub fn set_search(&self, query: &str) -> Result<(), FilterError> {
        self.maps
            .update_filter::<NameFilter, _>(NAME_FILTER, |filter| filter.set_query(query))
    }

    pub fn set_source_enabled(&self, source: &str, enabled: bool) -> Result<(), FilterError> {
        self.maps
            .update_filter::<SourceFilter, _>(SOURCE_FILTER, |filter| {
                filter.set_source_enabled(source, enabled)
            })
    }

    /// Show every source's copy of a map instead of only the preferred one
    pub fn set_show_duplicates(&self, show: bool) -> Result<(), FilterError> {
        self.maps.set_enabled(DUPLICATE_FILTER, !show)
    }

    /// Visible maps, in display order
    pub fn visible(&self) -> Vec<Map> {
        self.maps.snapshot()
    }

    pub fn len(&self) -> usize {
        self.maps.size()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Map, FilterError> {
        self.maps.element_at(index)
    }

    /// The visible map called `name`, ignoring case
    pub fn find(&self, name: &str) -> Option<Map> {
        self.maps
            .find(|map| map.name().eq_ignore_ascii_case(name))
    }

    /// Number of maps known, visible or not
    pub fn total(&self) -> usize {
        self.maps.backing_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::testing::{map, source};

    fn catalog() -> (MapCatalog, Arc<MapSource>, Arc<MapSource>) {
        let a = source("A", 0);
        let b = source("B", 1);
        let catalog = MapCatalog::new(
            &[a.clone(), b.clone()],
            StockFilter::new(["ctf_2fort"]),
        );
        (catalog, a, b)
    }

    fn visible(catalog: &MapCatalog) -> Vec<String> {
        catalog
            .visible()
            .iter()
            .map(|map| format!("{}@{}", map.name(), map.source().name))
            .collect()
    }

    #[test]
    fn test_add_maps_sorts_and_skips_stock() {
        let (catalog, a, b) = catalog();

        assert_eq!(catalog.add_maps([map("pl_upward", &b), map("CTF_2fort", &a)]), 1);
        assert_eq!(catalog.add_maps([map("dm_x", &b), map("dm_x", &a)]), 2);

        assert_eq!(visible(&catalog), vec!["dm_x@A", "pl_upward@B"]);
        assert_eq!(catalog.total(), 3);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_source_toggle_and_search() {
        let (catalog, a, b) = catalog();
        catalog.add_maps([
            map("dm_x", &a),
            map("dm_x", &b),
            map("dm_y", &b),
            map("koth_z", &a),
        ]);

        catalog.set_source_enabled("A", false).unwrap();
        assert_eq!(visible(&catalog), vec!["dm_x@B", "dm_y@B"]);

        catalog.set_source_enabled("A", true).unwrap();
        catalog.set_search("DM").unwrap();
        assert_eq!(visible(&catalog), vec!["dm_x@A", "dm_y@B"]);

        catalog.set_show_duplicates(true).unwrap();
        assert_eq!(visible(&catalog), vec!["dm_x@A", "dm_x@B", "dm_y@B"]);
    }

    #[test]
    fn test_find_and_get() {
        let (catalog, a, b) = catalog();
        catalog.add_maps([map("dm_x", &b), map("dm_x", &a)]);

        let found = catalog.find("DM_X").unwrap();
        assert_eq!(found.source(), &a);
        assert_eq!(catalog.get(0).unwrap(), found);
        assert!(catalog.find("missing").is_none());
        assert!(catalog.get(1).is_err());
    }
}
