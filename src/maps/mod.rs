//! Maps and the fastdownload mirrors they come from

use std::{fmt, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub mod discovery;
pub mod filter;
pub mod installed;

/// Extension of an installed map file
pub const MAP_EXTENSION: &str = "bsp";

/// `name[.anything].bsp[.bz2]`, the name being everything before the first dot
static MAP_FILE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^([^./]+)(?:\.[^/]*)?\.bsp(\.bz2)?$").ok());

/// Represents a fastdownload http server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MapSource {
    pub name: String,
    /// Base url the map files are relative to
    pub base_url: String,
    /// Lower is better. Only used to order maps with the same name.
    pub priority: i32,
}

impl MapSource {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            priority,
        }
    }
}

impl fmt::Display for MapSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A map file offered by one source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Map {
    name: String,
    source: Arc<MapSource>,
    remote_path: String,
    compressed: bool,
}

impl Map {
    pub fn new(
        source: Arc<MapSource>,
        name: impl Into<String>,
        remote_path: impl Into<String>,
        compressed: bool,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            remote_path: remote_path.into(),
            compressed,
        }
    }

    /// The map name, without `.bsp` and `.bz2`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Arc<MapSource> {
        &self.source
    }

    /// Full url of the file on its source
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// File name the map is installed under
    pub fn file_name(&self) -> String {
        format!("{}.{MAP_EXTENSION}", self.name)
    }
}

impl fmt::Display for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Parse a map file name into the map name and whether it is bzip2 compressed.
///
/// Returns `None` for anything that is not a `.bsp` or `.bsp.bz2` file.
pub fn parse_map_file(file_name: &str) -> Option<(String, bool)> {
    let captures = MAP_FILE.as_ref()?.captures(file_name)?;
    let name = captures.get(1)?.as_str().to_string();
    Some((name, captures.get(2).is_some()))
}

/// Sort maps by name, case-insensitively, with the preferred source first among equal
/// names. The sort is stable, so equal entries keep their listing order.
pub fn sort_maps(maps: &mut [Map]) {
    maps.sort_by_cached_key(|map| (map.name.to_lowercase(), map.source.priority));
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::{Map, MapSource};

    pub fn source(name: &str, priority: i32) -> Arc<MapSource> {
        Arc::new(MapSource::new(
            name,
            format!("http://{}.example/maps/", name.to_lowercase()),
            priority,
        ))
    }

    pub fn map(name: &str, source: &Arc<MapSource>) -> Map {
        Map::new(
            source.clone(),
            name,
            format!("{}{name}.bsp", source.base_url),
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{map, source};
    use super::*;

    #[test]
    fn test_parse_map_file() {
        assert_eq!(
            parse_map_file("dm_lockdown.bsp"),
            Some(("dm_lockdown".to_string(), false))
        );
        assert_eq!(
            parse_map_file("cp_orange.bsp.bz2"),
            Some(("cp_orange".to_string(), true))
        );
        assert_eq!(
            parse_map_file("koth_harvest.v2.bsp"),
            Some(("koth_harvest".to_string(), false))
        );
        assert_eq!(
            parse_map_file("PL_Upward.BSP"),
            Some(("PL_Upward".to_string(), false))
        );
        assert_eq!(parse_map_file("readme.txt"), None);
        assert_eq!(parse_map_file("maps.bsp.zip"), None);
        assert_eq!(parse_map_file("sub/dir.bsp"), None);
        assert_eq!(parse_map_file(".bsp"), None);
    }

    #[test]
    fn test_sort_by_name_then_priority() {
        let a = source("A", 0);
        let b = source("B", 1);
        let mut maps = vec![
            map("dm_runoff", &a),
            map("dm_lockdown", &b),
            map("CP_orange", &b),
            map("dm_lockdown", &a),
        ];

        sort_maps(&mut maps);

        let order: Vec<(&str, &str)> = maps
            .iter()
            .map(|map| (map.name(), map.source().name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("CP_orange", "B"),
                ("dm_lockdown", "A"),
                ("dm_lockdown", "B"),
                ("dm_runoff", "A"),
            ]
        );
    }

    #[test]
    fn test_equality_is_structural() {
        let a = source("A", 0);
        let also_a = source("A", 0);
        let b = source("B", 0);

        assert_eq!(map("dm_runoff", &a), map("dm_runoff", &also_a));
        assert_ne!(map("dm_runoff", &a), map("dm_runoff", &b));
        assert_ne!(
            map("dm_runoff", &a),
            Map::new(a.clone(), "dm_runoff", a.base_url.clone() + "dm_runoff.bsp", true)
        );
        assert_eq!(map("dm_runoff", &a).file_name(), "dm_runoff.bsp");
    }
}
