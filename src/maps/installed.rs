//! The local maps directory: what is installed, deleting, and watching for changes.

use std::{
    io,
    path::{Path, PathBuf},
};

use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{MAP_EXTENSION, parse_map_file};

#[derive(Error, Debug)]
pub enum InstalledError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// A change to the set of installed maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapEvent {
    Added(String),
    Removed(String),
}

/// The directory downloaded maps are installed into
#[derive(Debug, Clone)]
pub struct InstalledMaps {
    dir: PathBuf,
}

impl InstalledMaps {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the map called `name` is, or would be, installed
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{MAP_EXTENSION}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Delete an installed map. Returns `false` if it was not installed.
    pub async fn delete(&self, name: &str) -> Result<bool, InstalledError> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(map = name, path = ?path, "Deleted map");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of the installed maps, sorted
    pub fn scan(&self) -> Vec<String> {
        scan_names(&self.dir, false)
    }

    /// Names of the maps shipped with the game in `stock_dir`, compressed or not
    pub fn stock_names(stock_dir: &Path) -> Vec<String> {
        scan_names(stock_dir, true)
    }

    /// Watch the directory for maps being added or removed.
    ///
    /// Events stop when the returned [`MapWatcher`] is dropped.
    pub fn watch(&self) -> Result<MapWatcher, InstalledError> {
        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for map_event in translate_event(&event) {
                        // The receiver is gone once the MapWatcher is dropped
                        let _ = tx.send(map_event);
                    }
                }
                Err(e) => warn!(error = %e, "Maps directory watch error"),
            }
        })?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        debug!(dir = ?self.dir, "Watching maps directory");

        Ok(MapWatcher {
            _watcher: watcher,
            events,
        })
    }
}

/// Receives [`MapEvent`]s for a watched maps directory
pub struct MapWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<MapEvent>,
}

impl MapWatcher {
    pub async fn next(&mut self) -> Option<MapEvent> {
        self.events.recv().await
    }
}

fn installed_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    match parse_map_file(file_name)? {
        (name, false) => Some(name),
        (_, true) => None,
    }
}

fn scan_names(dir: &Path, include_compressed: bool) -> Vec<String> {
    let mut names: Vec<String> = jwalk::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_str()?.to_string();
            let (name, compressed) = parse_map_file(&file_name)?;
            (include_compressed || !compressed).then_some(name)
        })
        .collect();
    names.sort_by_key(|name| name.to_lowercase());
    names.dedup();
    names
}

fn translate_event(event: &Event) -> Vec<MapEvent> {
    let names = || event.paths.iter().filter_map(|path| installed_name(path));

    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            names().map(MapEvent::Added).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            names().map(MapEvent::Removed).collect()
        }
        // paths are [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut events = Vec::new();
            if let Some(from) = event.paths.first().and_then(|path| installed_name(path)) {
                events.push(MapEvent::Removed(from));
            }
            if let Some(to) = event.paths.get(1).and_then(|path| installed_name(path)) {
                events.push(MapEvent::Added(to));
            }
            events
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use notify::event::{CreateKind, RemoveKind};

    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let installed = InstalledMaps::new(dir.path());
        tokio::fs::write(dir.path().join("dm_lockdown.bsp"), b"map")
            .await
            .unwrap();

        assert!(installed.exists("dm_lockdown"));
        assert!(!installed.exists("dm_runoff"));

        assert!(installed.delete("dm_lockdown").await.unwrap());
        assert!(!installed.exists("dm_lockdown"));
        assert!(!installed.delete("dm_lockdown").await.unwrap());
    }

    #[test]
    fn test_scan() {
        let dir = tempfile::tempdir().unwrap();
        for file in [
            "pl_upward.bsp",
            "cp_orange.bsp.bz2",
            "dm_lockdown.bsp",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(file), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.bsp")).unwrap();

        let installed = InstalledMaps::new(dir.path());
        assert_eq!(installed.scan(), vec!["dm_lockdown", "pl_upward"]);
        assert_eq!(
            InstalledMaps::stock_names(dir.path()),
            vec!["cp_orange", "dm_lockdown", "pl_upward"]
        );
    }

    #[test]
    fn test_scan_missing_directory() {
        let installed = InstalledMaps::new("/nonexistent/mapdl/maps");
        assert!(installed.scan().is_empty());
    }

    #[test]
    fn test_translate_event() {
        assert_eq!(
            translate_event(&event(
                EventKind::Create(CreateKind::File),
                &["/maps/dm_x.bsp", "/maps/readme.txt"]
            )),
            vec![MapEvent::Added("dm_x".to_string())]
        );
        assert_eq!(
            translate_event(&event(
                EventKind::Remove(RemoveKind::File),
                &["/maps/dm_x.bsp"]
            )),
            vec![MapEvent::Removed("dm_x".to_string())]
        );
        assert_eq!(
            translate_event(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/maps/dm_x.bsp", "/maps/dm_y.bsp"]
            )),
            vec![
                MapEvent::Removed("dm_x".to_string()),
                MapEvent::Added("dm_y".to_string())
            ]
        );
        // a finished temp download being moved in counts as an addition
        assert_eq!(
            translate_event(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/tmp/dm_x.a1b2.bsp.tmp", "/maps/dm_x.bsp"]
            )),
            vec![MapEvent::Added("dm_x".to_string())]
        );
        assert!(
            translate_event(&event(
                EventKind::Create(CreateKind::File),
                &["/maps/dm_x.bsp.bz2"]
            ))
            .is_empty()
        );
    }
}
