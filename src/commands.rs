//! Command handlers for the CLI

use std::{collections::HashSet, time::Instant};

use color_eyre::{Result, eyre::eyre};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    catalog::MapCatalog,
    config::Config,
    download::{DownloadQueue, Downloader, JobState, QueueSettings},
    maps::{
        Map,
        discovery::ListingClient,
        filter::StockFilter,
        installed::{InstalledMaps, MapEvent},
    },
    status::{StatusLine, TerminalProgress},
    util::format_elapsed,
};

#[derive(Serialize)]
struct ListEntry<'a> {
    name: &'a str,
    source: &'a str,
    url: &'a str,
    compressed: bool,
    installed: bool,
}

/// Fetch every mirror's listing into a catalog
async fn load_catalog(config: &Config, client: reqwest::Client) -> Result<MapCatalog> {
    let sources = config.mirrors.sources();
    let stock_dir = config.paths.stock_dir();
    let stock = StockFilter::new(InstalledMaps::stock_names(&stock_dir));
    info!(stock = stock.len(), dir = ?stock_dir, "Loaded stock map names");

    let catalog = MapCatalog::new(&sources, stock);
    let maps = ListingClient::new(client).load_all(&sources).await;
    catalog.add_maps(maps);

    for name in config.mirrors.get_valid_disabled() {
        if !sources.iter().any(|source| source.name == name) {
            warn!(mirror = %name, "Disabled mirror is not configured");
        }
        catalog.set_source_enabled(&name, false)?;
    }
    Ok(catalog)
}

pub async fn list(
    config: &Config,
    search: Option<&str>,
    all_mirrors: bool,
    json: bool,
) -> Result<()> {
    let client = config.network.build_client()?;
    let catalog = load_catalog(config, client).await?;
    catalog.set_search(search.unwrap_or_default())?;
    catalog.set_show_duplicates(all_mirrors)?;

    let installed = InstalledMaps::new(config.paths.maps_dir());
    let maps = catalog.visible();

    if json {
        let entries: Vec<ListEntry> = maps
            .iter()
            .map(|map| ListEntry {
                name: map.name(),
                source: &map.source().name,
                url: map.remote_path(),
                compressed: map.is_compressed(),
                installed: installed.exists(map.name()),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for map in &maps {
            let marker = if installed.exists(map.name()) { "*" } else { " " };
            println!("{marker} {:<40} {}", map.name(), map.source());
        }
        info!(shown = maps.len(), total = catalog.total(), "Listed maps");
    }
    Ok(())
}

pub async fn download(config: &Config, search: Option<&str>, names: &[String]) -> Result<()> {
    if search.is_none() && names.is_empty() {
        return Err(eyre!("Nothing to download: pass map names or --search"));
    }

    let client = config.network.build_client()?;
    let catalog = load_catalog(config, client.clone()).await?;
    let installed = InstalledMaps::new(config.paths.maps_dir());

    let mut wanted: Vec<Map> = Vec::new();
    if let Some(search) = search {
        catalog.set_search(search)?;
        wanted.extend(catalog.visible());
        catalog.set_search("")?;
    }
    for name in names {
        match catalog.find(name) {
            Some(map) => wanted.push(map),
            None => warn!(map = %name, "Map not found on any enabled mirror"),
        }
    }
    let mut seen = HashSet::new();
    wanted.retain(|map| seen.insert(map.name().to_lowercase()));
    wanted.retain(|map| {
        let exists = installed.exists(map.name());
        if exists {
            info!(map = %map, "Already installed, skipping");
        }
        !exists
    });

    if wanted.is_empty() {
        info!("Nothing to download");
        return Ok(());
    }

    let builder = DownloadQueue::builder(
        Downloader::new(client),
        QueueSettings {
            maps_dir: config.paths.maps_dir(),
            temp_dir: config.paths.temp_dir(),
        },
    );
    let jobs = builder.subscribe();
    let queue = builder
        .download_listener(StatusLine::new("Downloading", jobs.clone()))
        .download_listener(TerminalProgress::new("Downloading", jobs.clone()))
        .decompress_listener(TerminalProgress::new("Decompressing", jobs.clone()))
        .decompress_listener(StatusLine::new("Decompressing", jobs))
        .build();

    let started = Instant::now();
    info!(maps = wanted.len(), "Downloading maps");
    for map in wanted {
        queue.submit(map);
    }

    tokio::select! {
        _ = queue.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            let cleared = queue.clear_queue();
            queue.cancel_active();
            warn!(cleared, "Interrupted, cancelling downloads");
            queue.wait_idle().await;
        }
    }

    let stats = queue.stats();
    info!(
        done = stats.done,
        failed = stats.failed,
        cancelled = stats.cancelled,
        "Finished in {}",
        format_elapsed(started.elapsed())
    );

    if let Some(failure) = queue.last_error() {
        error!(map = %failure.map, error = %failure.error, "Last failure");
    }
    if stats.failed > 0 {
        return Err(eyre!("{} of {} downloads failed", stats.failed, stats.total()));
    }
    if let Some(job) = queue.current_job() {
        if job.state == JobState::Cancelled {
            return Err(eyre!("Cancelled"));
        }
    }
    Ok(())
}

pub async fn delete(config: &Config, names: &[String]) -> Result<()> {
    let installed = InstalledMaps::new(config.paths.maps_dir());
    let mut missing = 0;
    for name in names {
        if !installed.delete(name).await? {
            warn!(map = %name, "Map is not installed");
            missing += 1;
        }
    }
    if missing > 0 {
        return Err(eyre!("{missing} of {} maps were not installed", names.len()));
    }
    Ok(())
}

pub fn installed(config: &Config) -> Result<()> {
    let installed = InstalledMaps::new(config.paths.maps_dir());
    let names = installed.scan();
    for name in &names {
        println!("{name}");
    }
    info!(count = names.len(), dir = ?installed.dir(), "Listed installed maps");
    Ok(())
}

pub async fn watch(config: &Config) -> Result<()> {
    let installed = InstalledMaps::new(config.paths.maps_dir());
    installed.ensure_dir().await?;
    let mut watcher = installed.watch()?;
    info!(dir = ?installed.dir(), "Watching for map changes, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = watcher.next() => match event {
                Some(MapEvent::Added(name)) => info!(map = %name, "Map was added"),
                Some(MapEvent::Removed(name)) => info!(map = %name, "Map was removed"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
