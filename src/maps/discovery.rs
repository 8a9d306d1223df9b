//! Map discovery from fastdownload mirrors.
//!
//! A mirror's maps folder is served as a plain HTML directory index, so the listing is
//! simply a list of `<a>` tags. Every `href` that points at a `.bsp` or `.bsp.bz2` file
//! becomes a [`Map`], with the link resolved against the mirror's base url.

use std::{borrow::Cow, sync::Arc};

use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{Map, MapSource, parse_map_file, sort_maps};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("Invalid base url {url}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to parse HTML selector: {0}")]
    Selector(String),
}

/// Fetches and parses mirror listings
#[derive(Debug, Clone)]
pub struct ListingClient {
    client: Client,
}

impl ListingClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Parse a directory listing into the maps it links to, in document order.
    pub fn parse_listing(source: &Arc<MapSource>, html: &str) -> Result<Vec<Map>, DiscoveryError> {
        let base = Url::parse(&source.base_url).map_err(|source_error| {
            DiscoveryError::InvalidBaseUrl {
                url: source.base_url.clone(),
                source: source_error,
            }
        })?;

        let document = Html::parse_document(html);
        let a_selector =
            Selector::parse("a[href]").map_err(|e| DiscoveryError::Selector(e.to_string()))?;

        let maps = document
            .select(&a_selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| {
                // Strip any query or fragment, then look at the last path segment
                let path = href.split(['?', '#']).next().unwrap_or_default();
                let file_name = path.rsplit('/').next().unwrap_or_default();
                let decoded = urlencoding::decode(file_name).unwrap_or(Cow::Borrowed(file_name));
                let (name, compressed) = parse_map_file(&decoded)?;

                match base.join(href) {
                    Ok(remote) => Some(Map::new(
                        source.clone(),
                        name,
                        remote.to_string(),
                        compressed,
                    )),
                    Err(e) => {
                        debug!(href, error = %e, "Skipping unresolvable link");
                        None
                    }
                }
            })
            .collect();
        Ok(maps)
    }

    /// Download and parse one source's listing
    #[instrument(level = "debug", skip(self, source), fields(source = %source))]
    pub async fn fetch(&self, source: &Arc<MapSource>) -> Result<Vec<Map>, DiscoveryError> {
        let response = self.client.get(&source.base_url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status {
                url: source.base_url.clone(),
                status: response.status(),
            });
        }

        let body = response.text().await?;
        let maps = Self::parse_listing(source, &body)?;
        debug!(maps = maps.len(), "Parsed listing");
        Ok(maps)
    }

    /// Load every source's listing, in order, and return all maps sorted.
    ///
    /// A source that fails to load is logged and skipped.
    pub async fn load_all(&self, sources: &[Arc<MapSource>]) -> Vec<Map> {
        let mut maps = Vec::new();
        for source in sources {
            match self.fetch(source).await {
                Ok(found) => {
                    info!(source = %source, maps = found.len(), "Loaded map listing");
                    maps.extend(found);
                }
                Err(e) => warn!(source = %source, error = %e, "Failed to load map listing"),
            }
        }
        sort_maps(&mut maps);
        maps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::testing::source;

    const LISTING: &str = r#"<!DOCTYPE html>
<html>
<head><title>Index of /tf/maps</title></head>
<body>
<h1>Index of /tf/maps</h1>
<pre>
<a href="?C=N;O=D">Name</a>
<a href="/tf/">Parent Directory</a>
<a href="cp_orange_x3.bsp.bz2">cp_orange_x3.bsp.bz2</a>  2019-01-01 10:00  4.1M
<a href="dm_lockdown.bsp">dm_lockdown.bsp</a>  2019-01-01 10:00  12M
<a href="koth_harvest_final.v2.bsp">koth_harvest_final.v2.bsp</a>
<a href="pl_hot%20dog.bsp.bz2">pl_hot dog.bsp.bz2</a>
<a href="readme.txt">readme.txt</a>
<a href="http://other.example/maps/trade_box.bsp">trade_box.bsp</a>
<a>no link</a>
</pre>
</body>
</html>"#;

    #[test]
    fn test_parse_listing() {
        let source = source("Mirror", 0);
        let maps = ListingClient::parse_listing(&source, LISTING).unwrap();

        let parsed: Vec<(&str, &str, bool)> = maps
            .iter()
            .map(|map| (map.name(), map.remote_path(), map.is_compressed()))
            .collect();
        assert_eq!(
            parsed,
            vec![
                (
                    "cp_orange_x3",
                    "http://mirror.example/maps/cp_orange_x3.bsp.bz2",
                    true
                ),
                (
                    "dm_lockdown",
                    "http://mirror.example/maps/dm_lockdown.bsp",
                    false
                ),
                (
                    "koth_harvest_final",
                    "http://mirror.example/maps/koth_harvest_final.v2.bsp",
                    false
                ),
                (
                    "pl_hot dog",
                    "http://mirror.example/maps/pl_hot%20dog.bsp.bz2",
                    true
                ),
                ("trade_box", "http://other.example/maps/trade_box.bsp", false),
            ]
        );
        assert!(maps.iter().all(|map| map.source() == &source));
    }

    #[test]
    fn test_parse_listing_without_maps() {
        let source = source("Mirror", 0);
        let maps =
            ListingClient::parse_listing(&source, "<html><body>nothing here</body></html>")
                .unwrap();
        assert!(maps.is_empty());
    }

    #[test]
    fn test_invalid_base_url() {
        let source = Arc::new(MapSource::new("Broken", "not a url", 0));
        let result = ListingClient::parse_listing(&source, LISTING);
        assert!(matches!(
            result,
            Err(DiscoveryError::InvalidBaseUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_all_skips_unreachable_sources() {
        let unreachable = Arc::new(MapSource::new("Down", "http://127.0.0.1:1/maps/", 0));
        let client = ListingClient::new(Client::new());

        let maps = client.load_all(&[unreachable]).await;
        assert!(maps.is_empty());
    }
}
