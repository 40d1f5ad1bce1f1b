#![allow(dead_code)]

use clayplot::{GeoDataManager, GeographyConfig, GeographyRegistry, HttpClient};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const ADMIN1_URL: &str = "https://fixtures.test/ne/admin1.geojson";
pub const LAKES_URL: &str = "https://fixtures.test/ne/lakes.geojson";
pub const COUNTRIES_URL: &str = "https://fixtures.test/ne/countries.geojson";

/// Serves fixed bodies by URL and counts requests.
pub struct FixtureClient {
    bodies: HashMap<String, Vec<u8>>,
    calls: Arc<AtomicUsize>,
}

impl FixtureClient {
    pub fn natural_earth() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let bodies = [
            (ADMIN1_URL, admin1_fixture()),
            (LAKES_URL, lakes_fixture()),
            (COUNTRIES_URL, countries_fixture()),
        ]
        .into_iter()
        .map(|(url, doc)| (url.to_string(), doc.to_string().into_bytes()))
        .collect();
        (
            Self {
                bodies,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    /// A client for which every request fails.
    pub fn offline() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                bodies: HashMap::new(),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl HttpClient for FixtureClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| format!("HTTP 404 from {}", url))
    }
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

pub fn manager(cache_dir: &Path, client: FixtureClient) -> GeoDataManager {
    GeoDataManager::new(cache_dir, Box::new(client)).unwrap()
}

/// The built-in `usa_states` configuration pointed at the fixture URLs.
pub fn usa_config() -> GeographyConfig {
    let mut config = GeographyRegistry::new(None).load("usa_states").unwrap();
    config.data_hints.level1_source_url = Some(ADMIN1_URL.to_string());
    config.data_hints.lakes_source_url = Some(LAKES_URL.to_string());
    config.data_hints.countries_source_url = Some(COUNTRIES_URL.to_string());
    config
}

/// A MultiPolygon feature made of axis-aligned boxes `[min_lon, min_lat, max_lon, max_lat]`.
fn feature(properties: Value, boxes: &[[f64; 4]]) -> Value {
    let polygons: Vec<Value> = boxes
        .iter()
        .map(|[x0, y0, x1, y1]| json!([[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]]))
        .collect();
    json!({
        "type": "Feature",
        "properties": properties,
        "geometry": { "type": "MultiPolygon", "coordinates": polygons }
    })
}

fn collection(features: Vec<Value>) -> Value {
    json!({ "type": "FeatureCollection", "features": features })
}

fn state(name: &str, postal: &str, country: &str, boxes: &[[f64; 4]]) -> Value {
    feature(
        json!({ "name": name, "postal": postal, "iso_a2": country, "admin": "fixture" }),
        boxes,
    )
}

/// Postal codes of the US states in the admin-1 fixture.
pub const US_CODES: &[&str] = &["CA", "NV", "TX", "FL", "RI", "AK", "HI"];

/// Names of the US states in the admin-1 fixture, in `US_CODES` order.
pub const US_NAMES: &[&str] = &[
    "California",
    "Nevada",
    "Texas",
    "Florida",
    "Rhode Island",
    "Alaska",
    "Hawaii",
];

pub fn admin1_fixture() -> Value {
    collection(vec![
        state("California", "CA", "US", &[[-124.0, 32.5, -114.5, 42.0]]),
        state("Nevada", "NV", "US", &[[-120.0, 35.0, -114.0, 42.0]]),
        state("Texas", "TX", "US", &[[-106.5, 26.0, -93.5, 36.5]]),
        state("Florida", "FL", "US", &[[-87.6, 25.0, -80.0, 31.0]]),
        state("Rhode Island", "RI", "US", &[[-71.9, 41.1, -71.1, 42.0]]),
        state("Alaska", "AK", "US", &[[-168.0, 54.0, -141.0, 71.0]]),
        state(
            "Hawaii",
            "HI",
            "US",
            &[[-160.3, 21.8, -159.3, 22.3], [-156.0, 18.9, -154.8, 20.3]],
        ),
        state("British Columbia", "BC", "CA", &[[-124.0, 49.0, -114.0, 55.0]]),
        state("Sonora", "SO", "MX", &[[-115.0, 26.0, -108.0, 32.5]]),
        state("Bavaria", "BY", "DE", &[[9.0, 47.0, 13.8, 50.5]]),
    ])
}

pub fn lakes_fixture() -> Value {
    collection(vec![
        feature(json!({ "name": "Lake Michigan" }), &[[-88.0, 41.6, -85.0, 46.0]]),
        feature(json!({ "name": "Lake Titicaca" }), &[[-70.0, -16.5, -68.6, -15.2]]),
    ])
}

pub fn countries_fixture() -> Value {
    collection(vec![
        feature(json!({ "ADMIN": "Canada" }), &[[-141.0, 42.0, -52.0, 70.0]]),
        feature(json!({ "ADMIN": "Mexico" }), &[[-117.0, 14.5, -86.7, 32.7]]),
        feature(json!({ "ADMIN": "France" }), &[[-5.0, 42.0, 8.0, 51.0]]),
    ])
}
