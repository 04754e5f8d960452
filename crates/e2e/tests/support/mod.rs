//! In-process stand-in for the Playwright driver
//!
//! Speaks the driver's JSON-lines protocol over an in-memory duplex stream
//! and simulates the traffic color map: navigation, the panel selectors,
//! and traffic tile traffic once both panels show the review tiles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::Mutex;
use prost::Message;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

use trafficolor_common::tile::proto::{Feature, Layer, Tile, Value as TileValue};
use trafficolor_common::Zoom;
use trafficolor_e2e::observer::REVIEW_TRAFFIC_HOST;
use trafficolor_e2e::runner::RunnerConfig;
use trafficolor_e2e::session::{MapTarget, SettleTimings};
use trafficolor_e2e::DriverClient;

/// How the simulated map behaves
#[derive(Debug, Clone)]
pub struct FakeMap {
    /// Lowest zoom at which traffic tiles are requested
    pub traffic_min_zoom: u8,
    pub tiles_per_zoom: usize,
    /// Color code of tile `i` is `tile_colors[i % len]`
    pub tile_colors: Vec<i64>,
    /// Also serve a 404 and an HTML error page on the tile path
    pub broken_tiles: bool,
    pub failing_selector: Option<String>,
    /// Never answer navigation
    pub hang_on_goto: bool,
    pub body_delay: Duration,
}

impl Default for FakeMap {
    fn default() -> Self {
        Self {
            traffic_min_zoom: 2,
            tiles_per_zoom: 3,
            tile_colors: vec![1, 2, 3],
            broken_tiles: true,
            failing_selector: None,
            hang_on_goto: false,
            body_delay: Duration::from_millis(5),
        }
    }
}

/// A driver client wired to a running fake map
pub struct FakeDriver {
    pub client: DriverClient,
    log: Arc<Mutex<Vec<Value>>>,
    retained: Arc<Mutex<Vec<String>>>,
}

impl FakeDriver {
    pub fn start(map: FakeMap) -> Self {
        let (client_side, driver_side) = tokio::io::duplex(1 << 20);
        let (reader, writer) = tokio::io::split(client_side);
        let log = Arc::new(Mutex::new(Vec::new()));
        let retained = Arc::new(Mutex::new(Vec::new()));

        let page = PageState {
            retained: retained.clone(),
            ..Default::default()
        };
        tokio::spawn(serve(map, driver_side, log.clone(), page));

        Self {
            client: DriverClient::from_io(reader, writer),
            log,
            retained,
        }
    }

    /// URLs of every response kept for a later body fetch
    pub fn retained_responses(&self) -> Vec<String> {
        self.retained.lock().clone()
    }

    /// Every command received so far
    pub fn commands(&self) -> Vec<Value> {
        self.log.lock().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|c| c["op"].as_str().map(str::to_string))
            .collect()
    }

    pub fn unsubscribed(&self, subscription: u64) -> bool {
        self.commands()
            .iter()
            .any(|c| c["op"] == "unsubscribe" && c["subscription"] == subscription)
    }

    /// Poll until `pred` holds on the command log
    pub async fn wait_until<F>(&self, pred: F) -> bool
    where
        F: Fn(&FakeDriver) -> bool,
    {
        for _ in 0..100 {
            if pred(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

pub fn zoom(level: u8) -> Zoom {
    Zoom::new(level).unwrap()
}

/// Map target with waits short enough for tests
pub fn fast_target() -> MapTarget {
    MapTarget {
        base_url: "https://map.example.test/traffic-color/".to_string(),
        timings: SettleTimings {
            navigation_timeout: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(1),
            source_switch_settle: Duration::from_millis(0),
            request_settle: Duration::from_millis(20),
            color_settle: Duration::from_millis(20),
        },
        ..Default::default()
    }
}

pub fn fast_config(output_dir: &std::path::Path) -> RunnerConfig {
    RunnerConfig {
        target: fast_target(),
        test_timeout: Duration::from_secs(10),
        output_dir: output_dir.to_path_buf(),
        ..Default::default()
    }
}

/// An encoded traffic tile whose features all carry `color`
pub fn traffic_tile(color: i64) -> Vec<u8> {
    Tile {
        layers: vec![Layer {
            version: 2,
            name: "trafficolor".to_string(),
            features: (0..4u32)
                .map(|i| Feature {
                    id: Some(u64::from(i)),
                    tags: vec![0, 0],
                    r#type: Some(2),
                    geometry: vec![9, 50, 34, 18, 20, 20],
                })
                .collect(),
            keys: vec!["color".to_string()],
            values: vec![TileValue {
                int_value: Some(color),
                ..Default::default()
            }],
            extent: Some(4096),
        }],
    }
    .encode_to_vec()
}

#[derive(Default)]
struct PageState {
    /// Event kind and URL substrings per subscription
    subscriptions: HashMap<u64, (String, Vec<String>)>,
    next_subscription: u64,
    responses: HashMap<u64, Vec<u8>>,
    next_response: u64,
    zoom: u8,
    retained: Arc<Mutex<Vec<String>>>,
}

impl PageState {
    /// Subscriptions of `kind` whose substrings all occur in `url`
    fn listeners(&self, kind: &str, url: &str) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .subscriptions
            .iter()
            .filter(|(_, (k, parts))| {
                k.as_str() == kind && parts.iter().all(|p| url.contains(p.as_str()))
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn request(&self, out: &mpsc::UnboundedSender<Value>, url: &str) {
        for id in self.listeners("request", url) {
            let _ = out.send(json!({"event": "request", "subscription": id, "url": url}));
        }
    }

    fn response(
        &mut self,
        out: &mpsc::UnboundedSender<Value>,
        url: &str,
        status: u16,
        body: Vec<u8>,
    ) {
        let listeners = self.listeners("response", url);
        if listeners.is_empty() {
            return;
        }

        self.next_response += 1;
        let response = self.next_response;
        self.responses.insert(response, body);
        self.retained.lock().push(url.to_string());
        for id in listeners {
            let _ = out.send(json!({
                "event": "response",
                "subscription": id,
                "url": url,
                "status": status,
                "response": response,
            }));
        }
    }

    fn drop_subscription(&mut self, out: &mpsc::UnboundedSender<Value>, subscription: u64) {
        self.subscriptions.remove(&subscription);
        let _ = out.send(json!({"event": "unsubscribed", "subscription": subscription}));
    }

    /// Both panels now show review tiles: the map fetches its traffic layer
    fn load_traffic(&mut self, map: &FakeMap, out: &mpsc::UnboundedSender<Value>) {
        if self.zoom < map.traffic_min_zoom {
            return;
        }

        let zoom = self.zoom;
        let tile_url = move |i: usize| {
            format!("https://{}/trafficolor/{}/{}/180", REVIEW_TRAFFIC_HOST, zoom, 260 + i)
        };
        for i in 0..map.tiles_per_zoom {
            let url = tile_url(i);
            // Both panels request the same tile
            self.request(out, &url);
            self.request(out, &url);
        }
        for i in 0..map.tiles_per_zoom {
            let color = map.tile_colors[i % map.tile_colors.len()];
            self.response(out, &tile_url(i), 200, traffic_tile(color));
        }

        if map.broken_tiles {
            let missing = format!("https://{}/trafficolor/{}/0/0", REVIEW_TRAFFIC_HOST, zoom);
            self.request(out, &missing);
            self.response(out, &missing, 404, b"not found".to_vec());

            let html = format!("https://{}/trafficolor/{}/1/1", REVIEW_TRAFFIC_HOST, zoom);
            self.request(out, &html);
            self.response(out, &html, 200, b"<html><body>502 Bad Gateway</body></html>".to_vec());
        }
    }
}

async fn serve(
    map: FakeMap,
    stream: DuplexStream,
    log: Arc<Mutex<Vec<Value>>>,
    mut page: PageState,
) {
    let (read, mut write) = tokio::io::split(stream);
    let (out, mut out_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let line = format!("{}\n", message);
            if write.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let command: Value = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(_) => continue,
        };
        log.lock().push(command.clone());

        let id = command["id"].clone();
        let ok = |result: Value| json!({"id": id, "ok": true, "result": result});
        let fail = |error: String| json!({"id": id, "ok": false, "error": error});

        let reply = match command["op"].as_str().unwrap_or_default() {
            "new_page" => {
                let subscriptions: Vec<u64> = page.subscriptions.keys().copied().collect();
                for subscription in subscriptions {
                    page.drop_subscription(&out, subscription);
                }
                page.responses.clear();
                ok(json!({}))
            }
            "goto" => {
                if map.hang_on_goto {
                    continue;
                }
                let url = command["url"].as_str().unwrap_or_default();
                page.zoom = url
                    .split_once('#')
                    .and_then(|(_, hash)| hash.split('/').next())
                    .and_then(|z| z.parse().ok())
                    .unwrap_or(0);
                let style = "https://map.example.test/traffic-color/style.json";
                page.request(&out, style);
                page.response(&out, style, 200, b"{}".to_vec());
                ok(json!({}))
            }
            "wait_visible" => ok(json!({})),
            "select_option" => {
                let selector = command["selector"].as_str().unwrap_or_default();
                if map.failing_selector.as_deref() == Some(selector) {
                    fail(format!("waiting for selector \"{}\"", selector))
                } else {
                    if selector == "#right-martin-tile-selector" && command["value"] == "review" {
                        page.load_traffic(&map, &out);
                    }
                    ok(json!({}))
                }
            }
            "subscribe" => {
                page.next_subscription += 1;
                let kind = command["kind"].as_str().unwrap_or_default().to_string();
                let parts = command["url_contains"]
                    .as_array()
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|p| p.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                page.subscriptions.insert(page.next_subscription, (kind, parts));
                ok(json!({"subscription": page.next_subscription}))
            }
            "unsubscribe" => {
                let subscription = command["subscription"].as_u64().unwrap_or_default();
                page.drop_subscription(&out, subscription);
                ok(json!({}))
            }
            "response_body" => {
                let response = command["response"].as_u64().unwrap_or_default();
                let reply = match page.responses.get(&response) {
                    Some(body) => ok(json!({
                        "body": base64::engine::general_purpose::STANDARD.encode(body)
                    })),
                    None => fail(format!("unknown response {}", response)),
                };
                let out = out.clone();
                let delay = map.body_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = out.send(reply);
                });
                continue;
            }
            "screenshot" => {
                let path = command["path"].as_str().unwrap_or_default();
                let _ = std::fs::write(path, b"\x89PNG fake");
                ok(json!({}))
            }
            "close_page" => {
                let subscriptions: Vec<u64> = page.subscriptions.keys().copied().collect();
                for subscription in subscriptions {
                    page.drop_subscription(&out, subscription);
                }
                page.responses.clear();
                if let Some(path) = command["trace_path"].as_str() {
                    let _ = std::fs::write(path, b"PK fake trace");
                }
                ok(json!({}))
            }
            "shutdown" => {
                let _ = out.send(ok(json!({})));
                break;
            }
            other => fail(format!("unknown op {}", other)),
        };

        let _ = out.send(reply);
    }
}
