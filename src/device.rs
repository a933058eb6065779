//! HTTP client for Tablo appliances.
//!
//! Two surfaces are involved: the vendor's directory service (device
//! discovery over the public internet) and the appliance's own local API.
//! Recordings are exposed as a directory index of numeric ids on port
//! 18080; each id carries a JSON metadata document and a directory of
//! numbered transport-stream segments. The REST port (8885) provides the
//! start-playback endpoint whose playlist URL can feed the encoder
//! directly.
//!
//! Every method degrades rather than aborts: discovery failure yields an
//! empty device list, a metadata failure yields `None` (counted as failed
//! metadata by the caller), and listing/segment failures surface as typed
//! transport errors the caller logs and skips.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Error;
use crate::extract;
use crate::models::{DeviceInfo, MediaKind};

/// Vendor directory service used for appliance discovery.
pub const DISCOVERY_URL: &str = "https://api.tablotv.com/assocserver/getipinfo/";

/// Port serving the recording directory index and segments.
const PVR_PORT: u16 = 18080;
/// Port serving the REST API (start playback).
const API_PORT: u16 = 8885;

pub struct DeviceClient {
    http: reqwest::Client,
}

impl DeviceClient {
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { http })
    }

    /// Ask the directory service for appliances associated with this
    /// network. Any failure degrades to an empty list — manually configured
    /// addresses still work without the service.
    pub async fn discover(&self) -> Vec<DeviceInfo> {
        let response = match self.http.get(DISCOVERY_URL).send().await {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "device discovery unreachable");
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "device discovery refused");
            return Vec::new();
        }
        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "device discovery returned malformed JSON");
                return Vec::new();
            }
        };

        let mut devices = Vec::new();
        if let Some(cpes) = extract::lookup(&body, "cpes").and_then(Value::as_array) {
            for entry in cpes {
                let addr = extract::resolve_text(entry, "private_ip", "");
                if addr.is_empty() {
                    continue;
                }
                devices.push(DeviceInfo {
                    addr,
                    name: extract::resolve_text(entry, "name", ""),
                    board_type: extract::resolve_text(entry, "board_type", ""),
                });
            }
        }
        devices
    }

    /// List the recording ids currently present on a device, ascending.
    pub async fn recording_ids(&self, addr: &str) -> Result<Vec<u64>, Error> {
        let url = format!("http://{}:{}/pvr", addr, PVR_PORT);
        let body = self.get_text(addr, &url).await?;
        let mut ids = parse_pvr_listing(&body);
        ids.sort_unstable();
        Ok(ids)
    }

    /// Fetch one recording's metadata document. Transport or parse failures
    /// yield `None` — the caller counts it as failed metadata and moves on.
    pub async fn metadata(&self, addr: &str, id: u64) -> Option<Value> {
        let url = format!("http://{}:{}/pvr/{}/meta.txt", addr, PVR_PORT, id);
        let body = match self.get_text(addr, &url).await {
            Ok(body) => body,
            Err(err) => {
                debug!(device = addr, id, error = %err, "metadata fetch failed");
                return None;
            }
        };
        match serde_json::from_str(&body) {
            Ok(doc) => Some(doc),
            Err(err) => {
                debug!(device = addr, id, error = %err, "metadata document malformed");
                None
            }
        }
    }

    /// How many sequential segments the recording has.
    pub async fn segment_count(&self, addr: &str, id: u64) -> Result<u32, Error> {
        let url = format!("http://{}:{}/pvr/{}/segs", addr, PVR_PORT, id);
        let body = self.get_text(addr, &url).await?;
        parse_segment_index(&body).ok_or_else(|| Error::Http {
            url,
            status: 200, // reachable but the index had no segment entries
        })
    }

    /// Fetch one numbered segment's bytes.
    pub async fn fetch_segment(&self, addr: &str, id: u64, n: u32) -> Result<Vec<u8>, Error> {
        let url = format!(
            "http://{}:{}/pvr/{}/segs/{:05}.ts",
            addr, PVR_PORT, id, n
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| Error::Transport {
                device: addr.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(Error::Http {
                url,
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(|source| Error::Transport {
            device: addr.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }

    /// Ask the device to start playback and return the playlist URL for the
    /// encoder.
    pub async fn start_playback(
        &self,
        addr: &str,
        id: u64,
        kind: MediaKind,
    ) -> Result<String, Error> {
        let path = match kind {
            MediaKind::Movie => format!("/recordings/movies/airings/{}/watch", id),
            // Sports events play through the episode endpoint as well.
            _ => format!("/recordings/series/episodes/{}/watch", id),
        };
        let url = format!("http://{}:{}{}", addr, API_PORT, path);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|source| Error::Transport {
                device: addr.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(Error::Http {
                url,
                status: response.status().as_u16(),
            });
        }
        let body: Value = response.json().await.map_err(|source| Error::Transport {
            device: addr.to_string(),
            source,
        })?;
        let playlist = extract::resolve_text(&body, "playlist_url", "");
        if playlist.is_empty() {
            return Err(Error::Http { url, status: 200 });
        }
        Ok(playlist)
    }

    async fn get_text(&self, addr: &str, url: &str) -> Result<String, Error> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| Error::Transport {
                device: addr.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(Error::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.text().await.map_err(|source| Error::Transport {
            device: addr.to_string(),
            source,
        })
    }
}

/// Discovered devices merged with manually configured addresses, sorted by
/// address for deterministic iteration order.
pub async fn gather_devices(
    config: &crate::config::Config,
    client: &DeviceClient,
) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    if config.devices.discover {
        devices = client.discover().await;
    }
    for addr in &config.devices.addresses {
        if !devices.iter().any(|d| d.addr == *addr) {
            devices.push(DeviceInfo {
                addr: addr.clone(),
                name: "(manual)".to_string(),
                board_type: String::new(),
            });
        }
    }
    devices.sort_by(|a, b| a.addr.cmp(&b.addr));
    devices
}

/// `tgo devices`: print known appliances and whether they respond.
pub async fn run_devices(config: &crate::config::Config) -> anyhow::Result<()> {
    let client = DeviceClient::new(config.devices.http_timeout_secs)?;
    let devices = gather_devices(config, &client).await;

    println!("{:<16} {:<20} {:<12} STATUS", "ADDRESS", "NAME", "MODEL");
    if devices.is_empty() {
        println!("(no devices discovered or configured)");
        return Ok(());
    }
    for device in &devices {
        match client.recording_ids(&device.addr).await {
            Ok(ids) => println!(
                "{:<16} {:<20} {:<12} OK ({} recordings)",
                device.addr,
                device.name,
                device.board_type,
                ids.len()
            ),
            Err(_) => println!(
                "{:<16} {:<20} {:<12} UNREACHABLE",
                device.addr, device.name, device.board_type
            ),
        }
    }
    Ok(())
}

/// Parse recording ids out of the `/pvr` directory index.
///
/// The index is an HTML table of links; each recording is an anchor whose
/// href is the numeric id with a trailing slash. Dotfile entries and the
/// parent-directory link are skipped.
fn parse_pvr_listing(html: &str) -> Vec<u64> {
    let mut ids = Vec::new();
    for chunk in html.split("href=\"").skip(1) {
        let Some(end) = chunk.find('"') else {
            continue;
        };
        let target = chunk[..end].trim_end_matches('/');
        if target.starts_with('.') {
            continue;
        }
        if let Ok(id) = target.parse::<u64>() {
            ids.push(id);
        }
    }
    ids
}

/// Parse the segment count out of the `/pvr/<id>/segs` index: the highest
/// `NNNNN.ts` entry. Concatenation is positional, so the count — not the
/// set of names — is what matters.
fn parse_segment_index(html: &str) -> Option<u32> {
    let mut max: Option<u32> = None;
    let mut rest = html;
    while let Some(pos) = rest.find(".ts") {
        let head = &rest[..pos];
        let digits: String = head
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if let Ok(n) = digits.trim_start_matches('0').parse::<u32>() {
            max = Some(max.map_or(n, |m| m.max(n)));
        }
        rest = &rest[pos + 3..];
    }
    max
}
