//! # tablo-fetch
//!
//! Pull recordings off Tablo OTA DVR appliances: poll each device's
//! recorded-media catalog, resolve the heterogeneous per-recording metadata
//! into normalized records, decide what is new against a persisted transfer
//! history, and drive a segment fetch → reassembly → transcode → tag →
//! placement pipeline for the selected recordings.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────┐   ┌───────────────┐
//! │  Devices  │──▶│  Resolver     │──▶│  Selector     │
//! │ (listing, │   │ (probe chains,│   │ (history,     │
//! │  meta.txt)│   │  naming, tags)│   │  dedup, regex)│
//! └─────┬─────┘   └───────────────┘   └──────┬────────┘
//!       │                                    │
//!       ▼                                    ▼
//! ┌───────────┐                      ┌───────────────┐
//! │  Catalog  │                      │   Pipeline    │
//! │  cache    │                      │ (segments →   │
//! │ (JSON)    │                      │  ffmpeg → mv) │
//! └───────────┘                      └──────┬────────┘
//!                                           │
//!                                           ▼
//!                                    ┌───────────────┐
//!                                    │   History     │
//!                                    │ (append-only) │
//!                                    └───────────────┘
//! ```
//!
//! The catalog cache and the history file are the only persisted state.
//! Recordings themselves are re-resolved every cycle so configuration
//! changes (naming templates, filters) take effect immediately.

pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod extract;
pub mod history;
pub mod listing;
pub mod models;
pub mod pipeline;
pub mod resolve;
pub mod sanitize;
pub mod select;
pub mod sync;
pub mod template;
