//! # Volley - Compact Ping Responder for MeshCore Networks
//!
//! Volley listens for short trigger messages on a MeshCore group channel and in direct
//! messages and answers with a single compact status line. Replies are kept small so the
//! bot costs as little airtime as possible on a shared LoRa mesh.
//!
//! ## Features
//!
//! - **Compact Replies**: `@[alice] 🏐 12:34:56Z,snr:7.5dB,rssi:-92.0dBm,hops:2,route:a1.b2`
//! - **Link Correlation**: SNR/RSSI samples and decoded route frames are matched to the
//!   message that triggered them.
//! - **Distance Estimates**: send a German postal code (`22767`) or dialling prefix (`040`)
//!   and the reply carries the great-circle distance to the bot's own position.
//! - **Rate Limiting**: a sliding window per sender keeps chatty nodes from flooding the mesh.
//! - **Connection Watchdog**: edge-triggered logging of link loss and recovery.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use volley::bot::Dispatcher;
//! use volley::config::Config;
//! use volley::geo::GeoTable;
//! use volley::mesh::bridge::BridgeClient;
//! use volley::mesh::{DeviceIdentity, MeshClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut client = BridgeClient::connect(&config.mesh.tcp, config.mesh.reply_timeout()).await?;
//!     let identity = client.device_identity().await.unwrap_or_else(|_| DeviceIdentity::default());
//!
//!     let mut bot = Dispatcher::new(client, GeoTable::default(), &config, identity);
//!     bot.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bot`] - The ping-response engine: classifier, rate limiter, telemetry correlator,
//!   reply composer, watchdog and the dispatcher that ties them together
//! - [`mesh`] - Collaborator API for the mesh client, the TCP bridge client and a test mock
//! - [`geo`] - Offline postal code / dialling prefix table and haversine distance
//! - [`config`] - Configuration management
//! - [`metrics`] - Process-lifetime request statistics
//! - [`logutil`] - Helpers for keeping mesh text readable in log lines
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Dispatcher    │ ← Event routing, statistics, shutdown
//! └─────────────────┘
//!          │
//! ┌─────────────────┐   ┌─────────────────┐
//! │   Mesh Client   │   │   Geo Table     │
//! │   (bridge)      │   │   (sled)        │
//! └─────────────────┘   └─────────────────┘
//! ```

pub mod bot;
pub mod config;
pub mod geo;
pub mod logutil;
pub mod mesh;
pub mod metrics;
