//! Time-compressed replay of an archive of geotagged fire detections.
//!
//! A [`playback::SessionController`] owns at most one session. Each session
//! runs a producer that walks a simulated clock through the requested range,
//! querying the [`store::EventStore`] one window per tick, and a consumer that
//! fans the resulting batches out through a [`broadcast::Broadcaster`].

pub mod broadcast;
pub mod config;
pub mod core;
pub mod error;
pub mod input;
pub mod playback;
pub mod store;
