//! Offline-resilience layer for the WatchTheFall portal.
//!
//! Three cooperating pieces keep the portal usable while its server is
//! asleep or unreachable:
//! - [`proxy::CacheProxy`] serves pages and assets from a persistent cache
//! - [`monitor::ConnectivityMonitor`] tracks online/offline with a liveness probe
//! - [`queue::ActionQueue`] holds download requests until they can be delivered
//!
//! All of them persist through the SQLite-backed [`store`].

pub mod app;
pub mod brand;
pub mod config;
pub mod db;
pub mod monitor;
pub mod net;
pub mod notify;
pub mod proxy;
pub mod queue;
pub mod store;
pub mod task;

#[cfg(test)]
mod testing;
