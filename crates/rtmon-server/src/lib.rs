//! The rtmon aggregator: receives metric reports over HTTP and stores them in
//! one of the `rtmon-storage` repositories.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod service;
pub mod signing;
pub mod state;
