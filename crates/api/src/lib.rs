//! HTTP API: routers, trust gates, and request/response mapping for the
//! user and admin services.

pub mod app;
pub mod context;
pub mod middleware;
pub mod s2s_client;
