pub mod api;
pub mod commit;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod export;
pub mod metrics;
pub mod metrics_consts;
pub mod pipeline;
pub mod router;
pub mod server;
pub mod store;
pub mod types;
pub mod validation;
