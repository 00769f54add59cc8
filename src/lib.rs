pub mod approvals;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod filing;
pub mod jobs;
pub mod ledger;
pub mod models;
pub mod oauth;
pub mod procurement;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
pub mod webhooks;
pub mod workers;

pub use workers::{default_handlers, Worker};
