pub mod checker;
pub mod config;
pub mod context;
pub mod database;
pub mod engine;
pub mod language;
pub mod queue;
pub mod rate_limit;
pub mod routes;
pub mod sandbox;
pub mod store;
pub mod submission;
pub mod verdict;
pub mod web_server;
pub mod worker;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
