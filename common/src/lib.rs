// Common library: command dispatch, event bus, scheduler and process lifecycle

pub mod auth;
pub mod bootstrap;
pub mod command;
pub mod config;
pub mod errors;
pub mod events;
pub mod feeds;
pub mod lifecycle;
pub mod messages;
pub mod models;
pub mod modules;
pub mod notify;
pub mod plugins;
pub mod progress;
pub mod schedule;
pub mod scheduler;
pub mod stop;
pub mod telemetry;
pub mod trigger;
pub mod worker_pool;
