//! vitalwatch: a health-monitoring client and its serverless analysis
//! functions.
//!
//! Devices stream vital signs into a managed backend; the client shows the
//! latest reading and a rolling window, manages uploaded medical reports and
//! alerts, and reaches an AI assistant only through the functions hosted by
//! `vitalwatch serve`.

pub mod activity;
pub mod alerts;
pub mod assistant;
pub mod backend;
pub mod cli;
pub mod config;
pub mod devices;
pub mod functions;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod reports;
pub mod session;
pub mod telemetry;
