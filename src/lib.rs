// Library for tests to access modules

pub mod aggregator;
pub mod bridge;
pub mod config;
pub mod line_reader;
pub mod models;
pub mod routes;
pub mod scale_channel;
pub mod simulator;
pub mod stability;
pub mod telemetry;
