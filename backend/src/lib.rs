pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod progress;
pub mod routes;
pub mod training;
pub mod vision;
