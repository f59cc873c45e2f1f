pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod services;
pub mod signals;
pub mod web;
