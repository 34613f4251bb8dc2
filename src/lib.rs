pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod grid;
pub mod nsrdb;
pub mod output;
pub mod pacing;
pub mod retry;
pub mod store;
