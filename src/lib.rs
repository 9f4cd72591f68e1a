pub mod app;
pub mod callrecord;
pub mod config;
pub mod event;
pub mod handler;
pub mod provider;
pub mod reconcile;
