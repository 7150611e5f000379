pub mod api;
pub mod cancel;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod duration;
pub mod engine;
pub mod executor;
pub mod host;
pub mod locator;
pub mod models;
pub mod notify;
pub mod page;
pub mod probe;
pub mod selector;
pub mod storage;
