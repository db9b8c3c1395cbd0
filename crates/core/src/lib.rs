#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod reconcile;
pub mod report;
pub mod scoring;
pub mod settings;
pub mod time;
pub mod tracker;

pub use error::Error;
pub use time::Clock;
