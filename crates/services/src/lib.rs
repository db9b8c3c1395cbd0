#![forbid(unsafe_code)]

pub mod app_services;
pub mod catalog;
pub mod countdown;
pub mod error;
pub mod history;
pub mod sessions;

pub use exam_core::Clock;
pub use sessions as session;

pub use app_services::AppServices;
pub use catalog::Catalog;
pub use countdown::{CountdownConfig, CountdownController, CountdownPhase, CountdownTarget};
pub use error::{AppServicesError, CatalogError, CountdownError, SessionError, ValidationError};
pub use history::HistoryService;

pub use sessions::{
    Assembled, AssemblyWarning, AttemptService, LiveSnapshot, LiveUpdate, ResumeService, Resumed,
    ScoringService, SessionAssembler, SubmitReceipt,
};
