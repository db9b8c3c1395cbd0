mod assembler;
mod attempt;
mod resume;
mod scoring;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use assembler::{Assembled, AssemblyWarning, SessionAssembler};
pub use attempt::{AttemptService, LiveSnapshot, LiveUpdate, SubmitReceipt};
pub use resume::{ResumeService, Resumed};
pub use scoring::ScoringService;
