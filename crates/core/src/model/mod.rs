mod exam;
mod history;
mod ids;
mod question;
mod score;
mod session;

pub use exam::{ExamType, ExamTypeError, Selection};
pub use history::{ExamRollupRow, HistoryAnswer};
pub use ids::{AttemptId, ParseIdError, QuestionId, SessionId, SubjectId, UserId, UserIdError};
pub use question::{Question, QuestionError};
pub use score::{HistoryPoint, OverallScore, ScoreSummary, percentage};
pub use session::{
    AnswerRecord, AssemblyError, ParseStatusError, Session, SessionStatus, validate_selections,
};
