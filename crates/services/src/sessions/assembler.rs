use rand::rng;
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;

use exam_core::Clock;
use exam_core::model::{
    AssemblyError, ExamType, Question, Selection, Session, SessionStatus, UserId,
    validate_selections,
};
use exam_core::settings::ExamSettings;
use storage::repository::{AttemptHeader, AttemptRepository};

use crate::catalog::Catalog;
use crate::error::SessionError;

/// Non-fatal findings while resolving selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssemblyWarning {
    /// The selection resolved to no questions and contributes nothing.
    EmptySelection(Selection),
}

impl fmt::Display for AssemblyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyWarning::EmptySelection(selection) => {
                write!(f, "no questions for selection {selection}")
            }
        }
    }
}

/// A freshly built session with the questions it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub session: Session,
    pub questions: Vec<Question>,
    pub warnings: Vec<AssemblyWarning>,
}

/// Builds sessions from subject/year selections.
#[derive(Clone)]
pub struct SessionAssembler {
    clock: Clock,
    settings: Arc<ExamSettings>,
    catalog: Catalog,
    attempts: Arc<dyn AttemptRepository>,
    shuffle_within_selection: bool,
}

fn shuffle_in_place(questions: &mut [Question]) {
    let mut rng = rng();
    questions.shuffle(&mut rng);
}

impl SessionAssembler {
    #[must_use]
    pub fn new(
        clock: Clock,
        settings: Arc<ExamSettings>,
        catalog: Catalog,
        attempts: Arc<dyn AttemptRepository>,
    ) -> Self {
        Self {
            clock,
            settings,
            catalog,
            attempts,
            shuffle_within_selection: false,
        }
    }

    /// Shuffle each selection's questions before concatenation. Off by default;
    /// selection order is always kept.
    #[must_use]
    pub fn with_shuffle_within_selection(mut self, shuffle: bool) -> Self {
        self.shuffle_within_selection = shuffle;
        self
    }

    async fn resolve(
        &self,
        exam_type: &ExamType,
        selections: &[Selection],
    ) -> Result<(Vec<Question>, Vec<AssemblyWarning>), SessionError> {
        let mut questions = Vec::new();
        let mut warnings = Vec::new();
        for selection in selections {
            let mut found = self
                .catalog
                .questions_for(exam_type, selection.subject_id, selection.year)
                .await?;
            if found.is_empty() {
                tracing::warn!(%exam_type, %selection, "selection resolved to no questions");
                warnings.push(AssemblyWarning::EmptySelection(*selection));
                continue;
            }
            if self.shuffle_within_selection {
                shuffle_in_place(&mut found);
            }
            questions.append(&mut found);
        }
        if questions.is_empty() {
            return Err(AssemblyError::NoQuestions.into());
        }
        Ok((questions, warnings))
    }

    async fn persist(&self, session: &Session) -> Result<(), SessionError> {
        self.attempts
            .save_attempt(&AttemptHeader::from_session(session))
            .await?;
        self.attempts
            .replace_answer_sheet(session.id(), session.answers())
            .await?;
        Ok(())
    }

    /// Resolve the selections and persist a new `Created` session with a
    /// blank answer sheet and the exam's default time budget.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Validation` if selections are empty, repeated or
    /// all resolve to nothing, `SessionError::Catalog` if content cannot be
    /// fetched, or `SessionError::Storage` if the attempt cannot be stored.
    pub async fn assemble(
        &self,
        user_id: UserId,
        exam_type: ExamType,
        selections: Vec<Selection>,
    ) -> Result<Assembled, SessionError> {
        validate_selections(&selections)?;
        let (questions, warnings) = self.resolve(&exam_type, &selections).await?;

        let now = self.clock.now();
        let id = self.attempts.create_attempt(&user_id, &exam_type, now).await?;
        let budget = self.settings.budget_for(&exam_type);
        let session = Session::assemble(
            id,
            user_id,
            exam_type,
            selections,
            &questions,
            budget,
            now,
        )?;
        self.persist(&session).await?;

        tracing::info!(
            session = %session.id(),
            questions = session.len(),
            warnings = warnings.len(),
            budget_secs = budget,
            "session assembled"
        );
        Ok(Assembled {
            session,
            questions,
            warnings,
        })
    }

    /// Replace the selections of a session that has not started.
    ///
    /// The answer sheet is rebuilt and the countdown restarts from a fresh
    /// default budget.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SessionAssembler::assemble`], plus
    /// `AssemblyError::AlreadyStarted` if the session is past `Created`.
    pub async fn switch_selections(
        &self,
        mut session: Session,
        selections: Vec<Selection>,
    ) -> Result<Assembled, SessionError> {
        if session.status() != SessionStatus::Created {
            return Err(AssemblyError::AlreadyStarted(session.status()).into());
        }
        validate_selections(&selections)?;
        let (questions, warnings) = self.resolve(session.exam_type(), &selections).await?;
        let budget = self.settings.budget_for(session.exam_type());
        session.switch_selections(selections, &questions, budget)?;
        self.persist(&session).await?;

        tracing::info!(
            session = %session.id(),
            questions = session.len(),
            "session selections switched"
        );
        Ok(Assembled {
            session,
            questions,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use exam_core::model::{QuestionId, SubjectId};
    use exam_core::time::fixed_clock;
    use storage::repository::{InMemoryRepository, QuestionRepository};

    fn utme() -> ExamType {
        ExamType::new("utme").unwrap()
    }

    fn question(id: u64, subject: u64, year: u16) -> Question {
        Question::new(
            QuestionId::new(id),
            SubjectId::new(subject),
            format!("Subject {subject}"),
            year,
            utme(),
            format!("Q{id}"),
            vec!["a".into(), "b".into(), "c".into()],
            0,
            None,
        )
        .unwrap()
    }

    async fn assembler() -> (SessionAssembler, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        for q in [
            question(1, 1, 2020),
            question(2, 1, 2020),
            question(3, 2, 2020),
            question(4, 2, 2021),
        ] {
            repo.upsert_question(&q).await.unwrap();
        }
        let assembler = SessionAssembler::new(
            fixed_clock(),
            Arc::new(ExamSettings::standard()),
            Catalog::new(Arc::new(repo.clone())),
            Arc::new(repo.clone()),
        );
        (assembler, repo)
    }

    #[tokio::test]
    async fn questions_follow_selection_order() {
        let (assembler, repo) = assembler().await;
        let out = assembler
            .assemble(
                UserId::new("u1").unwrap(),
                utme(),
                vec![
                    Selection::new(SubjectId::new(2), 2020),
                    Selection::new(SubjectId::new(1), 2020),
                ],
            )
            .await
            .unwrap();

        let ids: Vec<u64> = out.session.question_ids().iter().map(|q| q.value()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(out.session.status(), SessionStatus::Created);
        assert_eq!(out.session.remaining_secs(), 7_200);
        assert!(out.warnings.is_empty());

        let header = repo.get_attempt(out.session.id()).await.unwrap();
        assert_eq!(header.total_questions, 3);
        assert_eq!(header.selections, out.session.selections());
    }

    #[tokio::test]
    async fn empty_selection_is_a_warning_not_a_failure() {
        let (assembler, _) = assembler().await;
        let missing = Selection::new(SubjectId::new(9), 2020);
        let out = assembler
            .assemble(
                UserId::new("u1").unwrap(),
                utme(),
                vec![missing, Selection::new(SubjectId::new(1), 2020)],
            )
            .await
            .unwrap();
        assert_eq!(out.warnings, vec![AssemblyWarning::EmptySelection(missing)]);
        assert_eq!(out.session.len(), 2);
    }

    #[tokio::test]
    async fn rejects_empty_and_unresolvable_selections() {
        let (assembler, _) = assembler().await;
        let err = assembler
            .assemble(UserId::new("u1").unwrap(), utme(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::Assembly(AssemblyError::EmptySelection))
        ));

        let err = assembler
            .assemble(
                UserId::new("u1").unwrap(),
                utme(),
                vec![Selection::new(SubjectId::new(9), 1990)],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::Assembly(AssemblyError::NoQuestions))
        ));
    }

    #[tokio::test]
    async fn shuffle_keeps_selection_blocks_together() {
        let (assembler, _) = assembler().await;
        let assembler = assembler.with_shuffle_within_selection(true);
        let out = assembler
            .assemble(
                UserId::new("u1").unwrap(),
                utme(),
                vec![
                    Selection::new(SubjectId::new(1), 2020),
                    Selection::new(SubjectId::new(2), 2021),
                ],
            )
            .await
            .unwrap();
        let ids: Vec<u64> = out.session.question_ids().iter().map(|q| q.value()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], 4);
        let mut first_block = ids[..2].to_vec();
        first_block.sort_unstable();
        assert_eq!(first_block, vec![1, 2]);
    }

    #[tokio::test]
    async fn switching_selections_resets_the_budget() {
        let (assembler, _) = assembler().await;
        let out = assembler
            .assemble(
                UserId::new("u1").unwrap(),
                utme(),
                vec![Selection::new(SubjectId::new(1), 2020)],
            )
            .await
            .unwrap();
        let id = out.session.id();

        let switched = assembler
            .switch_selections(out.session, vec![Selection::new(SubjectId::new(2), 2021)])
            .await
            .unwrap();
        assert_eq!(switched.session.id(), id);
        assert_eq!(switched.session.question_ids(), &[QuestionId::new(4)]);
        assert_eq!(switched.session.remaining_secs(), 7_200);
        assert_eq!(switched.session.answers().len(), 1);
    }
}
