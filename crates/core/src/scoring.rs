use std::collections::HashMap;

use thiserror::Error;

use crate::model::{
    AnswerRecord, Question, QuestionId, ScoreSummary, Session, SessionStatus, SubjectId,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScoringError {
    #[error("session cannot be scored while {0}")]
    NotScorable(SessionStatus),

    #[error("question {0} is missing from the question bank")]
    MissingQuestion(QuestionId),
}

/// Pure scorer for finished sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine;

struct SubjectTally<'a> {
    subject_id: SubjectId,
    subject: &'a str,
    total: u32,
    correct: u32,
}

impl ScoringEngine {
    /// Score a finished session into one summary per subject, in the order
    /// subjects first appear in the question sequence.
    ///
    /// A question with no answer, or an unanswered record, counts as incorrect.
    /// Answers belonging to another session or to questions outside the
    /// sequence are ignored. When a question has several answers the latest
    /// `answered_at` wins.
    ///
    /// # Errors
    ///
    /// Returns `ScoringError::NotScorable` for sessions that are not finished,
    /// or `ScoringError::MissingQuestion` if a session question is not in
    /// `questions`.
    pub fn score(
        session: &Session,
        answers: &[AnswerRecord],
        questions: &[Question],
    ) -> Result<Vec<ScoreSummary>, ScoringError> {
        if !session.status().is_scorable() {
            return Err(ScoringError::NotScorable(session.status()));
        }

        let bank: HashMap<QuestionId, &Question> =
            questions.iter().map(|q| (q.id(), q)).collect();

        let mut selected: HashMap<QuestionId, &AnswerRecord> = HashMap::with_capacity(answers.len());
        for record in answers.iter().filter(|r| r.session_id == session.id()) {
            let keep_existing = selected
                .get(&record.question_id)
                .is_some_and(|existing| existing.answered_at > record.answered_at);
            if !keep_existing {
                selected.insert(record.question_id, record);
            }
        }

        let mut tallies: Vec<SubjectTally<'_>> = Vec::new();
        let mut index: HashMap<SubjectId, usize> = HashMap::new();

        for qid in session.question_ids() {
            let question = bank
                .get(qid)
                .ok_or(ScoringError::MissingQuestion(*qid))?;
            let choice = selected.get(qid).and_then(|r| r.selected_option);

            let slot = *index.entry(question.subject_id()).or_insert_with(|| {
                tallies.push(SubjectTally {
                    subject_id: question.subject_id(),
                    subject: question.subject(),
                    total: 0,
                    correct: 0,
                });
                tallies.len() - 1
            });
            let tally = &mut tallies[slot];
            tally.total = tally.total.saturating_add(1);
            if question.is_correct(choice) {
                tally.correct = tally.correct.saturating_add(1);
            }
        }

        Ok(tallies
            .into_iter()
            .filter_map(|t| {
                ScoreSummary::new(session.id(), t.subject_id, t.subject, t.total, t.correct)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExamType, OverallScore, Selection, SessionId, UserId};
    use crate::time::fixed_now;
    use crate::tracker::AttemptTracker;

    fn question(id: u64, subject_id: u64, subject: &str) -> Question {
        Question::new(
            QuestionId::new(id),
            SubjectId::new(subject_id),
            subject,
            2020,
            ExamType::new("utme").unwrap(),
            format!("Q{id}"),
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            (id % 4) as usize,
            None,
        )
        .unwrap()
    }

    fn finished(questions: &[Question], answer: impl Fn(&Question) -> Option<usize>) -> Session {
        let mut selections: Vec<Selection> = questions.iter().map(Question::selection).collect();
        selections.sort();
        selections.dedup();
        let session = Session::assemble(
            SessionId::new(1),
            UserId::new("u1").unwrap(),
            ExamType::new("utme").unwrap(),
            selections,
            questions,
            600,
            fixed_now(),
        )
        .unwrap();
        let mut tracker = AttemptTracker::new(session);
        tracker.start(fixed_now()).unwrap();
        for q in questions {
            if let Some(choice) = answer(q) {
                tracker.record_answer(q.id(), choice, fixed_now()).unwrap();
            }
        }
        tracker.submit(fixed_now()).unwrap();
        tracker.into_session()
    }

    #[test]
    fn ten_maths_questions_six_correct_is_sixty_percent() {
        let questions: Vec<Question> = (1..=10).map(|id| question(id, 1, "Mathematics")).collect();
        let session = finished(&questions, |q| {
            if q.id().value() <= 6 {
                Some(q.correct_option())
            } else {
                Some((q.correct_option() + 1) % 4)
            }
        });

        let scores = ScoringEngine::score(&session, session.answers(), &questions).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].subject, "Mathematics");
        assert_eq!(scores[0].total_questions, 10);
        assert_eq!(scores[0].correct_count, 6);
        assert_eq!(scores[0].percentage, 60);
    }

    #[test]
    fn unanswered_questions_count_in_the_denominator() {
        let questions: Vec<Question> = (1..=4).map(|id| question(id, 1, "Mathematics")).collect();
        let session = finished(&questions, |q| {
            (q.id().value() == 1).then(|| q.correct_option())
        });

        let scores = ScoringEngine::score(&session, session.answers(), &questions).unwrap();
        assert_eq!(scores[0].total_questions, 4);
        assert_eq!(scores[0].correct_count, 1);
        assert_eq!(scores[0].percentage, 25);

        let without_records = ScoringEngine::score(&session, &[], &questions).unwrap();
        assert_eq!(without_records[0].correct_count, 0);
    }

    #[test]
    fn one_summary_per_subject_in_sequence_order() {
        let questions = vec![
            question(1, 2, "English"),
            question(2, 1, "Mathematics"),
            question(3, 2, "English"),
        ];
        let session = finished(&questions, |q| Some(q.correct_option()));

        let scores = ScoringEngine::score(&session, session.answers(), &questions).unwrap();
        let subjects: Vec<_> = scores.iter().map(|s| s.subject.as_str()).collect();
        assert_eq!(subjects, vec!["English", "Mathematics"]);
        assert_eq!(scores[0].total_questions, 2);
        assert_eq!(
            OverallScore::from_summaries(&scores).unwrap().percentage,
            100
        );
    }

    #[test]
    fn scoring_twice_is_identical() {
        let questions: Vec<Question> = (1..=7).map(|id| question(id, 1, "Mathematics")).collect();
        let session = finished(&questions, |q| Some(q.id().value() as usize % 3));

        let first = ScoringEngine::score(&session, session.answers(), &questions).unwrap();
        let second = ScoringEngine::score(&session, session.answers(), &questions).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn in_progress_sessions_are_not_scorable() {
        let questions = vec![question(1, 1, "Mathematics")];
        let session = Session::assemble(
            SessionId::new(1),
            UserId::new("u1").unwrap(),
            ExamType::new("utme").unwrap(),
            vec![Selection::new(SubjectId::new(1), 2020)],
            &questions,
            600,
            fixed_now(),
        )
        .unwrap();
        let err = ScoringEngine::score(&session, &[], &questions).unwrap_err();
        assert_eq!(err, ScoringError::NotScorable(SessionStatus::Created));
    }

    #[test]
    fn missing_bank_question_is_reported() {
        let questions = vec![question(1, 1, "Mathematics"), question(2, 1, "Mathematics")];
        let session = finished(&questions, |_| None);
        let err = ScoringEngine::score(&session, &[], &questions[..1]).unwrap_err();
        assert_eq!(err, ScoringError::MissingQuestion(QuestionId::new(2)));
    }
}
