use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::exam::{ExamType, Selection};
use crate::model::ids::{QuestionId, SubjectId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question prompt cannot be empty")]
    EmptyPrompt,

    #[error("subject name cannot be empty")]
    EmptySubject,

    #[error("question must have at least one option")]
    NoOptions,

    #[error("correct option {index} is out of range for {len} options")]
    CorrectOptionOutOfRange { index: usize, len: usize },
}

/// Immutable exam question supplied by the content collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    subject_id: SubjectId,
    subject: String,
    year: u16,
    exam_type: ExamType,
    prompt: String,
    options: Vec<String>,
    correct_option: usize,
    explanation: Option<String>,
}

impl Question {
    /// Build a validated question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the prompt or subject name is blank, there are
    /// no options, or the correct option index does not point at an option.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: QuestionId,
        subject_id: SubjectId,
        subject: impl Into<String>,
        year: u16,
        exam_type: ExamType,
        prompt: impl Into<String>,
        options: Vec<String>,
        correct_option: usize,
        explanation: Option<String>,
    ) -> Result<Self, QuestionError> {
        let subject = subject.into().trim().to_string();
        if subject.is_empty() {
            return Err(QuestionError::EmptySubject);
        }
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }
        if options.is_empty() {
            return Err(QuestionError::NoOptions);
        }
        if correct_option >= options.len() {
            return Err(QuestionError::CorrectOptionOutOfRange {
                index: correct_option,
                len: options.len(),
            });
        }
        let explanation = explanation
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        Ok(Self {
            id,
            subject_id,
            subject,
            year,
            exam_type,
            prompt,
            options,
            correct_option,
            explanation,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn year(&self) -> u16 {
        self.year
    }

    #[must_use]
    pub fn exam_type(&self) -> &ExamType {
        &self.exam_type
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn correct_option(&self) -> usize {
        self.correct_option
    }

    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    /// The selection this question belongs to.
    #[must_use]
    pub fn selection(&self) -> Selection {
        Selection::new(self.subject_id, self.year)
    }

    /// Returns true when `selected` is the correct option.
    #[must_use]
    pub fn is_correct(&self, selected: Option<usize>) -> bool {
        selected == Some(self.correct_option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        vec!["1".into(), "2".into(), "3".into(), "4".into()]
    }

    #[test]
    fn question_validates_correct_option_range() {
        let err = Question::new(
            QuestionId::new(1),
            SubjectId::new(1),
            "Mathematics",
            2020,
            ExamType::new("utme").unwrap(),
            "1 + 1 = ?",
            options(),
            4,
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            QuestionError::CorrectOptionOutOfRange { index: 4, len: 4 }
        );
    }

    #[test]
    fn question_rejects_blank_prompt_and_empty_options() {
        let exam = ExamType::new("utme").unwrap();
        let blank = Question::new(
            QuestionId::new(1),
            SubjectId::new(1),
            "Mathematics",
            2020,
            exam.clone(),
            "  ",
            options(),
            0,
            None,
        );
        assert_eq!(blank.unwrap_err(), QuestionError::EmptyPrompt);

        let no_options = Question::new(
            QuestionId::new(1),
            SubjectId::new(1),
            "Mathematics",
            2020,
            exam,
            "Pick one",
            Vec::new(),
            0,
            None,
        );
        assert_eq!(no_options.unwrap_err(), QuestionError::NoOptions);
    }

    #[test]
    fn is_correct_treats_missing_selection_as_wrong() {
        let question = Question::new(
            QuestionId::new(1),
            SubjectId::new(1),
            "Mathematics",
            2020,
            ExamType::new("utme").unwrap(),
            "1 + 1 = ?",
            options(),
            1,
            Some("   ".into()),
        )
        .unwrap();

        assert!(question.is_correct(Some(1)));
        assert!(!question.is_correct(Some(0)));
        assert!(!question.is_correct(None));
        assert_eq!(question.explanation(), None);
        assert_eq!(question.selection(), Selection::new(SubjectId::new(1), 2020));
    }
}
