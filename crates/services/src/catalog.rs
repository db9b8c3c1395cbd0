use std::sync::Arc;

use exam_core::model::{ExamType, Question, SubjectId};
use storage::repository::{QuestionRepository, SubjectYears};

use crate::error::CatalogError;

/// Read-only access to question content.
#[derive(Clone)]
pub struct Catalog {
    questions: Arc<dyn QuestionRepository>,
}

impl Catalog {
    #[must_use]
    pub fn new(questions: Arc<dyn QuestionRepository>) -> Self {
        Self { questions }
    }

    /// Questions for one exam, subject and year, ordered by question id.
    ///
    /// An empty list is a valid answer for an unknown filter.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the content store cannot be reached,
    /// or `CatalogError::Content` if stored content cannot be decoded.
    pub async fn questions_for(
        &self,
        exam_type: &ExamType,
        subject_id: SubjectId,
        year: u16,
    ) -> Result<Vec<Question>, CatalogError> {
        let mut questions = self
            .questions
            .questions_for(exam_type, subject_id, year)
            .await?;
        questions.sort_by_key(Question::id);
        Ok(questions)
    }

    /// Subjects and years available for `exam_type`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Catalog::questions_for`].
    pub async fn subjects(&self, exam_type: &ExamType) -> Result<Vec<SubjectYears>, CatalogError> {
        Ok(self.questions.list_subjects(exam_type).await?)
    }

    /// Load questions into the content store.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if any question cannot be stored.
    pub async fn import(&self, questions: &[Question]) -> Result<usize, CatalogError> {
        for question in questions {
            self.questions.upsert_question(question).await?;
        }
        tracing::info!(count = questions.len(), "imported questions");
        Ok(questions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::QuestionId;
    use storage::repository::InMemoryRepository;

    fn question(id: u64) -> Question {
        Question::new(
            QuestionId::new(id),
            SubjectId::new(1),
            "Physics",
            2019,
            ExamType::new("utme").unwrap(),
            format!("Q{id}"),
            vec!["a".into(), "b".into()],
            0,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_filter_is_empty_not_an_error() {
        let catalog = Catalog::new(Arc::new(InMemoryRepository::new()));
        let found = catalog
            .questions_for(&ExamType::new("utme").unwrap(), SubjectId::new(42), 1999)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn imported_questions_come_back_in_id_order() {
        let catalog = Catalog::new(Arc::new(InMemoryRepository::new()));
        catalog
            .import(&[question(5), question(2), question(9)])
            .await
            .unwrap();
        let ids: Vec<u64> = catalog
            .questions_for(&ExamType::new("utme").unwrap(), SubjectId::new(1), 2019)
            .await
            .unwrap()
            .iter()
            .map(|q| q.id().value())
            .collect();
        assert_eq!(ids, vec![2, 5, 9]);

        let subjects = catalog.subjects(&ExamType::new("utme").unwrap()).await.unwrap();
        assert_eq!(subjects[0].subject, "Physics");
    }

    #[test]
    fn unreachable_store_maps_to_not_found() {
        let err = CatalogError::from(storage::repository::StorageError::Connection("down".into()));
        assert!(matches!(err, CatalogError::NotFound(_)));
        let err = CatalogError::from(storage::repository::StorageError::Serialization("bad".into()));
        assert!(matches!(err, CatalogError::Content(_)));
    }
}
