use std::path::Path;

use anyhow::Context;
use exam_core::model::{ExamType, Question, QuestionId, SubjectId};
use serde::Deserialize;
use services::AppServices;

/// One question as it appears in a seed file.
#[derive(Debug, Deserialize)]
struct SeedQuestion {
    id: u64,
    subject_id: u64,
    subject: String,
    year: u16,
    exam_type: String,
    prompt: String,
    options: Vec<String>,
    correct_option: usize,
    #[serde(default)]
    explanation: Option<String>,
}

impl SeedQuestion {
    fn into_question(self) -> anyhow::Result<Question> {
        let id = self.id;
        Question::new(
            QuestionId::new(self.id),
            SubjectId::new(self.subject_id),
            self.subject,
            self.year,
            ExamType::new(self.exam_type)?,
            self.prompt,
            self.options,
            self.correct_option,
            self.explanation,
        )
        .with_context(|| format!("question {id} is invalid"))
    }
}

fn parse(raw: &str) -> anyhow::Result<Vec<Question>> {
    let entries: Vec<SeedQuestion> = serde_json::from_str(raw).context("malformed seed file")?;
    entries.into_iter().map(SeedQuestion::into_question).collect()
}

pub async fn execute(services: &AppServices, file: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let questions = parse(&raw)?;
    let count = services.catalog().import(&questions).await?;
    println!("imported {count} questions from {}", file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_entries_become_validated_questions() {
        let raw = r#"[
            {"id": 1, "subject_id": 2, "subject": "Physics", "year": 2019,
             "exam_type": "UTME", "prompt": "Unit of force?",
             "options": ["joule", "newton"], "correct_option": 1}
        ]"#;
        let questions = parse(raw).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].exam_type().as_str(), "utme");
        assert!(questions[0].is_correct(Some(1)));
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let raw = r#"[{"id": 1, "subject_id": 2, "subject": "Physics", "year": 2019,
            "exam_type": "utme", "prompt": "?", "options": ["a"], "correct_option": 4}]"#;
        let err = parse(raw).unwrap_err();
        assert!(err.to_string().contains("question 1"));
    }
}
