use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates questions, attempts, the per-question answer sheet and score
/// summaries, plus the (subject, year, attempt) lookup index.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS questions (
                    id INTEGER PRIMARY KEY,
                    subject_id INTEGER NOT NULL,
                    subject TEXT NOT NULL,
                    year INTEGER NOT NULL CHECK (year >= 0),
                    exam_type TEXT NOT NULL,
                    prompt TEXT NOT NULL,
                    options_json TEXT NOT NULL,
                    option_count INTEGER NOT NULL CHECK (option_count > 0),
                    correct_option INTEGER NOT NULL CHECK (correct_option >= 0),
                    explanation TEXT
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    exam_type TEXT NOT NULL,
                    selections_json TEXT NOT NULL DEFAULT '[]',
                    status TEXT NOT NULL,
                    time_limit_secs INTEGER NOT NULL DEFAULT 0 CHECK (time_limit_secs >= 0),
                    remaining_secs INTEGER NOT NULL DEFAULT 0 CHECK (remaining_secs >= 0),
                    total_questions INTEGER NOT NULL DEFAULT 0 CHECK (total_questions >= 0),
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    finished_at TEXT
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempt_answers (
                    attempt_id INTEGER NOT NULL,
                    question_id INTEGER NOT NULL,
                    subject_id INTEGER NOT NULL,
                    year INTEGER NOT NULL,
                    selected_option INTEGER CHECK (selected_option >= 0),
                    answered_at TEXT,
                    PRIMARY KEY (attempt_id, question_id),
                    FOREIGN KEY (attempt_id) REFERENCES attempts(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS score_summaries (
                    session_id INTEGER NOT NULL,
                    subject_id INTEGER NOT NULL,
                    user_id TEXT NOT NULL,
                    subject TEXT NOT NULL,
                    position INTEGER NOT NULL CHECK (position >= 0),
                    total_questions INTEGER NOT NULL CHECK (total_questions > 0),
                    correct_count INTEGER NOT NULL CHECK (correct_count >= 0),
                    percentage INTEGER NOT NULL CHECK (percentage BETWEEN 0 AND 100),
                    completed_at TEXT NOT NULL,
                    PRIMARY KEY (session_id, subject_id),
                    FOREIGN KEY (session_id) REFERENCES attempts(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_questions_exam_subject_year
                    ON questions (exam_type, subject_id, year, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempts_user_status
                    ON attempts (user_id, status);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempt_answers_subject_year_attempt
                    ON attempt_answers (subject_id, year, attempt_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_score_summaries_user_completed
                    ON score_summaries (user_id, completed_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
