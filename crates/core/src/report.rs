//! Read-only views over historical results: trends, subject means and
//! per-attempt rollups.
//!
//! Every builder skips malformed input records, returning a [`Diagnostic`]
//! for each one next to the computed value.

use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::model::{
    AttemptId, ExamRollupRow, ExamType, HistoryAnswer, HistoryPoint, QuestionId, ScoreSummary,
    SessionId, SubjectId, percentage,
};

//
// ─── DIAGNOSTICS ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiagnosticKind {
    PercentageOutOfRange(u8),
    InconsistentSummary,
    DuplicateSummary,
    NoOptions,
    CorrectOptionOutOfRange { correct: usize, options: usize },
    SelectionOutOfRange { selected: usize, options: usize },
    ExamTypeMismatch { expected: ExamType, found: ExamType },
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::PercentageOutOfRange(p) => write!(f, "percentage {p} is above 100"),
            DiagnosticKind::InconsistentSummary => {
                write!(f, "summary counts do not match its percentage")
            }
            DiagnosticKind::DuplicateSummary => write!(f, "duplicate summary for session subject"),
            DiagnosticKind::NoOptions => write!(f, "question has no options"),
            DiagnosticKind::CorrectOptionOutOfRange { correct, options } => {
                write!(f, "correct option {correct} out of range for {options} options")
            }
            DiagnosticKind::SelectionOutOfRange { selected, options } => {
                write!(f, "selected option {selected} out of range for {options} options")
            }
            DiagnosticKind::ExamTypeMismatch { expected, found } => {
                write!(f, "attempt is {expected} but record is {found}")
            }
        }
    }
}

/// A skipped input record: its position in the input slice and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub index: usize,
    pub kind: DiagnosticKind,
}

/// A computed view plus the records that were left out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Report<T> {
    pub value: T,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Report<T> {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

fn skipped(diagnostics: &mut Vec<Diagnostic>, index: usize, kind: DiagnosticKind) {
    tracing::warn!(index, reason = %kind, "skipping malformed history record");
    diagnostics.push(Diagnostic { index, kind });
}

//
// ─── TREND ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendGranularity {
    Day,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrendPeriod {
    Day(NaiveDate),
    Year(i32),
}

impl TrendPeriod {
    fn of(date: NaiveDate, granularity: TrendGranularity) -> Self {
        match granularity {
            TrendGranularity::Day => TrendPeriod::Day(date),
            TrendGranularity::Year => TrendPeriod::Year(date.year()),
        }
    }
}

impl fmt::Display for TrendPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendPeriod::Day(date) => write!(f, "{date}"),
            TrendPeriod::Year(year) => write!(f, "{year}"),
        }
    }
}

/// Mean subject percentage within one period.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendPoint {
    pub period: TrendPeriod,
    pub subject_id: SubjectId,
    pub percentage: f64,
    pub samples: usize,
}

//
// ─── REPORTER ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, Default)]
pub struct AggregationReporter;

#[allow(clippy::cast_precision_loss)]
fn mean(sum: u64, count: usize) -> f64 {
    sum as f64 / count as f64
}

impl AggregationReporter {
    /// Group history points by period and subject, ordered by period then
    /// subject. Periods with no data are absent.
    #[must_use]
    pub fn build_trend(
        points: &[HistoryPoint],
        granularity: TrendGranularity,
    ) -> Report<Vec<TrendPoint>> {
        let mut diagnostics = Vec::new();
        let mut groups: BTreeMap<(TrendPeriod, SubjectId), (u64, usize)> = BTreeMap::new();

        for (index, point) in points.iter().enumerate() {
            if point.percentage() > 100 {
                skipped(
                    &mut diagnostics,
                    index,
                    DiagnosticKind::PercentageOutOfRange(point.percentage()),
                );
                continue;
            }
            let key = (TrendPeriod::of(point.date(), granularity), point.subject_id());
            let entry = groups.entry(key).or_insert((0, 0));
            entry.0 += u64::from(point.percentage());
            entry.1 += 1;
        }

        let value = groups
            .into_iter()
            .map(|((period, subject_id), (sum, count))| TrendPoint {
                period,
                subject_id,
                percentage: mean(sum, count),
                samples: count,
            })
            .collect();

        Report { value, diagnostics }
    }

    /// Mean percentage per subject across every session that contains it.
    #[must_use]
    pub fn build_subject_means(summaries: &[ScoreSummary]) -> Report<BTreeMap<SubjectId, f64>> {
        let mut diagnostics = Vec::new();
        let mut seen: HashSet<(SessionId, SubjectId)> = HashSet::with_capacity(summaries.len());
        let mut sums: BTreeMap<SubjectId, (u64, usize)> = BTreeMap::new();

        for (index, summary) in summaries.iter().enumerate() {
            if !summary.is_consistent() {
                skipped(&mut diagnostics, index, DiagnosticKind::InconsistentSummary);
                continue;
            }
            if !seen.insert((summary.session_id, summary.subject_id)) {
                skipped(&mut diagnostics, index, DiagnosticKind::DuplicateSummary);
                continue;
            }
            let entry = sums.entry(summary.subject_id).or_insert((0, 0));
            entry.0 += u64::from(summary.percentage);
            entry.1 += 1;
        }

        let value = sums
            .into_iter()
            .map(|(subject, (sum, count))| (subject, mean(sum, count)))
            .collect();

        Report { value, diagnostics }
    }

    /// Summarize raw answer history into one row per attempt, in a single
    /// grouping pass. Rows are ordered by date, then attempt id.
    #[must_use]
    pub fn build_exam_rollup(records: &[HistoryAnswer]) -> Report<Vec<ExamRollupRow>> {
        struct Tally {
            date: NaiveDate,
            exam_type: ExamType,
            subjects: HashSet<SubjectId>,
            // question -> (answered_at, correct)
            answers: HashMap<QuestionId, (Option<chrono::DateTime<chrono::Utc>>, bool)>,
        }

        let mut diagnostics = Vec::new();
        let mut tallies: HashMap<AttemptId, Tally> = HashMap::new();

        for (index, record) in records.iter().enumerate() {
            if record.option_count == 0 {
                skipped(&mut diagnostics, index, DiagnosticKind::NoOptions);
                continue;
            }
            if record.correct_option >= record.option_count {
                skipped(
                    &mut diagnostics,
                    index,
                    DiagnosticKind::CorrectOptionOutOfRange {
                        correct: record.correct_option,
                        options: record.option_count,
                    },
                );
                continue;
            }
            if let Some(selected) = record.selected_option {
                if selected >= record.option_count {
                    skipped(
                        &mut diagnostics,
                        index,
                        DiagnosticKind::SelectionOutOfRange {
                            selected,
                            options: record.option_count,
                        },
                    );
                    continue;
                }
            }

            let date = record.attempt_started_at.date_naive();
            let tally = tallies.entry(record.attempt_id).or_insert_with(|| Tally {
                date,
                exam_type: record.exam_type.clone(),
                subjects: HashSet::new(),
                answers: HashMap::new(),
            });
            if tally.exam_type != record.exam_type {
                let kind = DiagnosticKind::ExamTypeMismatch {
                    expected: tally.exam_type.clone(),
                    found: record.exam_type.clone(),
                };
                skipped(&mut diagnostics, index, kind);
                continue;
            }

            tally.date = tally.date.min(date);
            tally.subjects.insert(record.subject_id);
            let correct = record.selected_option == Some(record.correct_option);
            let keep_existing = tally
                .answers
                .get(&record.question_id)
                .is_some_and(|(at, _)| *at > record.answered_at);
            if !keep_existing {
                tally
                    .answers
                    .insert(record.question_id, (record.answered_at, correct));
            }
        }

        let mut rows: Vec<ExamRollupRow> = tallies
            .into_iter()
            .filter_map(|(attempt_id, tally)| {
                let total = u32::try_from(tally.answers.len()).unwrap_or(u32::MAX);
                let correct = tally.answers.values().filter(|(_, ok)| *ok).count();
                let correct = u32::try_from(correct).unwrap_or(u32::MAX);
                Some(ExamRollupRow {
                    attempt_id,
                    date: tally.date,
                    exam_type: tally.exam_type,
                    distinct_subject_count: tally.subjects.len(),
                    total_questions: total,
                    correct_answers: correct,
                    percentage: percentage(correct, total)?,
                })
            })
            .collect();
        rows.sort_by_key(|row| (row.date, row.attempt_id));

        Report {
            value: rows,
            diagnostics,
        }
    }
}
