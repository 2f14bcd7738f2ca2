// src/models/question.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use uuid::Uuid;
use validator::Validate;

/// Question kind. Objective kinds are scored deterministically at submit
/// time; the rest wait for a human (or an automatic pass, when enabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "question_kind", rename_all = "snake_case")]
pub enum QuestionKind {
    Mcq,
    Msq,
    TrueFalse,
    FillBlank,
    Numeric,
    DescriptiveShort,
    DescriptiveLong,
    Coding,
    FileUpload,
}

impl QuestionKind {
    pub fn is_objective(self) -> bool {
        matches!(
            self,
            QuestionKind::Mcq
                | QuestionKind::Msq
                | QuestionKind::TrueFalse
                | QuestionKind::FillBlank
                | QuestionKind::Numeric
        )
    }
}

/// Answer configuration attached to a question, one variant per kind.
/// Stored as tagged JSON so the grading engine gets exhaustive coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerKey {
    SingleChoice {
        correct: String,
    },
    MultiChoice {
        correct: Vec<String>,
    },
    TrueFalse {
        correct: bool,
    },
    /// Any of `accepted` matches, compared case-insensitively after trim.
    FillBlank {
        accepted: Vec<String>,
    },
    Numeric {
        value: f64,
        #[serde(default)]
        tolerance: f64,
    },
    /// Descriptive/coding/file kinds carry no key; grading is manual.
    Manual,
}

/// A student's answer, one variant per payload shape. Validated against the
/// question kind at the autosave boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerPayload {
    SingleChoice { selected: String },
    MultiChoice { selected: Vec<String> },
    TrueFalse { value: bool },
    Numeric { value: f64 },
    Text { content: String },
    FileRefs { paths: Vec<String> },
}

impl AnswerPayload {
    /// Whether this payload shape is acceptable for a question kind.
    pub fn matches_kind(&self, kind: QuestionKind) -> bool {
        matches!(
            (kind, self),
            (QuestionKind::Mcq, AnswerPayload::SingleChoice { .. })
                | (QuestionKind::Msq, AnswerPayload::MultiChoice { .. })
                | (QuestionKind::TrueFalse, AnswerPayload::TrueFalse { .. })
                | (QuestionKind::FillBlank, AnswerPayload::Text { .. })
                | (QuestionKind::Numeric, AnswerPayload::Numeric { .. })
                | (QuestionKind::DescriptiveShort, AnswerPayload::Text { .. })
                | (QuestionKind::DescriptiveLong, AnswerPayload::Text { .. })
                | (QuestionKind::Coding, AnswerPayload::Text { .. })
                | (QuestionKind::FileUpload, AnswerPayload::FileRefs { .. })
        )
    }
}

/// Represents the 'exam_questions' table: a question attached to an exam
/// with its position and mark allocation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamQuestion {
    pub id: i64,
    pub exam_id: Uuid,

    /// Order within the exam.
    pub order_index: i64,
    pub marks: f64,
    pub is_mandatory: bool,

    pub kind: QuestionKind,
    pub question_text: String,

    /// Correct-answer configuration; `Manual` for human-graded kinds.
    pub answer_key: Json<AnswerKey>,

    pub created_at: Option<DateTime<Utc>>,
}

/// DTO for a question as served to a student taking the exam.
/// Excludes the answer key.
#[derive(Debug, Serialize, FromRow)]
pub struct StudentQuestion {
    pub id: i64,
    pub order_index: i64,
    pub marks: f64,
    pub is_mandatory: bool,
    pub kind: QuestionKind,
    pub question_text: String,
}

/// DTO for attaching a question to a draft exam.
#[derive(Debug, Deserialize, Validate)]
pub struct AttachQuestionRequest {
    #[validate(range(min = 0))]
    pub order_index: i64,
    #[validate(range(exclusive_min = 0.0))]
    pub marks: f64,
    pub is_mandatory: Option<bool>,
    pub kind: QuestionKind,
    #[validate(length(min = 1, max = 10000))]
    pub question_text: String,
    pub answer_key: AnswerKey,
}

impl AttachQuestionRequest {
    /// Objective kinds must carry the matching key variant; manual kinds
    /// must not carry an objective key. Unknown combinations fail closed.
    pub fn key_matches_kind(&self) -> bool {
        matches!(
            (self.kind, &self.answer_key),
            (QuestionKind::Mcq, AnswerKey::SingleChoice { .. })
                | (QuestionKind::Msq, AnswerKey::MultiChoice { .. })
                | (QuestionKind::TrueFalse, AnswerKey::TrueFalse { .. })
                | (QuestionKind::FillBlank, AnswerKey::FillBlank { .. })
                | (QuestionKind::Numeric, AnswerKey::Numeric { .. })
                | (QuestionKind::DescriptiveShort, AnswerKey::Manual)
                | (QuestionKind::DescriptiveLong, AnswerKey::Manual)
                | (QuestionKind::Coding, AnswerKey::Manual)
                | (QuestionKind::FileUpload, AnswerKey::Manual)
        )
    }
}
