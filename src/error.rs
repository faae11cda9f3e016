use thiserror::Error;

use crate::model::InstrumentKind;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document `{path}` does not exist")]
    MissingDocument { path: String },
    #[error("invalid document path `{path}`")]
    InvalidPath { path: String },
    #[error("invalid {field}: {detail}")]
    InvalidInput { field: &'static str, detail: String },
    #[error("answer `{label}` is not on the {kind} scale")]
    UnmappedAnswer { kind: InstrumentKind, label: String },
    #[error("{0}")]
    Survey(#[from] SurveyError),
    #[error("workbook export failed: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Rejections from the survey runner. Messages are shown to the user as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SurveyError {
    #[error("데이터가 없습니다.")]
    NoInstruments,
    #[error("답변을 선택하세요.")]
    Unanswered,
    #[error("'{option}' 은(는) 선택지가 아닙니다.")]
    UnknownOption { option: String },
    #[error("마지막 질문입니다.")]
    LastQuestion,
    #[error("이미 완료한 검사입니다.")]
    AlreadyComplete,
    #[error("모든 질문에 답한 뒤 제출하세요.")]
    Incomplete,
    #[error("사용자 정보가 없습니다.")]
    NoSession,
    #[error("점수가 정해지지 않은 선택지가 있습니다: {options}")]
    UnscoredOptions { options: String },
}

impl AppError {
    pub fn invalid(field: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            detail: detail.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
