use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::Document;

pub const INI_DOC: &str = "ini";
pub const ADMIN_TEAM: &str = "admin";
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    MentalHealth,
    PhysicalHealth,
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 2] = [InstrumentKind::MentalHealth, InstrumentKind::PhysicalHealth];

    pub fn tag(self) -> &'static str {
        match self {
            Self::MentalHealth => "mental_health",
            Self::PhysicalHealth => "physical_health",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "mental_health" => Some(Self::MentalHealth),
            "physical_health" => Some(Self::PhysicalHealth),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::MentalHealth => Self::PhysicalHealth,
            Self::PhysicalHealth => Self::MentalHealth,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::MentalHealth => "정신건강",
            Self::PhysicalHealth => "신체건강",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instrument {
    pub id: String,
    pub name: String,
    pub kind: InstrumentKind,
    pub questions: Vec<Question>,
}

impl Instrument {
    /// Reads an instrument document. Documents without a known `test_type`
    /// are not instruments.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let kind = InstrumentKind::from_tag(value_string(&doc.data, "test_type").as_str())?;
        let questions = doc
            .field("questions")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| Question {
                        question: value_string(item, "question"),
                        options: item
                            .get("options")
                            .and_then(|v| v.as_array())
                            .map(|opts| opts.iter().filter_map(nonempty_string).collect())
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            id: doc.id.clone(),
            name: value_string(&doc.data, "test_name"),
            kind,
            questions,
        })
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Scores for one instrument, keyed by question index as stored.
pub type InstrumentScores = BTreeMap<String, i64>;

/// One date's answer set: instrument id -> question index -> score.
pub type DayAnswers = BTreeMap<String, InstrumentScores>;

pub fn total_score(scores: &InstrumentScores) -> i64 {
    scores.values().sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub rank: String,
    pub team: String,
    pub answers: BTreeMap<String, DayAnswers>,
    /// Remaining profile fields, kept for export.
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn from_document(doc: &Document) -> Self {
        let data = &doc.data;
        let id = nonempty_string_field(data, "id").unwrap_or_else(|| doc.id.clone());
        let mut answers = BTreeMap::new();
        if let Some(days) = data.get("answers").and_then(|v| v.as_object()) {
            for (date, day) in days {
                let Some(day) = day.as_object() else {
                    continue;
                };
                let mut parsed = DayAnswers::new();
                for (instrument_id, scores) in day {
                    let scores = scores
                        .as_object()
                        .map(|scores| {
                            scores
                                .iter()
                                .map(|(index, score)| (index.clone(), value_i64(Some(score))))
                                .collect()
                        })
                        .unwrap_or_default();
                    parsed.insert(instrument_id.clone(), scores);
                }
                answers.insert(date.clone(), parsed);
            }
        }
        let extra = data
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(key, _)| !matches!(key.as_str(), "id" | "name" | "rank" | "team" | "answers"))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id,
            name: value_string(data, "name"),
            rank: value_string(data, "rank"),
            team: value_string(data, "team"),
            answers,
            extra,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.team.trim().eq_ignore_ascii_case(ADMIN_TEAM)
    }

    pub fn answers_on(&self, date: &str) -> Option<&DayAnswers> {
        self.answers.get(date)
    }

    /// Sum of one instrument's scores on `date`; `None` when nothing was
    /// submitted that day.
    pub fn total_on(&self, date: &str, instrument_id: &str) -> Option<i64> {
        let day = self.answers_on(date)?;
        Some(day.get(instrument_id).map(total_score).unwrap_or(0))
    }
}

/// The shared credential document.
#[derive(Debug, Clone, PartialEq)]
pub struct IniDocument {
    pub admin_id: String,
    pub admin_pw: String,
    pub root_id: String,
    pub root_pw: String,
    pub year: Value,
}

impl IniDocument {
    pub fn from_document(doc: &Document) -> Self {
        let data = &doc.data;
        Self {
            admin_id: value_string(data, "adminID"),
            admin_pw: value_string(data, "adminPW"),
            root_id: value_string(data, "rootID"),
            root_pw: value_string(data, "rootPW"),
            year: data.get("year").cloned().unwrap_or(Value::Null),
        }
    }
}

/// Local calendar date in the `YYYY-MM-DD` form used as answer keys.
pub fn today_key() -> String {
    chrono::Local::now().format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(value: &str) -> Option<String> {
    chrono::NaiveDate::parse_from_str(value.trim(), DATE_KEY_FORMAT)
        .ok()
        .map(|date| date.format(DATE_KEY_FORMAT).to_string())
}

pub fn value_string(value: &Value, key: &str) -> String {
    nonempty_string_field(value, key).unwrap_or_default()
}

pub fn nonempty_string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(nonempty_string)
}

pub fn nonempty_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(boolean) => boolean.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn value_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(v) => {
            if let Some(num) = v.as_i64() {
                num
            } else if let Some(num) = v.as_f64() {
                num.round() as i64
            } else if let Some(text) = v.as_str() {
                text.trim().parse::<i64>().unwrap_or(0)
            } else {
                0
            }
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, data: Value) -> Document {
        Document {
            id: id.to_string(),
            path: format!("manage/{id}"),
            data,
        }
    }

    #[test]
    fn reads_instrument_document() {
        let instrument = Instrument::from_document(&doc(
            "test_1",
            json!({
                "test_type": "mental_health",
                "test_name": "정신건강",
                "questions": [
                    { "question": "잠을 잘 못 잤다", "options": ["없음", "2일 이상"] }
                ]
            }),
        ))
        .unwrap();
        assert_eq!(instrument.kind, InstrumentKind::MentalHealth);
        assert_eq!(instrument.len(), 1);
        assert_eq!(instrument.questions[0].options[1], "2일 이상");
        assert!(Instrument::from_document(&doc("ini", json!({ "year": 2024 }))).is_none());
    }

    #[test]
    fn user_totals_are_plain_sums_and_missing_days_are_none() {
        let user = UserRecord::from_document(&doc(
            "A1",
            json!({
                "name": "홍길동",
                "rank": "중사",
                "team": "기체정비공장",
                "pw": "1234",
                "answers": {
                    "2024-05-01": { "test_1": { "0": 3, "1": 3, "2": 3, "3": 3 } }
                }
            }),
        ));
        assert_eq!(user.id, "A1");
        assert_eq!(user.total_on("2024-05-01", "test_1"), Some(12));
        assert_eq!(user.total_on("2024-05-01", "test_2"), Some(0));
        assert_eq!(user.total_on("2024-05-02", "test_1"), None);
        assert!(user.extra.contains_key("pw"));
    }

    #[test]
    fn date_keys_are_normalized_or_rejected() {
        assert_eq!(parse_date_key(" 2024-05-01 ").as_deref(), Some("2024-05-01"));
        assert_eq!(parse_date_key("2024-02-30"), None);
        assert_eq!(today_key().len(), 10);
    }

    #[test]
    fn admin_team_match_ignores_case() {
        let user = UserRecord::from_document(&doc("root", json!({ "team": "Admin" })));
        assert!(user.is_admin());
    }
}
