//! Per-team daily statistics for administrators.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::model::{Instrument, InstrumentKind, UserRecord};
use crate::ordering::{compare_factory_rank_name, compare_rank_name, compare_teams, short_team_name};
use crate::store::{DocumentStore, Query};

/// Ids of the two instruments as they appear inside answer sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentIds {
    pub mental: String,
    pub physical: String,
}

impl InstrumentIds {
    pub fn resolve(store: &DocumentStore, config: &AppConfig) -> AppResult<Self> {
        let mut ids = BTreeMap::new();
        for kind in InstrumentKind::ALL {
            let query = Query::field_eq(config.root_collection.as_str(), "test_type", kind.tag());
            let id = store
                .query(&query)?
                .iter()
                .find_map(Instrument::from_document)
                .map(|instrument| instrument.id);
            if id.is_none() {
                warn!(%kind, "no instrument document; its totals read as zero");
            }
            ids.insert(kind, id.unwrap_or_default());
        }
        Ok(Self {
            mental: ids.remove(&InstrumentKind::MentalHealth).unwrap_or_default(),
            physical: ids.remove(&InstrumentKind::PhysicalHealth).unwrap_or_default(),
        })
    }

    pub fn for_kind(&self, kind: InstrumentKind) -> &str {
        match kind {
            InstrumentKind::MentalHealth => self.mental.as_str(),
            InstrumentKind::PhysicalHealth => self.physical.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub mental: i64,
    pub physical: i64,
}

impl Thresholds {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mental: config.mental_pass_threshold,
            physical: config.physical_pass_threshold,
        }
    }

    fn for_kind(&self, kind: InstrumentKind) -> i64 {
        match kind {
            InstrumentKind::MentalHealth => self.mental,
            InstrumentKind::PhysicalHealth => self.physical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserScore {
    pub id: String,
    pub name: String,
    pub rank: String,
    pub team: String,
    pub mental_total: i64,
    pub physical_total: i64,
}

impl UserScore {
    pub fn total(&self, kind: InstrumentKind) -> i64 {
        match kind {
            InstrumentKind::MentalHealth => self.mental_total,
            InstrumentKind::PhysicalHealth => self.physical_total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingUser {
    pub id: String,
    pub name: String,
    pub rank: String,
    pub team: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamStats {
    pub team: String,
    pub short_name: String,
    pub members: usize,
    pub answered: usize,
    pub mental_pass: usize,
    pub physical_pass: usize,
    pub mental_users: Vec<UserScore>,
    pub physical_users: Vec<UserScore>,
}

impl TeamStats {
    fn new(team: &str) -> Self {
        Self {
            team: team.to_string(),
            short_name: short_team_name(team),
            members: 0,
            answered: 0,
            mental_pass: 0,
            physical_pass: 0,
            mental_users: Vec::new(),
            physical_users: Vec::new(),
        }
    }

    pub fn passing(&self, kind: InstrumentKind) -> &[UserScore] {
        match kind {
            InstrumentKind::MentalHealth => self.mental_users.as_slice(),
            InstrumentKind::PhysicalHealth => self.physical_users.as_slice(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub date: String,
    pub teams: Vec<TeamStats>,
    pub answered: Vec<UserScore>,
    pub missing: Vec<MissingUser>,
}

/// Every user record except the admin team's.
pub fn load_users(store: &DocumentStore, config: &AppConfig) -> AppResult<Vec<UserRecord>> {
    let users: Vec<UserRecord> = store
        .list(config.users_collection().as_str())?
        .iter()
        .map(UserRecord::from_document)
        .filter(|user| !user.is_admin())
        .collect();
    Ok(users)
}

pub fn user_score(user: &UserRecord, date: &str, ids: &InstrumentIds) -> Option<UserScore> {
    user.answers_on(date)?;
    Some(UserScore {
        id: user.id.clone(),
        name: user.name.clone(),
        rank: user.rank.clone(),
        team: user.team.clone(),
        mental_total: user.total_on(date, ids.mental.as_str()).unwrap_or(0),
        physical_total: user.total_on(date, ids.physical.as_str()).unwrap_or(0),
    })
}

pub fn summarize(
    users: &[UserRecord],
    date: &str,
    ids: &InstrumentIds,
    thresholds: Thresholds,
) -> DashboardSummary {
    let mut teams: BTreeMap<String, TeamStats> = BTreeMap::new();
    let mut answered_users: Vec<&UserRecord> = Vec::new();
    let mut missing_users: Vec<&UserRecord> = Vec::new();

    for user in users.iter().filter(|user| !user.is_admin()) {
        let stats = teams
            .entry(user.team.clone())
            .or_insert_with(|| TeamStats::new(user.team.as_str()));
        stats.members += 1;
        let Some(score) = user_score(user, date, ids) else {
            missing_users.push(user);
            continue;
        };
        stats.answered += 1;
        for kind in InstrumentKind::ALL {
            if score.total(kind) >= thresholds.for_kind(kind) {
                match kind {
                    InstrumentKind::MentalHealth => stats.mental_users.push(score.clone()),
                    InstrumentKind::PhysicalHealth => stats.physical_users.push(score.clone()),
                }
            }
        }
        answered_users.push(user);
    }

    let mut teams: Vec<TeamStats> = teams.into_values().collect();
    teams.sort_by(|a, b| compare_teams(a.team.as_str(), b.team.as_str()));
    for stats in teams.iter_mut() {
        stats.mental_pass = stats.mental_users.len();
        stats.physical_pass = stats.physical_users.len();
        sort_scores(&mut stats.mental_users);
        sort_scores(&mut stats.physical_users);
    }

    answered_users.sort_by(|a, b| compare_factory_rank_name(a, b));
    missing_users.sort_by(|a, b| compare_factory_rank_name(a, b));

    DashboardSummary {
        date: date.to_string(),
        teams,
        answered: answered_users
            .into_iter()
            .filter_map(|user| user_score(user, date, ids))
            .collect(),
        missing: missing_users
            .into_iter()
            .map(|user| MissingUser {
                id: user.id.clone(),
                name: user.name.clone(),
                rank: user.rank.clone(),
                team: user.team.clone(),
            })
            .collect(),
    }
}

fn sort_scores(scores: &mut [UserScore]) {
    scores.sort_by(|a, b| {
        crate::ordering::rank_position(a.rank.as_str())
            .cmp(&crate::ordering::rank_position(b.rank.as_str()))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Loads every user and summarizes `date`.
pub fn dashboard_for(
    store: &DocumentStore,
    config: &AppConfig,
    date: &str,
) -> AppResult<DashboardSummary> {
    let users = load_users(store, config)?;
    let ids = InstrumentIds::resolve(store, config)?;
    let summary = summarize(users.as_slice(), date, &ids, Thresholds::from_config(config));
    info!(
        date,
        answered = summary.answered.len(),
        missing = summary.missing.len(),
        "dashboard summarized"
    );
    Ok(summary)
}

/// Qualifying users of one team and category as `"<rank> <name>(<total>)"`,
/// comma separated.
pub fn team_roster(summary: &DashboardSummary, team: &str, kind: InstrumentKind) -> String {
    summary
        .teams
        .iter()
        .find(|stats| stats.team == team || stats.short_name == team)
        .map(|stats| {
            stats
                .passing(kind)
                .iter()
                .map(|score| format!("{} {}({})", score.rank, score.name, score.total(kind)))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

/// Users of `team` sorted for display, used by the export.
pub fn team_members<'a>(users: &'a [UserRecord], team: &str) -> Vec<&'a UserRecord> {
    let mut members: Vec<&UserRecord> = users.iter().filter(|user| user.team == team).collect();
    members.sort_by(|a, b| compare_rank_name(a, b));
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Document;
    use serde_json::{json, Value};

    fn user(id: &str, team: &str, rank: &str, name: &str, answers: Value) -> UserRecord {
        UserRecord::from_document(&Document {
            id: id.to_string(),
            path: format!("manage/meta/users/{id}"),
            data: json!({ "name": name, "rank": rank, "team": team, "answers": answers }),
        })
    }

    fn ids() -> InstrumentIds {
        InstrumentIds {
            mental: "test_1".to_string(),
            physical: "test_2".to_string(),
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds::from_config(&AppConfig::default())
    }

    fn physical(scores: &[i64]) -> Value {
        let map: serde_json::Map<String, Value> = scores
            .iter()
            .enumerate()
            .map(|(i, score)| (i.to_string(), json!(score)))
            .collect();
        Value::Object(map)
    }

    #[test]
    fn pass_counts_use_the_thresholds() {
        let users = vec![
            user(
                "A1",
                "기체정비공장",
                "중사",
                "홍길동",
                json!({ "2024-05-01": {
                    "test_1": { "0": 3, "1": 3, "2": 3, "3": 3 },
                    "test_2": physical(&[5; 14])
                } }),
            ),
            user(
                "A2",
                "기체정비공장",
                "하사",
                "김철수",
                json!({ "2024-05-01": {
                    "test_1": { "0": 2, "1": 2, "2": 2, "3": 3 },
                    "test_2": physical(&[4; 19])
                } }),
            ),
        ];
        let summary = summarize(&users, "2024-05-01", &ids(), thresholds());
        let team = &summary.teams[0];
        assert_eq!(team.members, 2);
        assert_eq!(team.answered, 2);
        assert_eq!(team.mental_pass, 1);
        assert_eq!(team.physical_pass, 1);
        assert_eq!(team.mental_users[0].mental_total, 12);
        assert_eq!(team.physical_users[0].id, "A2");
        assert_eq!(summary.answered.len(), 2);
        assert!(summary.missing.is_empty());
    }

    #[test]
    fn physical_total_of_seventy_does_not_pass() {
        let users = vec![user(
            "A1",
            "부품정비공장",
            "중사",
            "홍길동",
            json!({ "2024-05-01": { "test_2": physical(&[5; 14]) } }),
        )];
        let summary = summarize(&users, "2024-05-01", &ids(), thresholds());
        assert_eq!(summary.teams[0].physical_pass, 0);
        assert_eq!(summary.answered[0].physical_total, 70);
    }

    #[test]
    fn missing_means_no_answer_set_for_the_date() {
        let users = vec![
            user("B1", "부품정비공장", "하사", "나", json!({ "2024-04-30": { "test_1": { "0": 3 } } })),
            user("B2", "기체정비공장", "하사", "다", json!({})),
            user("B3", "기체정비공장", "중사", "라", json!({ "2024-05-01": {} })),
            user("B4", "기체정비공장", "하사", "가", json!({})),
            user("root", "ADMIN", "", "관리자", json!({})),
        ];
        let summary = summarize(&users, "2024-05-01", &ids(), thresholds());
        let missing: Vec<&str> = summary.missing.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(missing, vec!["B4", "B2", "B1"]);
        assert_eq!(summary.answered.len(), 1);
        assert_eq!(summary.answered[0].mental_total, 0);
        assert!(summary.teams.iter().all(|team| team.team != "ADMIN"));
    }

    #[test]
    fn roster_lists_rank_name_and_total() {
        let users = vec![
            user("A1", "기체정비공장", "하사", "김철수", json!({ "d": { "test_1": { "0": 11 } } })),
            user("A2", "기체정비공장", "중사", "홍길동", json!({ "d": { "test_1": { "0": 12 } } })),
            user("A3", "기체정비공장", "중사", "이영희", json!({ "d": { "test_1": { "0": 1 } } })),
        ];
        let summary = summarize(&users, "d", &ids(), thresholds());
        assert_eq!(
            team_roster(&summary, "기체", InstrumentKind::MentalHealth),
            "중사 홍길동(12), 하사 김철수(11)"
        );
        assert_eq!(team_roster(&summary, "기체정비공장", InstrumentKind::PhysicalHealth), "");
        assert_eq!(team_roster(&summary, "없는팀", InstrumentKind::MentalHealth), "");
    }

    #[test]
    fn loads_users_and_instrument_ids_from_the_store() {
        let store = DocumentStore::in_memory();
        let config = AppConfig::default();
        store
            .set("manage/mh", json!({ "test_type": "mental_health", "questions": [] }))
            .unwrap();
        store
            .set("manage/meta/users/A1", json!({ "team": "기체정비공장", "answers": { "2024-05-01": { "mh": { "0": 10 } } } }))
            .unwrap();
        store
            .set("manage/meta/users/admin", json!({ "team": "admin" }))
            .unwrap();
        let summary = dashboard_for(&store, &config, "2024-05-01").unwrap();
        assert_eq!(summary.teams.len(), 1);
        assert_eq!(summary.teams[0].mental_pass, 1);
    }
}
