//! Fixed display order for factories and ranks.
//!
//! Unlisted factories and ranks sort after every listed one; ties fall through
//! to the name so the order is total.

use std::cmp::Ordering;

use crate::model::UserRecord;

pub const FACTORY_ORDER: [&str; 6] = [
    "기체정비공장",
    "엔진정비공장",
    "부품정비공장",
    "전자정비공장",
    "장비정비공장",
    "정비지원과",
];

pub const RANK_ORDER: [&str; 17] = [
    "대령", "중령", "소령", "대위", "중위", "소위", "준위", "원사", "상사", "중사", "하사", "병장",
    "상병", "일병", "이병", "군무원", "근로자",
];

const FACTORY_SUFFIX: &str = "정비공장";

pub fn factory_position(team: &str) -> usize {
    position(&FACTORY_ORDER, team)
}

pub fn rank_position(rank: &str) -> usize {
    position(&RANK_ORDER, rank)
}

fn position(table: &[&str], value: &str) -> usize {
    let value = value.trim();
    table
        .iter()
        .position(|entry| *entry == value)
        .unwrap_or(table.len())
}

/// Rank table first, then name.
pub fn compare_rank_name(a: &UserRecord, b: &UserRecord) -> Ordering {
    rank_position(a.rank.as_str())
        .cmp(&rank_position(b.rank.as_str()))
        .then_with(|| a.rank.cmp(&b.rank))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

/// Factory table, then rank table, then name.
pub fn compare_factory_rank_name(a: &UserRecord, b: &UserRecord) -> Ordering {
    compare_teams(a.team.as_str(), b.team.as_str()).then_with(|| compare_rank_name(a, b))
}

pub fn compare_teams(a: &str, b: &str) -> Ordering {
    factory_position(a)
        .cmp(&factory_position(b))
        .then_with(|| a.cmp(b))
}

/// Short team label used for sheet names: "기체정비공장" becomes "기체".
pub fn short_team_name(team: &str) -> String {
    let team = team.trim();
    match team.strip_suffix(FACTORY_SUFFIX) {
        Some(short) if !short.trim().is_empty() => short.trim().to_string(),
        _ => team.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Map;
    use std::collections::BTreeMap;

    fn user(id: &str, team: &str, rank: &str, name: &str) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            name: name.to_string(),
            rank: rank.to_string(),
            team: team.to_string(),
            answers: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    #[test]
    fn factory_then_rank_then_name() {
        let mut users = vec![
            user("1", "부품정비공장", "대령", "가"),
            user("2", "기체정비공장", "하사", "나"),
            user("3", "기체정비공장", "중사", "다"),
            user("4", "기체정비공장", "중사", "가"),
            user("5", "미등록부서", "대령", "가"),
        ];
        users.sort_by(compare_factory_rank_name);
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "3", "2", "1", "5"]);
    }

    #[test]
    fn short_names_strip_the_factory_suffix() {
        assert_eq!(short_team_name("기체정비공장"), "기체");
        assert_eq!(short_team_name("정비지원과"), "정비지원과");
        assert_eq!(short_team_name("정비공장"), "정비공장");
    }

    fn arb_user() -> impl Strategy<Value = UserRecord> {
        let teams = prop::sample::select(vec!["기체정비공장", "부품정비공장", "기타", ""]);
        let ranks = prop::sample::select(vec!["대령", "중사", "하사", "일병", "미상"]);
        (teams, ranks, "[가-하]{1,3}", "[a-z0-9]{1,4}")
            .prop_map(|(team, rank, name, id)| user(id.as_str(), team, rank, name.as_str()))
    }

    proptest! {
        #[test]
        fn ordering_is_total_and_consistent(a in arb_user(), b in arb_user(), c in arb_user()) {
            let ab = compare_factory_rank_name(&a, &b);
            prop_assert_eq!(ab, compare_factory_rank_name(&b, &a).reverse());
            if ab != Ordering::Greater && compare_factory_rank_name(&b, &c) != Ordering::Greater {
                prop_assert_ne!(compare_factory_rank_name(&a, &c), Ordering::Greater);
            }
            if ab == Ordering::Equal {
                prop_assert_eq!(&a, &b);
            }
        }
    }
}
