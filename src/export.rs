//! Team workbook export.
//!
//! Users are flattened into rows (profile fields, daily totals, then one
//! column per question), grouped into one sheet per team and written as an
//! xlsx workbook. Building the plan is kept apart from writing the file so
//! the layout can be checked without reading the workbook back.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::AppConfig;
use crate::dashboard::{load_users, team_members, InstrumentIds};
use crate::error::AppResult;
use crate::model::{nonempty_string, UserRecord};
use crate::ordering::{compare_teams, short_team_name};
use crate::store::DocumentStore;

const MAX_SHEET_NAME: usize = 31;
const UNASSIGNED_TEAM: &str = "미지정";
const NUMBER_COLUMN: (&str, f64) = ("번호", 6.0);
const QUESTION_WIDTH: f64 = 6.0;
const EXTRA_WIDTH: f64 = 12.0;

/// Field key, display label, column width.
const FIELD_LABELS: [(&str, &str, f64); 6] = [
    ("rank", "계급", 10.0),
    ("name", "성명", 12.0),
    ("id", "아이디", 14.0),
    ("status", "제출", 8.0),
    ("mental_total", "정신건강", 10.0),
    ("physical_total", "신체건강", 10.0),
];

const SUBMITTED: &str = "제출";
const NOT_SUBMITTED: &str = "미제출";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(i64),
    Text(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub label: String,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetPlan {
    pub name: String,
    pub title: String,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkbookPlan {
    pub file_name: String,
    pub sheets: Vec<SheetPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResult {
    pub file_name: String,
    pub path: String,
    pub sheets: Vec<String>,
    pub rows: usize,
}

pub fn export_file_name(date: &str) -> String {
    format!("report_{date}.xlsx")
}

pub fn is_password_like(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "pw" || key.ends_with("pw") || key.contains("pass") || key.contains("secret")
}

/// Keys filled from the user record and the day's answers. Profile fields
/// with these names are not exported.
fn is_computed_key(key: &str) -> bool {
    key == "team"
        || FIELD_LABELS.iter().any(|(field, _, _)| *field == key)
        || ["mental_q", "physical_q"]
            .iter()
            .any(|prefix| key.starts_with(prefix))
}

/// One user's fields for `date`, keyed by field name. Password-like fields,
/// fields shadowing computed columns and nested values are left out.
pub fn flatten_user(
    user: &UserRecord,
    date: &str,
    ids: &InstrumentIds,
) -> BTreeMap<String, CellValue> {
    let mut row = BTreeMap::new();
    for (key, value) in &user.extra {
        if is_password_like(key.as_str()) || is_computed_key(key.as_str()) {
            continue;
        }
        if let Some(cell) = scalar_cell(value) {
            row.insert(key.clone(), cell);
        }
    }
    row.insert("id".to_string(), CellValue::Text(user.id.clone()));
    row.insert("name".to_string(), CellValue::Text(user.name.clone()));
    row.insert("rank".to_string(), CellValue::Text(user.rank.clone()));
    row.insert("team".to_string(), CellValue::Text(user.team.clone()));

    let Some(day) = user.answers_on(date) else {
        row.insert("status".to_string(), CellValue::Text(NOT_SUBMITTED.to_string()));
        return row;
    };
    row.insert("status".to_string(), CellValue::Text(SUBMITTED.to_string()));
    for (prefix, id) in [("mental", ids.mental.as_str()), ("physical", ids.physical.as_str())] {
        let scores = day.get(id);
        let total = user.total_on(date, id).unwrap_or(0);
        row.insert(format!("{prefix}_total"), CellValue::Number(total));
        for (index, score) in scores.into_iter().flatten() {
            if let Ok(index) = index.parse::<usize>() {
                row.insert(question_key(prefix, index), CellValue::Number(*score));
            }
        }
    }
    row
}

fn question_key(prefix: &str, index: usize) -> String {
    format!("{prefix}_q{index:03}")
}

fn scalar_cell(value: &Value) -> Option<CellValue> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(CellValue::Number)
            .or_else(|| Some(CellValue::Text(number.to_string()))),
        Value::String(_) | Value::Bool(_) => nonempty_string(value).map(CellValue::Text),
        _ => None,
    }
}

pub fn plan_workbook(users: &[UserRecord], ids: &InstrumentIds, date: &str) -> WorkbookPlan {
    let users: Vec<UserRecord> = users
        .iter()
        .filter(|user| !user.is_admin())
        .cloned()
        .collect();
    let mut teams: Vec<String> = users
        .iter()
        .map(|user| user.team.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    teams.sort_by(|a, b| compare_teams(a.as_str(), b.as_str()));

    let mut used_names = BTreeSet::new();
    let sheets = teams
        .iter()
        .map(|team| {
            let members = team_members(users.as_slice(), team.as_str());
            let flattened: Vec<BTreeMap<String, CellValue>> = members
                .iter()
                .map(|user| flatten_user(user, date, ids))
                .collect();
            let display = if team.trim().is_empty() {
                UNASSIGNED_TEAM.to_string()
            } else {
                short_team_name(team.as_str())
            };
            let name = unique_sheet_name(display.as_str(), &mut used_names);
            plan_sheet(name, display.as_str(), date, flattened.as_slice())
        })
        .collect();
    WorkbookPlan {
        file_name: export_file_name(date),
        sheets,
    }
}

fn plan_sheet(
    name: String,
    display: &str,
    date: &str,
    flattened: &[BTreeMap<String, CellValue>],
) -> SheetPlan {
    let mut keys: Vec<(String, String, f64)> = FIELD_LABELS
        .iter()
        .map(|(key, label, width)| (key.to_string(), label.to_string(), *width))
        .collect();

    let present: BTreeSet<&String> = flattened.iter().flat_map(|row| row.keys()).collect();
    for (prefix, label) in [("mental", "정신"), ("physical", "신체")] {
        let mut indexes: Vec<usize> = present
            .iter()
            .filter_map(|key| key.strip_prefix(prefix)?.strip_prefix("_q")?.parse().ok())
            .collect();
        indexes.sort_unstable();
        for index in indexes {
            keys.push((
                question_key(prefix, index),
                format!("{label}{}", index + 1),
                QUESTION_WIDTH,
            ));
        }
    }
    let known: BTreeSet<String> = keys.iter().map(|(key, _, _)| key.clone()).collect();
    for key in present {
        if key == "team" || known.contains(key.as_str()) {
            continue;
        }
        keys.push((key.clone(), key.clone(), EXTRA_WIDTH));
    }

    let mut columns = vec![ColumnSpec {
        label: NUMBER_COLUMN.0.to_string(),
        width: NUMBER_COLUMN.1,
    }];
    columns.extend(keys.iter().map(|(_, label, width)| ColumnSpec {
        label: label.clone(),
        width: *width,
    }));

    let rows = flattened
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let mut cells = vec![CellValue::Number(index as i64 + 1)];
            cells.extend(
                keys.iter()
                    .map(|(key, _, _)| row.get(key).cloned().unwrap_or(CellValue::Empty)),
            );
            cells
        })
        .collect();

    SheetPlan {
        name,
        title: format!("{display} 건강 체크리스트 ({date})"),
        columns,
        rows,
    }
}

fn unique_sheet_name(display: &str, used: &mut BTreeSet<String>) -> String {
    let base: String = display
        .chars()
        .filter(|ch| !matches!(ch, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(MAX_SHEET_NAME)
        .collect();
    let base = if base.trim().is_empty() {
        UNASSIGNED_TEAM.to_string()
    } else {
        base
    };
    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(candidate.to_lowercase().as_str()) {
        let suffix = format!(" ({n})");
        let keep = MAX_SHEET_NAME.saturating_sub(suffix.chars().count());
        candidate = format!("{}{suffix}", base.chars().take(keep).collect::<String>());
        n += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}

fn build_workbook(plan: &WorkbookPlan) -> AppResult<Workbook> {
    let mut workbook = Workbook::new();
    let title_format = Format::new()
        .set_bold()
        .set_font_size(14)
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter);
    let header_format = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin)
        .set_background_color(Color::RGB(0xD9E1F2));
    let cell_format = Format::new()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);

    for sheet in &plan.sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet.name.as_str())?;
        let last_col = sheet.columns.len().saturating_sub(1) as u16;
        if last_col > 0 {
            worksheet.merge_range(0, 0, 0, last_col, sheet.title.as_str(), &title_format)?;
        } else {
            worksheet.write_string_with_format(0, 0, sheet.title.as_str(), &title_format)?;
        }
        worksheet.set_row_height(0, 30)?;
        for (col, column) in sheet.columns.iter().enumerate() {
            let col = col as u16;
            worksheet.set_column_width(col, column.width)?;
            worksheet.write_string_with_format(1, col, column.label.as_str(), &header_format)?;
        }
        for (row_index, row) in sheet.rows.iter().enumerate() {
            let row_num = (row_index + 2) as u32;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    CellValue::Number(number) => {
                        worksheet.write_number_with_format(row_num, col, *number as f64, &cell_format)?;
                    }
                    CellValue::Text(text) => {
                        worksheet.write_string_with_format(row_num, col, text.as_str(), &cell_format)?;
                    }
                    CellValue::Empty => {
                        worksheet.write_blank(row_num, col, &cell_format)?;
                    }
                }
            }
        }
    }
    Ok(workbook)
}

pub fn workbook_bytes(plan: &WorkbookPlan) -> AppResult<Vec<u8>> {
    let mut workbook = build_workbook(plan)?;
    Ok(workbook.save_to_buffer()?)
}

pub fn write_workbook(plan: &WorkbookPlan, path: &Path) -> AppResult<()> {
    let mut workbook = build_workbook(plan)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    workbook.save(path)?;
    Ok(())
}

/// Exports `date` for every non-admin user to `destination`.
pub fn export_report(
    store: &DocumentStore,
    config: &AppConfig,
    date: &str,
    destination: &Path,
) -> AppResult<ExportResult> {
    let users = load_users(store, config)?;
    let ids = InstrumentIds::resolve(store, config)?;
    let plan = plan_workbook(users.as_slice(), &ids, date);
    write_workbook(&plan, destination)?;
    let rows = plan.sheets.iter().map(|sheet| sheet.rows.len()).sum();
    info!(date, path = %destination.display(), sheets = plan.sheets.len(), rows, "workbook exported");
    Ok(ExportResult {
        file_name: plan.file_name.clone(),
        path: PathBuf::from(destination).to_string_lossy().to_string(),
        sheets: plan.sheets.iter().map(|sheet| sheet.name.clone()).collect(),
        rows,
    })
}
