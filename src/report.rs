//! Report cards: stored records, the printable layout, and the writer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::model::{value_string, INI_DOC};
use crate::store::DocumentStore;

const MAX_FIELD_LEN: usize = 4_000;
const INDICATOR_COUNT: usize = 3;

const PRINT_STYLE: &str = "body { background: #fff; padding: 0mm; height: 100% !important; }\n\
table { height: calc(297mm - 20mm) !important; }\n\
section { page-break-after: always; }\n\
section:last-child { page-break-after: auto; }\n\
.controls { display: none; }";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "CHECKNUM")]
    pub check_num: String,
    #[serde(rename = "LEADER")]
    pub leader: String,
    #[serde(rename = "TITLE")]
    pub title: String,
    #[serde(rename = "STARTCOMPYEAR")]
    pub start_comp_year: String,
    #[serde(rename = "STARTCOMPRESULT")]
    pub start_comp_result: String,
    #[serde(rename = "ENDCOMPYEAR")]
    pub end_comp_year: String,
    #[serde(rename = "ENDCOMPRESULT")]
    pub end_comp_result: String,
    #[serde(rename = "STARTYEAR")]
    pub start_year: String,
    #[serde(rename = "STARTRESULT")]
    pub start_result: String,
    #[serde(rename = "ENDYEAR")]
    pub end_year: String,
    #[serde(rename = "ENDRESULT")]
    pub end_result: String,
    /// Financial result in millions of won, digits only.
    #[serde(rename = "RESULT")]
    pub result: String,
    #[serde(rename = "INDI")]
    pub indi: String,
    #[serde(rename = "UNIT")]
    pub unit: String,
    #[serde(rename = "DATAY0")]
    pub datay0: String,
    #[serde(rename = "DATAY1")]
    pub datay1: String,
    #[serde(rename = "DATAY2")]
    pub datay2: String,
    #[serde(rename = "DATAY3")]
    pub datay3: String,
    #[serde(rename = "DATAY4")]
    pub datay4: String,
    #[serde(rename = "DATAY5")]
    pub datay5: String,
    #[serde(rename = "BEFORE")]
    pub before: String,
    #[serde(rename = "AFTER")]
    pub after: String,
    #[serde(rename = "OTHER")]
    pub other: String,
}

impl ReportRecord {
    /// Reads a stored record; numbers and booleans are taken as text.
    pub fn from_value(data: &Value) -> Self {
        Self {
            id: value_string(data, "ID"),
            check_num: value_string(data, "CHECKNUM"),
            leader: value_string(data, "LEADER"),
            title: value_string(data, "TITLE"),
            start_comp_year: value_string(data, "STARTCOMPYEAR"),
            start_comp_result: value_string(data, "STARTCOMPRESULT"),
            end_comp_year: value_string(data, "ENDCOMPYEAR"),
            end_comp_result: value_string(data, "ENDCOMPRESULT"),
            start_year: value_string(data, "STARTYEAR"),
            start_result: value_string(data, "STARTRESULT"),
            end_year: value_string(data, "ENDYEAR"),
            end_result: value_string(data, "ENDRESULT"),
            result: value_string(data, "RESULT"),
            indi: value_string(data, "INDI"),
            unit: value_string(data, "UNIT"),
            datay0: value_string(data, "DATAY0"),
            datay1: value_string(data, "DATAY1"),
            datay2: value_string(data, "DATAY2"),
            datay3: value_string(data, "DATAY3"),
            datay4: value_string(data, "DATAY4"),
            datay5: value_string(data, "DATAY5"),
            before: value_string(data, "BEFORE"),
            after: value_string(data, "AFTER"),
            other: value_string(data, "OTHER"),
        }
    }

    pub fn indicators(&self) -> Vec<String> {
        split_lines(self.indi.as_str())
    }

    pub fn units(&self) -> Vec<String> {
        split_lines(self.unit.as_str())
    }

    pub fn values(&self) -> Vec<String> {
        split_lines(self.datay0.as_str())
    }

    fn normalized(mut self) -> Self {
        self.result = self.result.chars().filter(|ch| ch.is_ascii_digit()).collect();
        for field in [
            &mut self.id,
            &mut self.check_num,
            &mut self.leader,
            &mut self.title,
            &mut self.start_comp_year,
            &mut self.start_comp_result,
            &mut self.end_comp_year,
            &mut self.end_comp_result,
            &mut self.start_year,
            &mut self.start_result,
            &mut self.end_year,
            &mut self.end_result,
            &mut self.datay1,
            &mut self.datay2,
            &mut self.datay3,
            &mut self.datay4,
            &mut self.datay5,
        ] {
            *field = clamp_text(field.as_str(), true);
        }
        for field in [
            &mut self.indi,
            &mut self.unit,
            &mut self.datay0,
            &mut self.before,
            &mut self.after,
            &mut self.other,
        ] {
            *field = clamp_text(field.replace("\r\n", "\n").as_str(), false);
        }
        self
    }
}

/// Drops control characters except newlines and caps the length.
fn clamp_text(value: &str, single_line: bool) -> String {
    let value = if single_line { value.trim() } else { value };
    value
        .chars()
        .filter(|ch| {
            let code = *ch as u32;
            (code >= 32 && code != 127) || (*ch == '\n' && !single_line)
        })
        .take(MAX_FIELD_LEN)
        .collect()
}

/// Newline-delimited list; an empty field is an empty list.
pub fn split_lines(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split('\n').map(|line| line.to_string()).collect()
}

/// Groups the leading integer part in threes: "1234567.5" becomes "1,234,567.5".
pub fn thousands(value: &str) -> String {
    let (sign, rest) = match value.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", value),
    };
    let split = rest
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, tail) = rest.split_at(split);
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}{tail}")
}

fn check_reference(reference: &str) -> AppResult<&str> {
    let reference = reference.trim();
    if reference.is_empty() || reference.contains('/') || reference == INI_DOC {
        return Err(AppError::invalid("reference", reference));
    }
    Ok(reference)
}

pub fn get_report(store: &DocumentStore, config: &AppConfig, reference: &str) -> AppResult<ReportRecord> {
    let path = config.record_path(check_reference(reference)?);
    match store.get(path.as_str())? {
        Some(doc) => Ok(ReportRecord::from_value(&doc.data)),
        None => {
            warn!(path = %path, "report record not found");
            Err(AppError::MissingDocument { path })
        }
    }
}

/// Creates or updates the record at `reference`. Fields not carried by a
/// report card are left as they are.
pub fn write_report(
    store: &DocumentStore,
    config: &AppConfig,
    reference: &str,
    record: ReportRecord,
) -> AppResult<ReportRecord> {
    let path = config.record_path(check_reference(reference)?);
    let record = record.normalized();
    store.set_merge(path.as_str(), serde_json::to_value(&record)?)?;
    info!(path = %path, "report record written");
    Ok(record)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    /// "■" for a field, "○" for a sub-field.
    pub marker: &'static str,
    pub label: String,
    pub value: String,
    /// Columns spanned out of four.
    pub span: u8,
    pub tall: bool,
}

impl Cell {
    fn field(label: impl Into<String>, value: impl Into<String>, span: u8) -> Self {
        Self {
            marker: "■",
            label: label.into(),
            value: value.into(),
            span,
            tall: false,
        }
    }

    fn sub(label: &str, value: impl Into<String>, span: u8) -> Self {
        Self {
            marker: "○",
            label: label.to_string(),
            value: value.into(),
            span,
            tall: false,
        }
    }

    fn text(label: &str, value: &str) -> Self {
        Self {
            tall: true,
            ..Self::field(label, value, 4)
        }
    }
}

/// A bordered group of rows; groups are separated by a spacer.
pub type Section = Vec<Vec<Cell>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub title: String,
    pub sections: Vec<Section>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedReport {
    pub layout: Layout,
    pub pages: Vec<Page>,
}

pub fn render(record: &ReportRecord, layout: Layout) -> RenderedReport {
    let header = vec![
        vec![Cell::field("관리번호", record.id.as_str(), 4)],
        vec![Cell::field("확인번호", record.check_num.as_str(), 4)],
        vec![Cell::field("팀장", record.leader.as_str(), 4)],
    ];

    let evaluations = [
        ("1차완료", &record.start_comp_year, &record.start_comp_result),
        ("2차완료", &record.end_comp_year, &record.end_comp_result),
        ("1차 성과", &record.start_year, &record.start_result),
        ("2차 성과", &record.end_year, &record.end_result),
    ];
    let mut evaluation = Vec::new();
    for (stage, year, result) in evaluations {
        let year = Cell::field(format!("{stage} 평가연도"), year.as_str(), 2);
        let result = Cell::field(format!("{stage} 평가결과"), result.as_str(), 2);
        match layout {
            Layout::Desktop => evaluation.push(vec![year, result]),
            Layout::Mobile => {
                evaluation.push(vec![Cell { span: 4, ..year }]);
                evaluation.push(vec![Cell { span: 4, ..result }]);
            }
        }
    }

    let indicators = record.indicators();
    let units = record.units();
    let values = record.values();
    let nth = |list: &[String], index: usize| list.get(index).cloned().unwrap_or_default();
    let mut performance = vec![vec![Cell::field(
        "재무성과(백만원)",
        thousands(record.result.as_str()),
        4,
    )]];
    for index in 0..INDICATOR_COUNT {
        let label = format!("관리지표 {}", index + 1);
        let indicator = nth(indicators.as_slice(), index);
        let unit = nth(units.as_slice(), index);
        let value = nth(values.as_slice(), index);
        match layout {
            Layout::Desktop => performance.push(vec![
                Cell::field(label, indicator, 2),
                Cell::sub("단위", unit, 1),
                Cell::sub("수치", value, 1),
            ]),
            Layout::Mobile => {
                performance.push(vec![Cell::field(label, indicator, 4)]);
                performance.push(vec![Cell::sub("단위", unit, 2), Cell::sub("수치", value, 2)]);
            }
        }
    }

    let mut sections = vec![
        header,
        evaluation,
        performance,
        vec![vec![Cell::text("개선 전 주요내용", record.before.as_str())]],
        vec![vec![Cell::text("개선 후 주요내용", record.after.as_str())]],
    ];
    let other = vec![vec![Cell::text("기타내용", record.other.as_str())]];
    let has_other = !record.other.is_empty();

    let pages = match layout {
        Layout::Mobile => {
            if has_other {
                sections.push(other);
            }
            vec![Page {
                title: record.title.clone(),
                sections,
                footer: None,
            }]
        }
        Layout::Desktop if has_other => vec![
            Page {
                title: record.title.clone(),
                sections,
                footer: Some("1 / 2".to_string()),
            },
            Page {
                title: record.title.clone(),
                sections: vec![other],
                footer: Some("2 / 2".to_string()),
            },
        ],
        Layout::Desktop => vec![Page {
            title: record.title.clone(),
            sections,
            footer: Some("1 / 1".to_string()),
        }],
    };
    RenderedReport { layout, pages }
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("<br>"),
            _ => out.push(ch),
        }
    }
    out
}

/// Markup for the report pages, one `<section>` per page.
pub fn render_html(report: &RenderedReport) -> String {
    let gutter = match report.layout {
        Layout::Desktop => "24px",
        Layout::Mobile => "16px",
    };
    let mut html = String::new();
    for page in &report.pages {
        html.push_str("<section><table class=\"report\">");
        html.push_str(&format!(
            "<colgroup><col width=\"{gutter}\"><col><col><col><col><col width=\"{gutter}\"></colgroup>"
        ));
        html.push_str(&format!(
            "<thead><tr><th colspan=\"6\">{}</th></tr></thead><tbody>",
            escape_html(page.title.as_str())
        ));
        for (index, section) in page.sections.iter().enumerate() {
            if index > 0 {
                html.push_str("<tr><td class=\"spacer\" colspan=\"6\"></td></tr>");
            }
            for row in section {
                html.push_str("<tr><td></td>");
                for cell in row {
                    let class = if cell.tall { "cell tall" } else { "cell" };
                    html.push_str(&format!(
                        "<td class=\"{class}\" colspan=\"{}\">{} {}&nbsp;:&nbsp;{}</td>",
                        cell.span,
                        cell.marker,
                        escape_html(cell.label.as_str()),
                        escape_html(cell.value.as_str())
                    ));
                }
                html.push_str("<td></td></tr>");
            }
        }
        let footer = page.footer.as_deref().unwrap_or_default();
        html.push_str(&format!(
            "<tr><th></th><th class=\"page-num\" colspan=\"4\">{footer}</th><th></th></tr>"
        ));
        html.push_str("</tbody></table></section>");
    }
    html
}

/// The rendered pages wrapped with the print-only style block.
pub fn print_document(report: &RenderedReport) -> String {
    format!(
        "<style media=\"print\">\n{PRINT_STYLE}\n</style>\n{}",
        render_html(report)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ReportRecord {
        ReportRecord::from_value(&json!({
            "ID": "M-01",
            "CHECKNUM": 7,
            "LEADER": "홍길동",
            "TITLE": "개선 과제",
            "RESULT": "1234567",
            "INDI": "불량률\n가동률\n정비시간",
            "UNIT": "%\n%\n시간",
            "DATAY0": "3\n95\n12",
            "BEFORE": "수작업 <점검>",
            "AFTER": "자동화",
        }))
    }

    #[test]
    fn thousands_groups_the_integer_part() {
        assert_eq!(thousands("1234567"), "1,234,567");
        assert_eq!(thousands("123"), "123");
        assert_eq!(thousands("-1000.25"), "-1,000.25");
        assert_eq!(thousands(""), "");
    }

    #[test]
    fn desktop_without_other_is_one_page() {
        let rendered = render(&record(), Layout::Desktop);
        assert_eq!(rendered.pages.len(), 1);
        assert_eq!(rendered.pages[0].footer.as_deref(), Some("1 / 1"));
        let performance = &rendered.pages[0].sections[2];
        assert_eq!(performance[0][0].value, "1,234,567");
        assert_eq!(performance[3][0].value, "정비시간");
        assert_eq!(performance[3][2].value, "12");
    }

    #[test]
    fn other_text_adds_a_page_on_desktop_only() {
        let mut with_other = record();
        with_other.other = "추가 검토".to_string();

        let desktop = render(&with_other, Layout::Desktop);
        let footers: Vec<_> = desktop.pages.iter().map(|p| p.footer.clone()).collect();
        assert_eq!(footers, vec![Some("1 / 2".to_string()), Some("2 / 2".to_string())]);

        let mobile = render(&with_other, Layout::Mobile);
        assert_eq!(mobile.pages.len(), 1);
        assert_eq!(mobile.pages[0].footer, None);
        let last = mobile.pages[0].sections.last().unwrap();
        assert_eq!(last[0][0].value, "추가 검토");
        // mobile rows carry the third indicator, not the second
        let performance = &mobile.pages[0].sections[2];
        assert_eq!(performance[5][0].value, "정비시간");
    }

    #[test]
    fn whitespace_only_other_still_gets_its_page() {
        let mut blank = record();
        blank.other = "  ".to_string();
        let desktop = render(&blank, Layout::Desktop);
        assert_eq!(desktop.pages.len(), 2);
        assert_eq!(desktop.pages[1].footer.as_deref(), Some("2 / 2"));
    }

    #[test]
    fn print_wraps_escaped_markup() {
        let printed = print_document(&render(&record(), Layout::Desktop));
        assert!(printed.starts_with("<style media=\"print\">"));
        assert!(printed.contains("수작업 &lt;점검&gt;"));
        assert!(printed.contains("확인번호&nbsp;:&nbsp;7"));
    }

    #[test]
    fn writer_keeps_digits_and_merges() {
        let store = DocumentStore::in_memory();
        let config = AppConfig::default();
        store
            .set("manage/M-01", json!({ "OWNER": "keep" }))
            .unwrap();
        let mut input = record();
        input.result = "1,234 백만원".to_string();
        input.indi = "a\r\nb".to_string();
        let written = write_report(&store, &config, "M-01", input).unwrap();
        assert_eq!(written.result, "1234");

        let stored = store.get("manage/M-01").unwrap().unwrap();
        assert_eq!(stored.data["OWNER"], "keep");
        assert_eq!(stored.data["INDI"], "a\nb");
        assert_eq!(get_report(&store, &config, "M-01").unwrap().leader, "홍길동");
    }

    #[test]
    fn bad_references_are_rejected() {
        let store = DocumentStore::in_memory();
        let config = AppConfig::default();
        assert!(matches!(
            get_report(&store, &config, "missing"),
            Err(AppError::MissingDocument { .. })
        ));
        assert!(get_report(&store, &config, "ini").is_err());
        assert!(write_report(&store, &config, "a/b", ReportRecord::default()).is_err());
    }
}
