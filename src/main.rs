#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use checklist_ledger::auth::{self, SignInOutcome, DEFAULT_PBKDF2_ITERATIONS};
use checklist_ledger::config::{parse_flag, SESSION_FILE};
use checklist_ledger::dashboard::{self, DashboardSummary};
use checklist_ledger::export::{export_file_name, export_report};
use checklist_ledger::model::{parse_date_key, today_key, Instrument};
use checklist_ledger::report::{self, Layout, RenderedReport, ReportRecord};
use checklist_ledger::routes::{resolve_route, ResolvedRoute};
use checklist_ledger::survey::{LiveSurvey, SubmitReceipt, SurveyRunner, SurveyView};
use checklist_ledger::{
    AppConfig, AppError, DocumentStore, InstrumentKind, Session, SessionStore, SurveyError,
};
use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Emitter, Manager, State, WebviewWindow};
use tauri_plugin_clipboard_manager::ClipboardExt;
use tauri_plugin_opener::OpenerExt;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const APP_DIR: &str = "HealthChecklist";
const INSTRUMENT_EVENT: &str = "instrument-snapshot";

struct AppState {
    config: AppConfig,
    store: DocumentStore,
    sessions: SessionStore,
    survey: Mutex<Option<LiveSurvey>>,
}

impl AppState {
    fn open(app: &AppHandle) -> Result<Self, String> {
        let root = storage_root_dir(app)?;
        let config = AppConfig::load(root.as_path()).map_err(|err| err.to_string())?;
        let store =
            DocumentStore::open(config.store_path(root.as_path())).map_err(|err| err.to_string())?;
        info!(root = %root.display(), store = config.store_file.as_str(), "storage ready");
        Ok(Self {
            sessions: SessionStore::at(root.join(SESSION_FILE)),
            config,
            store,
            survey: Mutex::new(None),
        })
    }
}

#[derive(Deserialize)]
struct SignInRequest {
    number: String,
    pw: String,
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    number: String,
    current: String,
    next: String,
}

#[derive(Deserialize)]
struct SurveyAnswerRequest {
    option: String,
}

#[derive(Deserialize)]
struct SurveySelectRequest {
    kind: InstrumentKind,
}

#[derive(Deserialize)]
struct SurveySubmitRequest {
    session: Session,
}

#[derive(Deserialize)]
struct DashboardRequest {
    date: Option<String>,
}

#[derive(Deserialize)]
struct DashboardRosterRequest {
    date: Option<String>,
    team: String,
    kind: InstrumentKind,
    #[serde(default)]
    copy: bool,
}

#[derive(Deserialize)]
struct DashboardExportRequest {
    date: Option<String>,
    #[serde(default)]
    open: bool,
}

#[derive(Deserialize)]
struct ReportRequest {
    reference: String,
}

#[derive(Deserialize)]
struct ReportRenderRequest {
    reference: String,
    layout: Layout,
    #[serde(default)]
    print: bool,
}

#[derive(Deserialize)]
struct ReportWriteRequest {
    reference: String,
    record: ReportRecord,
}

#[derive(Deserialize)]
struct RouteRequest {
    path: String,
    session: Option<Session>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum SurveyState {
    Empty { message: String },
    Ready { view: SurveyView },
}

#[derive(Serialize, Clone)]
struct InstrumentEvent {
    kind: InstrumentKind,
    instrument: Option<Instrument>,
}

#[derive(Serialize)]
struct ExportFileResult {
    ok: bool,
    canceled: bool,
    filename: String,
    path: Option<String>,
    sheets: Vec<String>,
    rows: usize,
}

#[derive(Serialize)]
struct ReportRenderResult {
    report: RenderedReport,
    html: String,
}

#[tauri::command]
fn app_version(app: AppHandle) -> String {
    app.package_info().version.to_string()
}

#[tauri::command]
fn session_restore(state: State<'_, AppState>) -> Result<Option<Session>, String> {
    state.sessions.load().map_err(|err| err.to_string())
}

#[tauri::command]
fn sign_in(state: State<'_, AppState>, payload: SignInRequest) -> Result<SignInOutcome, String> {
    auth::sign_in(
        &state.store,
        &state.sessions,
        &state.config,
        payload.number.as_str(),
        payload.pw.as_str(),
    )
    .map_err(|err| err.to_string())
}

#[tauri::command]
fn sign_out(state: State<'_, AppState>) -> Result<bool, String> {
    auth::sign_out(&state.sessions).map_err(|err| err.to_string())?;
    let mut survey = lock_survey(&state)?;
    *survey = None;
    Ok(true)
}

#[tauri::command]
fn change_password(
    state: State<'_, AppState>,
    payload: ChangePasswordRequest,
) -> Result<bool, String> {
    auth::change_password(
        &state.store,
        &state.config,
        payload.number.as_str(),
        payload.current.as_str(),
        payload.next.as_str(),
        DEFAULT_PBKDF2_ITERATIONS,
    )
    .map_err(|err| err.to_string())
}

#[tauri::command]
fn survey_start(app: AppHandle, state: State<'_, AppState>) -> Result<SurveyState, String> {
    if let Some(live) = lock_survey(&state)?.as_mut() {
        live.reset();
    }
    run_survey(&app, &state, |_| Ok(()))
}

#[tauri::command]
fn survey_state(app: AppHandle, state: State<'_, AppState>) -> Result<SurveyState, String> {
    run_survey(&app, &state, |_| Ok(()))
}

#[tauri::command]
fn survey_answer(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: SurveyAnswerRequest,
) -> Result<SurveyState, String> {
    run_survey(&app, &state, |runner| runner.choose(payload.option.as_str()))
}

#[tauri::command]
fn survey_next(app: AppHandle, state: State<'_, AppState>) -> Result<SurveyState, String> {
    run_survey(&app, &state, |runner| runner.next())
}

#[tauri::command]
fn survey_select(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: SurveySelectRequest,
) -> Result<SurveyState, String> {
    run_survey(&app, &state, |runner| runner.select(payload.kind))
}

#[tauri::command]
fn survey_submit(
    state: State<'_, AppState>,
    payload: SurveySubmitRequest,
) -> Result<SubmitReceipt, String> {
    let mut survey = lock_survey(&state)?;
    let Some(live) = survey.as_mut() else {
        return Err(SurveyError::Incomplete.to_string());
    };
    let receipt = live
        .runner()
        .map_err(|err| err.to_string())?
        .submit(
            &state.store,
            &state.sessions,
            &state.config,
            &payload.session,
            today_key().as_str(),
        )
        .map_err(|err| err.to_string())?;
    live.reset();
    Ok(receipt)
}

#[tauri::command]
fn dashboard_summary(
    state: State<'_, AppState>,
    payload: DashboardRequest,
) -> Result<DashboardSummary, String> {
    let date = resolve_date(payload.date)?;
    dashboard::dashboard_for(&state.store, &state.config, date.as_str())
        .map_err(|err| err.to_string())
}

#[tauri::command]
fn dashboard_roster(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: DashboardRosterRequest,
) -> Result<String, String> {
    let date = resolve_date(payload.date)?;
    let summary = dashboard::dashboard_for(&state.store, &state.config, date.as_str())
        .map_err(|err| err.to_string())?;
    let roster = dashboard::team_roster(&summary, payload.team.as_str(), payload.kind);
    if payload.copy {
        app.clipboard()
            .write_text(roster.clone())
            .map_err(|err| err.to_string())?;
    }
    Ok(roster)
}

#[tauri::command]
fn dashboard_export(
    app: AppHandle,
    state: State<'_, AppState>,
    payload: DashboardExportRequest,
) -> Result<ExportFileResult, String> {
    let date = resolve_date(payload.date)?;
    let filename = export_file_name(date.as_str());
    let path = rfd::FileDialog::new()
        .add_filter("Excel Workbook", &["xlsx"])
        .set_file_name(filename.as_str())
        .save_file();

    let Some(path) = path else {
        return Ok(ExportFileResult {
            ok: false,
            canceled: true,
            filename,
            path: None,
            sheets: Vec::new(),
            rows: 0,
        });
    };

    let result = export_report(&state.store, &state.config, date.as_str(), path.as_path())
        .map_err(|err| err.to_string())?;
    if payload.open {
        app.opener()
            .open_path(result.path.clone(), Option::<String>::None)
            .map_err(|err: tauri_plugin_opener::Error| err.to_string())?;
    }
    Ok(ExportFileResult {
        ok: true,
        canceled: false,
        filename,
        path: Some(result.path),
        sheets: result.sheets,
        rows: result.rows,
    })
}

#[tauri::command]
fn report_get(state: State<'_, AppState>, payload: ReportRequest) -> Result<ReportRecord, String> {
    report::get_report(&state.store, &state.config, payload.reference.as_str())
        .map_err(|err| err.to_string())
}

#[tauri::command]
fn report_render(
    state: State<'_, AppState>,
    payload: ReportRenderRequest,
) -> Result<ReportRenderResult, String> {
    let record = report::get_report(&state.store, &state.config, payload.reference.as_str())
        .map_err(|err| err.to_string())?;
    let rendered = report::render(&record, payload.layout);
    let html = if payload.print {
        report::print_document(&rendered)
    } else {
        report::render_html(&rendered)
    };
    Ok(ReportRenderResult {
        report: rendered,
        html,
    })
}

#[tauri::command]
fn report_print(window: WebviewWindow) -> Result<(), String> {
    window.print().map_err(|err| err.to_string())
}

#[tauri::command]
fn report_write(
    state: State<'_, AppState>,
    payload: ReportWriteRequest,
) -> Result<ReportRecord, String> {
    report::write_report(
        &state.store,
        &state.config,
        payload.reference.as_str(),
        payload.record,
    )
    .map_err(|err| err.to_string())
}

#[tauri::command]
fn route_resolve(payload: RouteRequest) -> ResolvedRoute {
    resolve_route(payload.path.as_str(), payload.session.as_ref())
}

fn lock_survey<'a>(
    state: &'a AppState,
) -> Result<std::sync::MutexGuard<'a, Option<LiveSurvey>>, String> {
    state
        .survey
        .lock()
        .map_err(|_| AppError::LockPoisoned.to_string())
}

/// Applies `action` to the live runner and returns the refreshed view. With no
/// usable instruments stored the page shows the empty state instead of an
/// alert.
fn run_survey(
    app: &AppHandle,
    state: &AppState,
    action: impl FnOnce(&mut SurveyRunner) -> Result<(), SurveyError>,
) -> Result<SurveyState, String> {
    let mut survey = lock_survey(state)?;
    if survey.is_none() {
        let live = LiveSurvey::open(&state.store, &state.config).map_err(|err| err.to_string())?;
        relay_instruments(app, &live)?;
        *survey = Some(live);
    }
    let Some(live) = survey.as_mut() else {
        return Err(SurveyError::NoInstruments.to_string());
    };
    let runner = match live.runner() {
        Ok(runner) => runner,
        Err(err @ (SurveyError::NoInstruments | SurveyError::UnscoredOptions { .. })) => {
            return Ok(SurveyState::Empty {
                message: err.to_string(),
            })
        }
        Err(err) => return Err(err.to_string()),
    };
    action(&mut *runner).map_err(|err| err.to_string())?;
    Ok(SurveyState::Ready {
        view: runner.view(),
    })
}

/// Forwards instrument changes seen by the survey's own subscriptions to the
/// window. Each relay ends when the survey is dropped.
fn relay_instruments(app: &AppHandle, live: &LiveSurvey) -> Result<(), String> {
    for (kind, receiver) in live.feed().taps().map_err(|err| err.to_string())? {
        let app = app.clone();
        std::thread::spawn(move || {
            while let Ok(snapshot) = receiver.recv() {
                let event = InstrumentEvent {
                    kind,
                    instrument: snapshot.iter().find_map(Instrument::from_document),
                };
                if let Err(err) = app.emit(INSTRUMENT_EVENT, event) {
                    warn!(%kind, %err, "instrument snapshot not delivered");
                    break;
                }
            }
            debug!(%kind, "instrument relay ended");
        });
    }
    Ok(())
}

fn resolve_date(date: Option<String>) -> Result<String, String> {
    match date.as_deref().map(str::trim) {
        None | Some("") => Ok(today_key()),
        Some(value) => parse_date_key(value)
            .ok_or_else(|| AppError::invalid("date", value).to_string()),
    }
}

fn storage_root_dir(app: &AppHandle) -> Result<PathBuf, String> {
    let base = app.path().app_data_dir().map_err(|err| err.to_string())?;
    let root = base.join(APP_DIR);
    fs::create_dir_all(root.as_path()).map_err(|err| err.to_string())?;
    Ok(root)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = std::env::var("CHECKLIST_LOG_JSON")
        .map(|value| parse_flag(value.as_str()))
        .unwrap_or(false);
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn main() {
    init_tracing();
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_clipboard_manager::init())
        .setup(|app| {
            let state = AppState::open(app.handle())?;
            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            app_version,
            session_restore,
            sign_in,
            sign_out,
            change_password,
            survey_start,
            survey_state,
            survey_answer,
            survey_next,
            survey_select,
            survey_submit,
            dashboard_summary,
            dashboard_roster,
            dashboard_export,
            report_get,
            report_render,
            report_print,
            report_write,
            route_resolve
        ])
        .run(tauri::generate_context!())
        .expect("failed to run Health Checklist");
}
