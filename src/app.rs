#![cfg(feature = "web")]
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

use crate::budget::{Budget, CategoryStatus};
use crate::config::Settings;
use crate::error::PlanError;
use crate::expense::{ExpenseLedger, LedgerSummary, expenses_from_table};
use crate::graph::{ChartOptions, render_budget_chart, render_monthly_chart};
use crate::loader::table_from_upload;
use crate::rules::PlanProfile;
use crate::updater::update_plan;

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub struct AppState {
    ledger: Mutex<ExpenseLedger>,
    budget: Mutex<Budget>,
    budget_path: PathBuf,
    profile: PlanProfile,
}

impl AppState {
    pub fn new(profile: PlanProfile, budget: Budget, budget_path: PathBuf) -> Self {
        AppState {
            ledger: Mutex::new(ExpenseLedger::new()),
            budget: Mutex::new(budget),
            budget_path,
            profile,
        }
    }

    fn ledger(&self) -> Result<MutexGuard<'_, ExpenseLedger>, AppError> {
        self.ledger
            .lock()
            .map_err(|_| AppError::Internal("expense ledger lock poisoned".to_string()))
    }

    fn budget(&self) -> Result<MutexGuard<'_, Budget>, AppError> {
        self.budget
            .lock()
            .map_err(|_| AppError::Internal("budget lock poisoned".to_string()))
    }
}

#[derive(Serialize)]
struct SaveResponse {
    status: String,
    message: Option<String>,
}

impl SaveResponse {
    fn ok(message: impl Into<String>) -> Self {
        SaveResponse {
            status: "ok".to_string(),
            message: Some(message.into()),
        }
    }
}

/// Handler failure, rendered as `{"status": "error", "message": ...}`.
#[derive(Debug)]
pub enum AppError {
    /// The uploaded files or request body were unusable
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        log::warn!("request failed ({}): {}", status, message);
        let body = SaveResponse {
            status: "error".to_string(),
            message: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        if err.is_input_error() {
            AppError::BadRequest(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(format!("invalid upload: {}", err))
    }
}

#[derive(Deserialize)]
struct MonthQuery {
    month: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    status: String,
    files: Vec<String>,
    added: usize,
    duplicates: usize,
    skipped: usize,
    summary: LedgerSummary,
}

#[derive(Serialize)]
struct BudgetResponse {
    targets: BTreeMap<String, f64>,
    month: Option<String>,
    statuses: Vec<CategoryStatus>,
    messages: Vec<String>,
}

#[derive(Deserialize)]
struct BudgetUpdate {
    #[serde(default)]
    entries: BTreeMap<String, f64>,
    #[serde(default)]
    remove: Vec<String>,
}

/// Build the router over shared state; `upload_limit` caps request bodies in bytes.
pub fn router(state: Arc<AppState>, upload_limit: usize) -> Router {
    Router::new()
        .route("/", get(serve_landing))
        .route("/plan", get(serve_plan))
        .route("/expenses", get(serve_expenses))
        .route("/api/plan/update", post(update_plan_upload))
        .route("/api/expenses/upload", post(upload_expenses))
        .route("/api/expenses", get(get_expenses).delete(clear_expenses))
        .route("/api/expenses/chart.png", get(expense_chart))
        .route("/api/budget", get(get_budget).post(set_budget))
        .route("/api/budget/chart.png", get(budget_chart))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit))
        .with_state(state)
}

pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let profile = settings.plan_profile()?;
    let budget = Budget::load(&settings.budget_path)?;
    log::info!(
        "loaded profile '{}' and {} budget entries from {}",
        profile.name,
        budget.targets().len(),
        settings.budget_path.display()
    );

    let state = Arc::new(AppState::new(profile, budget, settings.budget_path.clone()));
    let app = router(state, settings.upload_limit_bytes());

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    log::info!("Listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_landing() -> Html<&'static str> {
    Html(include_str!("./static/landing.html"))
}

async fn serve_plan() -> Html<&'static str> {
    Html(include_str!("./static/plan.html"))
}

async fn serve_expenses() -> Html<&'static str> {
    Html(include_str!("./static/expenses.html"))
}

async fn update_plan_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut export = None;
    let mut plan = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "export" => export = Some(field.bytes().await?.to_vec()),
            "plan" => plan = Some(field.bytes().await?.to_vec()),
            _ => {}
        }
    }

    let export = export
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing export workbook".to_string()))?;
    let plan = plan
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing plan workbook".to_string()))?;

    let profile = state.profile.clone();
    let today = chrono::Local::now().date_naive();
    let update = tokio::task::spawn_blocking(move || update_plan(export, plan, &profile, today))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let summary = update.summary.reconciliation.summary();
    log::info!("{}: {}", update.file_name, summary);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", update.file_name),
            ),
            (header::HeaderName::from_static("x-plan-summary"), summary),
        ],
        update.bytes,
    )
        .into_response())
}

async fn upload_expenses(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut files = Vec::new();
    let mut rows = Vec::new();
    let mut skipped = 0;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.csv").to_string();
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            continue;
        }
        let table = table_from_upload(&filename, bytes.to_vec())?;
        let parsed = expenses_from_table(&table)?;
        skipped += parsed.skipped;
        rows.extend(parsed.rows);
        files.push(filename);
    }

    if files.is_empty() {
        return Err(AppError::BadRequest("no expense files uploaded".to_string()));
    }

    let mut ledger = state.ledger()?;
    let outcome = ledger.merge(rows);
    log::info!(
        "merged {} files: {} new rows, {} duplicates, {} skipped",
        files.len(),
        outcome.added,
        outcome.duplicates,
        skipped
    );

    Ok(Json(UploadResponse {
        status: "ok".to_string(),
        files,
        added: outcome.added,
        duplicates: outcome.duplicates,
        skipped,
        summary: LedgerSummary::from(&*ledger),
    }))
}

async fn get_expenses(State(state): State<Arc<AppState>>) -> Result<Json<LedgerSummary>, AppError> {
    let ledger = state.ledger()?;
    Ok(Json(LedgerSummary::from(&*ledger)))
}

async fn clear_expenses(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, AppError> {
    let mut ledger = state.ledger()?;
    let removed = ledger.len();
    ledger.clear();
    Ok(Json(SaveResponse::ok(format!("cleared {} expense rows", removed))))
}

fn png(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], bytes).into_response()
}

async fn expense_chart(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let ledger = state.ledger()?;
    let chart = render_monthly_chart(&ledger, &ChartOptions::default())?;
    Ok(png(chart))
}

// Month to compare against the budget: the query value, else the latest month on file
fn selected_month(query: MonthQuery, ledger: &ExpenseLedger) -> Result<Option<String>, AppError> {
    match query.month {
        Some(m) => crate::expense::normalize_month(&m)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("invalid month '{}', expected YYYY-MM", m))),
        None => Ok(ledger.latest_month()),
    }
}

async fn get_budget(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MonthQuery>,
) -> Result<Json<BudgetResponse>, AppError> {
    let ledger = state.ledger()?;
    let budget = state.budget()?;
    let month = selected_month(query, &ledger)?;
    let statuses = month
        .as_deref()
        .map(|m| budget.compare(&ledger, m))
        .unwrap_or_default();

    Ok(Json(BudgetResponse {
        targets: budget.targets().clone(),
        month,
        messages: statuses.iter().map(CategoryStatus::message).collect(),
        statuses,
    }))
}

async fn set_budget(
    State(state): State<Arc<AppState>>,
    Json(update): Json<BudgetUpdate>,
) -> Result<Json<SaveResponse>, AppError> {
    let mut budget = state.budget()?;
    let mut next = budget.clone();
    for (category, amount) in &update.entries {
        next.set(category, *amount)?;
    }
    for category in &update.remove {
        next.remove(category);
    }
    next.save(&state.budget_path)?;
    *budget = next;

    Ok(Json(SaveResponse::ok(format!(
        "saved {} budget entries",
        budget.targets().len()
    ))))
}

async fn budget_chart(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MonthQuery>,
) -> Result<Response, AppError> {
    let ledger = state.ledger()?;
    let budget = state.budget()?;
    let month = selected_month(query, &ledger)?
        .ok_or_else(|| AppError::BadRequest("no expenses loaded".to_string()))?;

    let options = ChartOptions {
        title: format!("Budget {}", month),
        x_label: "Category".to_string(),
        ..ChartOptions::default()
    };
    let chart = render_budget_chart(&budget.compare(&ledger, &month), &options)?;
    Ok(png(chart))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(dir: &tempfile::TempDir) -> Router {
        let state = AppState::new(
            PlanProfile::default(),
            Budget::new(),
            dir.path().join("budget.json"),
        );
        router(Arc::new(state), 1024 * 1024)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn multipart_request(uri: &str, name: &str, filename: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n{}\r\n--XBOUNDARY--\r\n",
            name, filename, content
        );
        Request::post(uri)
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn pages_are_served() {
        let dir = tempfile::tempdir().unwrap();
        for uri in ["/", "/plan", "/expenses"] {
            let response = app(&dir)
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn plan_update_requires_both_workbooks() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .oneshot(multipart_request("/api/plan/update", "export", "export.xlsx", "not a workbook"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "missing plan workbook");
    }

    #[tokio::test]
    async fn expenses_upload_then_budget_status() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let csv = "Date,Category,Amount\n2024-03-01,Food,120\n2024-03-02,Food,30\n2024-03-02,Fuel,40";
        let response = app
            .clone()
            .oneshot(multipart_request("/api/expenses/upload", "files", "march.csv", csv))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["added"], 3);
        assert_eq!(body["summary"]["months"][0], "2024-03");

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/budget")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"entries": {"Food": 200}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(dir.path().join("budget.json").exists());

        let response = app
            .clone()
            .oneshot(Request::get("/api/budget").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["month"], "2024-03");
        assert_eq!(body["messages"][0], "Food: spent 150.00 of 200.00 (50.00 remaining).");
        assert_eq!(body["messages"][1], "Fuel: spent 40.00 with no budget set.");
    }

    #[tokio::test]
    async fn chart_without_expenses_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .oneshot(Request::get("/api/expenses/chart.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_budget_amount_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .oneshot(
                Request::post("/api/budget")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"entries": {"Food": -5}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!dir.path().join("budget.json").exists());
    }
}
