//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use super::AppState;
use super::types::{
    AlarmResponse, AppliedResponse, ApplyBody, ErrorResponse, ForecastAccepted, InsightResponse,
    NoForecastResponse, OptimizeQuery, PlanResponse, TenantQuery,
};
use crate::error::{ForecastError, RunError, SchedulerError};
use crate::forecast::ForecastRow;
use crate::insight::{InsightContext, NO_FORECAST_SUMMARY, SummarySource, summarize_or_fallback};
use crate::plan::{Metrics, Preview, PreviewMode, Trigger};
use crate::runner::{AppliedPlan, RunOutcome};

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn run_error(err: RunError) -> ApiError {
    match err {
        RunError::Conflict { current, attempted } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                current: Some(current),
                ..ErrorResponse::new(format!(
                    "version {attempted} is stale: current version is {current}"
                ))
            }),
        ),
        RunError::InvalidPlan(reason) => {
            warn!(reason = %reason, "rejected plan");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::invalid_plan(&reason)),
            )
        }
        RunError::Scheduler(SchedulerError::Closed(tenant)) => {
            error!(tenant = %tenant, "scheduler unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new(format!("scheduler for {tenant} is unavailable"))),
            )
        }
        other => {
            error!(error = %other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(other.to_string())),
            )
        }
    }
}

fn applied_response(applied: AppliedPlan) -> AppliedResponse {
    AppliedResponse {
        status: "applied",
        tenant: applied.receipt.tenant,
        version: applied.receipt.version,
        metrics: applied.plan.metrics,
        audit_error: applied.audit_error.map(|e| e.to_string()),
    }
}

/// Returns the stored forecast, or an empty array.
///
/// `GET /api/forecast`
pub async fn get_forecast(State(state): State<Arc<AppState>>) -> Json<Vec<ForecastRow>> {
    let rows = state.orchestrator.builder().forecasts().read().await;
    Json(rows.unwrap_or_default())
}

/// Validates and stores a forecast.
///
/// `PUT /api/forecast` → 200, or 400 with per-field details
pub async fn put_forecast(
    State(state): State<Arc<AppState>>,
    Json(rows): Json<Vec<ForecastRow>>,
) -> ApiResult<ForecastAccepted> {
    let count = rows.len();
    match state.orchestrator.builder().forecasts().write(rows).await {
        Ok(()) => Ok(Json(ForecastAccepted {
            status: "ok",
            count,
        })),
        Err(e @ (ForecastError::Empty | ForecastError::Invalid { .. })) => {
            warn!(error = %e, "rejected forecast upload");
            Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::invalid_forecast(&e)),
            ))
        }
        Err(e) => {
            error!(error = %e, "cannot store forecast");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            ))
        }
    }
}

/// Previews the optimizer on the current forecast; never applies.
///
/// `GET /api/optimize?mode=carbon|renewable`
pub async fn get_optimize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OptimizeQuery>,
) -> Json<Preview> {
    let preview = state.orchestrator.builder().preview(query.mode).await;
    Json(preview.unwrap_or_else(|| Preview {
        base: Vec::new(),
        optimized: Vec::new(),
        renewable: Vec::new(),
        metrics: Metrics::default(),
        shifts: 0.0,
    }))
}

/// Summarizes the carbon preview of the current forecast.
///
/// `GET /api/insight`
pub async fn get_insight(State(state): State<Arc<AppState>>) -> Json<InsightResponse> {
    let Some(preview) = state.orchestrator.builder().preview(PreviewMode::Carbon).await else {
        return Json(InsightResponse {
            summary: NO_FORECAST_SUMMARY.to_string(),
            source: SummarySource::Fallback,
            metrics: None,
        });
    };

    let context = InsightContext {
        horizon_hours: preview.base.len(),
        shifted_mwh: preview.shifts,
    };
    let insight =
        summarize_or_fallback(state.summarizer.as_deref(), &preview.metrics, &context).await;
    Json(InsightResponse {
        summary: insight.summary,
        source: insight.source,
        metrics: Some(preview.metrics),
    })
}

/// Returns a tenant's current plan record.
///
/// `GET /api/plan?tenant=`
pub async fn get_plan(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<PlanResponse> {
    let scheduler = state.orchestrator.scheduler();
    let tenant = scheduler.tenant_key(query.tenant.as_deref());
    let record = scheduler
        .plan(Some(tenant.as_str()))
        .await
        .map_err(|e| run_error(e.into()))?;
    Ok(Json(PlanResponse { tenant, record }))
}

/// Applies an externally built plan.
///
/// `POST /api/apply` → 200, 400 for misaligned or empty series, or 409 when
/// the version is not newer than the tenant's current plan
pub async fn post_apply(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApplyBody>,
) -> ApiResult<AppliedResponse> {
    let trigger = body.trigger.unwrap_or(Trigger::Apply);
    let applied = state
        .orchestrator
        .apply_manual(
            body.tenant.as_deref(),
            body.payload,
            body.forecast_digest,
            trigger,
        )
        .await
        .map_err(run_error)?;
    Ok(Json(applied_response(applied)))
}

/// Rebuilds the plan from the current forecast and applies it.
///
/// `POST /api/reoptimize?tenant=` → 200 with `status` `applied` or
/// `no_forecast`
pub async fn post_reoptimize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
) -> Result<Response, ApiError> {
    let outcome = state
        .orchestrator
        .run_reoptimization(query.tenant.as_deref(), Trigger::Reoptimize, None)
        .await
        .map_err(run_error)?;
    Ok(match outcome {
        RunOutcome::NothingToDo => Json(NoForecastResponse {
            status: "no_forecast",
        })
        .into_response(),
        RunOutcome::Applied(applied) => Json(applied_response(applied)).into_response(),
    })
}

/// Runs a tenant's drift check now.
///
/// `POST /api/alarm?tenant=`
pub async fn post_alarm(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<AlarmResponse> {
    let outcome = state
        .orchestrator
        .scheduler()
        .alarm(query.tenant.as_deref())
        .await
        .map_err(|e| run_error(e.into()))?;
    Ok(Json(AlarmResponse::from(outcome)))
}
