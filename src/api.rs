use actix_web::http::{header, StatusCode};
use actix_web::{error, web, HttpResponse, Responder, ResponseError};
use log::error;

use crate::domain::result::{SolveResult, SolveStatus};
use crate::error::SolveError;
use crate::models::ApiSolveRequest;
use crate::service::Orchestrator;

/// Seconds a client should back off after a 503.
const RETRY_AFTER_SECS: &str = "1";

impl ResponseError for SolveError {
    fn status_code(&self) -> StatusCode {
        match self {
            SolveError::Validation(_) => StatusCode::BAD_REQUEST,
            SolveError::UnsupportedConstraint(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SolveError::QueueFull { .. } | SolveError::ShuttingDown | SolveError::Cancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if self.is_retriable() || *self == SolveError::ShuttingDown {
            response.insert_header((header::RETRY_AFTER, RETRY_AFTER_SECS));
        }
        response.json(serde_json::json!({ "error": self.to_string() }))
    }
}

fn result_response(result: SolveResult) -> HttpResponse {
    match result.status {
        SolveStatus::Error => HttpResponse::InternalServerError().json(result),
        _ => HttpResponse::Ok().json(result),
    }
}

// ---------- Route handlers ----------

/// POST /solve
pub async fn solve(
    orchestrator: web::Data<Orchestrator>,
    req: web::Json<ApiSolveRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let raw = req.into_inner();
    // Solving blocks until a worker publishes, so keep it off the event loop.
    let outcome = web::block(move || orchestrator.solve(raw))
        .await
        .map_err(|err| {
            error!("Solve task failed: {err}");
            error::ErrorInternalServerError(serde_json::json!({ "error": err.to_string() }))
        })?;
    Ok(result_response(outcome?))
}

/// GET /health
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

/// GET /stats
pub async fn stats(orchestrator: web::Data<Orchestrator>) -> impl Responder {
    HttpResponse::Ok().json(orchestrator.stats())
}

/// Routes plus the JSON extractor settings. The orchestrator itself is
/// registered by the caller as `web::Data<Orchestrator>`.
pub fn configure(json_limit: usize) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(
            web::JsonConfig::default()
                .limit(json_limit)
                .error_handler(|err, _| {
                    let err_string = err.to_string();
                    error::InternalError::from_response(
                        err,
                        HttpResponse::BadRequest().json(serde_json::json!({ "error": err_string })),
                    )
                    .into()
                }),
        )
        .route("/solve", web::post().to(solve))
        .route("/health", web::get().to(health_check))
        .route("/stats", web::get().to(stats));
    }
}
