pub mod lifecycle;
pub mod metrics;
pub mod servers;

pub use lifecycle::{get_status, get_system, start_server, stop_server};
pub use metrics::get_metrics;
pub use servers::{create_server, delete_server, list_servers, update_server};

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse, Responder};

use crate::services::control::describe;
use crate::services::{ControlError, StoreError};

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}

/// CORS preflight for any path, 404 for everything else
pub async fn fallback(req: HttpRequest) -> HttpResponse {
    if *req.method() == Method::OPTIONS {
        return HttpResponse::NoContent()
            .insert_header(("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"))
            .insert_header(("Access-Control-Allow-Headers", "Content-Type"))
            .finish();
    }
    HttpResponse::NotFound().json(error_body("Not found", None))
}

/// Malformed or oversized bodies get the same JSON error shape as everything else
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(error_body("Invalid JSON body", Some(err.to_string())));
    InternalError::from_response(err, response).into()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .route("/api/servers", web::get().to(list_servers))
        .route("/api/servers", web::post().to(create_server))
        .route("/api/servers/{id}", web::put().to(update_server))
        .route("/api/servers/{id}", web::delete().to(delete_server))
        .route("/api/servers/{id}/start", web::post().to(start_server))
        .route("/api/servers/{id}/stop", web::post().to(stop_server))
        .route("/api/servers/{id}/status", web::get().to(get_status))
        .route("/api/system", web::get().to(get_system))
        .route("/metrics", web::get().to(get_metrics))
        .route("/health", web::get().to(health))
        .default_service(web::to(fallback));
}

pub fn error_body(error: &str, details: Option<String>) -> serde_json::Value {
    match details {
        Some(details) => serde_json::json!({ "error": error, "details": details }),
        None => serde_json::json!({ "error": error }),
    }
}

pub fn store_error_response(err: &StoreError) -> HttpResponse {
    match err {
        StoreError::NotFound(_) => HttpResponse::NotFound().json(error_body("Server not found", None)),
        StoreError::Invalid(msg) => HttpResponse::BadRequest().json(error_body(msg, None)),
        other => {
            log::error!("Server store failure: {}", other);
            HttpResponse::InternalServerError()
                .json(error_body("Failed to access server store", Some(other.to_string())))
        }
    }
}

pub fn control_error_response(err: &ControlError) -> HttpResponse {
    match err {
        ControlError::NotFound(_) => HttpResponse::NotFound().json(error_body(&err.to_string(), None)),
        ControlError::AlreadyRunning(_) | ControlError::NotRunning(_) => {
            HttpResponse::BadRequest().json(error_body(&err.to_string(), None))
        }
        ControlError::StartFailed(source) => HttpResponse::InternalServerError()
            .json(error_body(&err.to_string(), Some(source.to_string()))),
        ControlError::Store(store) => {
            log::error!("{}", describe(err));
            store_error_response(store)
        }
    }
}
