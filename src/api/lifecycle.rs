use actix_web::{web, HttpResponse, Responder};

use crate::api::control_error_response;
use crate::state::AppState;

pub async fn start_server(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    match data.control.start_server(&id).await {
        Ok(tracked) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "pid": tracked.pid
        })),
        Err(e) => control_error_response(&e),
    }
}

pub async fn stop_server(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    match data.control.stop_server(&id).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(e) => control_error_response(&e),
    }
}

pub async fn get_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    HttpResponse::Ok().json(data.control.get_status(&id).await)
}

pub async fn get_system(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.control.get_system_metrics().await)
}
