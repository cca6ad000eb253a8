use actix_web::{web, HttpResponse, Responder};

use crate::api::{control_error_response, store_error_response};
use crate::metrics::METRICS;
use crate::models::{NewServer, ServerUpdate};
use crate::state::AppState;

pub async fn list_servers(data: web::Data<AppState>) -> impl Responder {
    match data.store.list().await {
        Ok(servers) => HttpResponse::Ok().json(servers),
        Err(e) => store_error_response(&e),
    }
}

pub async fn create_server(
    data: web::Data<AppState>,
    req: web::Json<NewServer>,
) -> impl Responder {
    match data.store.create(req.into_inner()).await {
        Ok(server) => HttpResponse::Created().json(server),
        Err(e) => store_error_response(&e),
    }
}

pub async fn update_server(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<ServerUpdate>,
) -> impl Responder {
    let id = path.into_inner();
    let previous_name = match data.store.get(&id).await {
        Ok(server) => server.map(|s| s.name),
        Err(e) => return store_error_response(&e),
    };

    match data.store.update(&id, req.into_inner()).await {
        Ok(server) => {
            if let Some(old) = previous_name.filter(|old| *old != server.name) {
                METRICS.reset_server_metrics(&id, &old);
            }
            HttpResponse::Ok().json(server)
        }
        Err(e) => store_error_response(&e),
    }
}

pub async fn delete_server(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    match data.control.delete_server(&id).await {
        Ok(removed) => {
            METRICS.reset_server_metrics(&removed.id, &removed.name);
            HttpResponse::Ok().json(serde_json::json!({ "success": true }))
        }
        Err(e) => control_error_response(&e),
    }
}
