use actix_web::{web, HttpResponse, Responder};
use std::collections::HashMap;

use crate::metrics::METRICS;
use crate::state::AppState;

pub async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    let servers = match data.store.list().await {
        Ok(servers) => servers,
        Err(e) => {
            log::error!("Failed to read servers for metrics: {}", e);
            Vec::new()
        }
    };

    let mut running: HashMap<String, _> = data
        .control
        .running_statuses()
        .await
        .into_iter()
        .map(|(tracked, status)| (tracked.server_id.clone(), (tracked, status)))
        .collect();

    for server in &servers {
        let entry = running.remove(&server.id);
        METRICS.observe_server(
            &server.id,
            &server.name,
            entry.as_ref().map(|(tracked, status)| (tracked, status)),
        );
    }

    METRICS.observe_system(&data.control.get_system_metrics().await);

    match METRICS.render() {
        Ok(metrics_text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics_text),
        Err(e) => {
            log::error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to render metrics")
        }
    }
}
