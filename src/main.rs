use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

mod api;
mod cli;
mod metrics;
mod models;
mod services;
mod state;

use cli::CommandArgs;
use state::new_state;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);

    let state = new_state(&args);
    log::info!("📁 Server definitions: {}", state.store.path().display());

    if args.no_auto_start {
        log::info!("Auto-start disabled");
    } else {
        let started = state.control.start_auto_start_servers().await;
        if started > 0 {
            log::info!("✅ Auto-started {} server(s)", started);
        }
    }

    print_banner(&args);

    let app_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(DefaultHeaders::new().add(("Access-Control-Allow-Origin", "*")))
            .app_data(web::Data::new(app_state.clone()))
            .configure(api::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("failed to bind {}", bind_address))?
    .run();

    let result = server.await;

    // children must not outlive the dashboard
    state.control.stop_all().await;
    log::info!("👋 Dashboard stopped");

    result.context("HTTP server failed")
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Launch Dashboard v{:<35}║", env!("CARGO_PKG_VERSION"));
    println!("║      Local dev-server supervisor                          ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 API running on http://{}:{}", args.address, args.port);
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/servers              - List servers");
    println!("  POST   /api/servers              - Add a server");
    println!("  PUT    /api/servers/{{id}}         - Update a server");
    println!("  DELETE /api/servers/{{id}}         - Remove a server");
    println!("  POST   /api/servers/{{id}}/start   - Start a server");
    println!("  POST   /api/servers/{{id}}/stop    - Stop a server");
    println!("  GET    /api/servers/{{id}}/status  - Status with CPU/RAM");
    println!("  GET    /api/system               - System metrics");
    println!("  GET    /metrics                  - Prometheus metrics");
    println!("  GET    /health                   - Health check");
    println!("═══════════════════════════════════════════════════════════");
}
