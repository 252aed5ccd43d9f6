use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use log::{debug, info};
use std::time::Duration;

use optimizer_api::api;
use optimizer_api::config::ServiceConfig;
use optimizer_api::domain::solver_factory::create_solver;
use optimizer_api::service::Orchestrator;

// ---------- Server bootstrap ----------
fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = ServiceConfig::from_env();

    // The guard flushes pending events when main returns.
    let _sentry = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    actix_web::rt::System::new().block_on(serve(config))
}

async fn serve(config: ServiceConfig) -> std::io::Result<()> {
    let backend = create_solver(config.solver, config.poll_interval);
    let orchestrator = web::Data::new(Orchestrator::new(config.orchestrator.clone(), backend)?);
    let json_limit = config.json_payload_limit;

    // Lookups drop expired entries lazily; this catches the ones nobody asks for.
    let janitor = orchestrator.clone();
    let sweep_every = (config.orchestrator.cache_ttl / 2).max(Duration::from_secs(1));
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let purged = janitor.purge_expired();
            if purged > 0 {
                debug!("Purged {purged} expired cache entries");
            }
        }
    });

    info!("Starting server on http://0.0.0.0:{}", config.port);
    let app_data = orchestrator.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            // Without an initialized client the hub drops events.
            .wrap(sentry_actix::Sentry::new())
            .app_data(app_data.clone())
            .configure(api::configure(json_limit))
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await?;

    orchestrator.shutdown();
    Ok(())
}
