use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use threadline::config::{AppConfig, DbConfig};
use threadline::openapi::ApiDoc;
use threadline::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use threadline::repo::Repo;
use threadline::revalidate::make_page_cache;
use threadline::{config, AppState};

#[cfg(feature = "postgres-store")]
async fn postgres_repo(cfg: &DbConfig) -> anyhow::Result<Option<Arc<dyn Repo>>> {
    let Some(db) = threadline::db::connect_to_db(cfg)? else { return Ok(None) };
    db.migrate().await?;
    let pool = db.connect()?.clone();
    info!("Using Postgres repository backend");
    Ok(Some(Arc::new(threadline::repo::pg::PgRepo::new(pool))))
}

#[cfg(not(feature = "postgres-store"))]
async fn postgres_repo(_cfg: &DbConfig) -> anyhow::Result<Option<Arc<dyn Repo>>> {
    Ok(None)
}

#[cfg(feature = "inmem-store")]
fn fallback_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use threadline::repo::inmem::InMemRepo;
    let repo = match &cfg.data_dir {
        Some(dir) => InMemRepo::with_snapshot_dir(dir),
        None => InMemRepo::new(),
    };
    info!(snapshot = cfg.data_dir.is_some(), "Using in-memory repository backend");
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "inmem-store"))]
fn fallback_repo(_cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    anyhow::bail!("DATABASE_URL is required when the in-memory store is not compiled in")
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            eprintln!("Please copy .env.example to .env and configure it");
            std::process::exit(1);
        }
    };

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping threadline server");
    info!("Frontend URL: {}", cfg.frontend_url);

    let repo = match postgres_repo(&cfg.database).await? {
        Some(repo) => repo,
        None => fallback_repo(&cfg)?,
    };
    let cache = make_page_cache(&cfg.cache_provider, cfg.cache_purge_url.as_deref())?;
    info!(provider = %cfg.cache_provider, "page cache ready");
    let rate_limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg.rate_limit.clone());

    let state = AppState { repo, cache, rate_limiter: Some(rate_limiter) };
    let openapi = ApiDoc::openapi();
    let frontend = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&cfg.bind_addr)?;

    info!("Listening on http://{}", cfg.bind_addr);

    server.run().await?;
    Ok(())
}
