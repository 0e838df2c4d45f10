use actix_web::{middleware::Compress, web, App, HttpServer};
use actix_cors::Cors;
use anyhow::Context;
use utoipa_swagger_ui::SwaggerUi;

use atelier::config::AppConfig;
use atelier::openapi::ApiDoc;
use atelier::reconcile::Reconciler;
use atelier::repo::Repo;
use atelier::routes::{config, AppState};
use atelier::storage::{BlobStore, FsBlobStore};
use atelier::users::UserDirectory;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping atelier server");
    info!("Blob root: {}", cfg.blob_root.display());

    let blobs: Arc<dyn BlobStore> = Arc::new(
        FsBlobStore::new(&cfg.blob_root)
            .await
            .with_context(|| format!("cannot prepare blob root {}", cfg.blob_root.display()))?,
    );
    let (repo, users) = build_stores(&cfg).await?;

    // tombstones left by the previous run
    let reconciler = Reconciler::new(repo.clone(), blobs.clone());
    if let Err(e) = reconciler.run().await {
        warn!("startup reconciliation failed: {e}");
    }
    if let Some(every) = cfg.reconcile_interval {
        info!("Reconciling every {}s", every.as_secs());
        reconciler.spawn_periodic(every);
    }

    let state = AppState::new(repo, users, blobs, cfg.max_upload_bytes);
    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // during local dev allow React/Vite default ports
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .max_age(3600);
            if let Some(front) = &frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.bind_addr.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.bind_addr, cfg.port);
    server.run().await?;
    Ok(())
}

#[cfg(feature = "postgres-store")]
async fn build_stores(cfg: &AppConfig) -> anyhow::Result<(Arc<dyn Repo>, Arc<dyn UserDirectory>)> {
    if let Some(url) = &cfg.database_url {
        use atelier::repo::pg::PgRepo;
        use atelier::users::pg::PgUsers;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use std::str::FromStr;

        let timeout = cfg.store_timeout;
        let opts = PgConnectOptions::from_str(url)
            .context("invalid DATABASE_URL")?
            .options([("statement_timeout", format!("{}s", timeout.as_secs()))]);
        let pool = PgPoolOptions::new()
            .max_connections(cfg.db_max_connections)
            .acquire_timeout(timeout)
            .connect_with(opts)
            .await
            .context("failed to connect to Postgres")?;
        sqlx::migrate!().run(&pool).await.context("migrations failed")?;
        info!("Using Postgres repository backend");
        let repo: Arc<dyn Repo> = Arc::new(PgRepo::new(pool.clone()));
        let users: Arc<dyn UserDirectory> = Arc::new(PgUsers::new(pool));
        return Ok((repo, users));
    }
    in_memory_stores(cfg)
}

#[cfg(not(feature = "postgres-store"))]
async fn build_stores(cfg: &AppConfig) -> anyhow::Result<(Arc<dyn Repo>, Arc<dyn UserDirectory>)> {
    if cfg.database_url.is_some() {
        warn!("DATABASE_URL set but the postgres-store feature is disabled; ignoring");
    }
    in_memory_stores(cfg)
}

#[cfg(feature = "inmem-store")]
fn in_memory_stores(cfg: &AppConfig) -> anyhow::Result<(Arc<dyn Repo>, Arc<dyn UserDirectory>)> {
    use atelier::repo::inmem::InMemRepo;
    use atelier::users::inmem::InMemUsers;

    let users = match &cfg.users_file {
        Some(path) => InMemUsers::from_file(path)
            .with_context(|| format!("cannot load users from {}", path.display()))?,
        None => {
            warn!("USERS_FILE not set; in-memory directory starts empty and every request is unauthorized");
            InMemUsers::new()
        }
    };
    info!("Using in-memory repository backend");
    let repo: Arc<dyn Repo> = Arc::new(InMemRepo::new());
    let users: Arc<dyn UserDirectory> = Arc::new(users);
    Ok((repo, users))
}

#[cfg(not(feature = "inmem-store"))]
fn in_memory_stores(_cfg: &AppConfig) -> anyhow::Result<(Arc<dyn Repo>, Arc<dyn UserDirectory>)> {
    anyhow::bail!("DATABASE_URL must be set when the inmem-store feature is disabled")
}
