use actix_web::{web, App, HttpServer};
use batch_chat_service::{
    config, db, error, logging,
    middleware::RequestLogging,
    redis_client::RedisClient,
    routes,
    state::AppState,
    storage::{BatchRepository, InMemoryBatchRepository, PgBatchRepository},
    websocket::pubsub::start_pubsub_listener,
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let repo: Arc<dyn BatchRepository> = match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, cfg.db_max_connections, cfg.storage.timeout())
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Arc::new(PgBatchRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory batch storage");
            Arc::new(InMemoryBatchRepository::new())
        }
    };

    let redis = match cfg.redis_url.as_deref() {
        Some(url) => Some(
            RedisClient::from_url(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?,
        ),
        None => {
            tracing::info!("REDIS_URL not set, fan-out is local to this instance");
            None
        }
    };

    let state = AppState::new(&cfg, repo, redis.clone());

    // Cross-instance fan-out: relay chat:* channels into the local registry
    if let Some(redis) = redis {
        tokio::spawn(start_pubsub_listener(
            redis,
            state.registry.clone(),
            state.fanout_listener.clone(),
            cfg.fanout.listener_retry(),
        ));
    }

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting batch-chat-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(RequestLogging)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure_routes)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("run: {e}")))
}
