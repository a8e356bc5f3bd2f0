use std::sync::Arc;

use actix_web::{dev::Server, middleware::Logger, web, App, HttpServer};
use dot_payment_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    keyring,
    rpc::RpcConnector,
    webhook,
    AssetCatalog,
    BlockWatcher,
    ConnectionManager,
    OrderFlowApi,
    ReconciliationEngine,
    SqliteDatabase,
    WebhookNotifier,
    WithdrawalEngine,
};
use log::*;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    routes::{self, ServerInfo},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    sqlx::migrate!("../dot_payment_engine/src/sqlite/migrations")
        .run(db.pool())
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let srv = create_server_instance(config, db)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(config: ServerConfig, db: SqliteDatabase) -> Result<Server, ServerError> {
    let active_chain = config.active_chain()?.clone();
    let recipient = keyring::canonicalize_address(&config.recipient)
        .map_err(|e| ServerError::ConfigurationError(format!("DPG_RECIPIENT is not a usable address: {e}")))?;

    let catalog = Arc::new(AssetCatalog::new(active_chain.clone()));
    let connection = ConnectionManager::new(
        config.chains.clone(),
        &config.chain_name,
        config.retry,
        RpcConnector::new(active_chain.clone()),
    );

    // Hook wiring: webhook delivery and the auto-sweep trigger run on detached handler tasks,
    // never on the block-processing path.
    let mut hooks = EventHooks::default();
    hooks.on_payment_received = Some(webhook::payment_received_hook(WebhookNotifier::new()));
    let withdrawals = WithdrawalEngine::new(
        db.clone(),
        Arc::clone(&connection),
        Arc::clone(&catalog),
        config.seed.clone(),
        EventProducers::default(),
    );
    let sweeper = Arc::clone(&withdrawals);
    hooks.on_order_paid(move |event| {
        let sweeper = Arc::clone(&sweeper);
        Box::pin(async move {
            let order_id = event.order.order_id.clone();
            if let Err(e) = sweeper.withdraw(&order_id).await {
                warn!("💸️ Automatic sweep for order {order_id} did not complete: {e}");
            }
        })
    });
    let handlers = EventHandlers::new(64, hooks);
    let producers = handlers.producers();
    handlers.start_handlers();

    let reconciler = Arc::new(ReconciliationEngine::new(db.clone(), producers, &config.chain_name));
    let watcher = BlockWatcher::new(Arc::clone(&connection), Arc::clone(&catalog), reconciler);
    // The watcher establishes the chain connection itself; connection retries therefore happen
    // off the request-serving path. If the subscription ends the process keeps serving reads,
    // with /v2/health reporting the degraded state.
    let (watcher_handle, watcher_shutdown) = watcher.spawn();
    tokio::spawn(async move {
        // Holding the shutdown handle here keeps the watcher alive for the life of the process.
        let _shutdown = watcher_shutdown;
        match watcher_handle.await {
            Ok(Ok(())) => info!("👀️ Block watcher stopped"),
            Ok(Err(e)) => error!("👀️ Block watcher exited with error: {e}"),
            Err(e) => error!("👀️ Block watcher task panicked: {e}"),
        }
    });

    let server_info = ServerInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: config.instance_id.clone(),
        remark: config.remark.clone(),
        chain_name: active_chain.name.clone(),
        native_token: active_chain.native_token.clone(),
        supported_currencies: std::iter::once(active_chain.native_token.clone())
            .chain(active_chain.assets.iter().map(|a| a.name.clone()))
            .collect(),
    };
    let orders_api = OrderFlowApi::new(db, Arc::clone(&catalog), config.seed.clone(), &recipient);
    let orders_data = web::Data::new(orders_api);
    let withdrawals_data = web::Data::new(withdrawals);
    let connection_data = web::Data::new(connection);
    let info_data = web::Data::new(server_info);

    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %U").log_target("dpg::access_log"))
            .app_data(orders_data.clone())
            .app_data(withdrawals_data.clone())
            .app_data(connection_data.clone())
            .app_data(info_data.clone())
            .service(routes::create_or_update_order)
            .service(routes::get_order)
            .service(routes::force_withdrawal)
            .service(routes::payment_status)
            .service(routes::status)
            .service(routes::health)
    })
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
