//! Request handler definitions.
//!
//! Handlers stay thin: deserialize, call into the engine APIs, map errors onto HTTP statuses.
//! Anything longer than a few lines belongs in the engine, not here.

use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Responder};
use dot_payment_engine::{
    db_types::{Order, OrderId},
    rpc::RpcConnector,
    ConnectionManager,
    OrderFlowApi,
    OrderParams,
    SqliteDatabase,
    WithdrawalEngine,
};
use dpg_common::TokenAmount;
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::ServerError;

pub type Orders = OrderFlowApi<SqliteDatabase>;
pub type Withdrawals = Arc<WithdrawalEngine<SqliteDatabase, RpcConnector>>;
pub type Connection = Arc<ConnectionManager<RpcConnector>>;

/// Static server facts served by the status and health endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub version: String,
    pub instance_id: String,
    pub remark: String,
    pub chain_name: String,
    pub native_token: String,
    pub supported_currencies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderRequest {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub callback: Option<String>,
}

impl From<OrderRequest> for OrderParams {
    fn from(req: OrderRequest) -> Self {
        OrderParams {
            amount: req.amount.map(TokenAmount::from),
            currency: req.currency,
            callback: req.callback,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub existing: bool,
}

#[post("/v2/order/{order_id}")]
pub async fn create_or_update_order(
    path: web::Path<String>,
    body: web::Json<OrderRequest>,
    orders: web::Data<Orders>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId(path.into_inner());
    let (order, existing) = orders.create_or_update_order(&order_id, body.into_inner().into()).await?;
    let mut builder = if existing { HttpResponse::Ok() } else { HttpResponse::Created() };
    Ok(builder.json(OrderResponse { order, existing }))
}

#[get("/v2/order/{order_id}")]
pub async fn get_order(path: web::Path<String>, orders: web::Data<Orders>) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId(path.into_inner());
    let order = orders.get_order(&order_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

#[post("/v2/order/{order_id}/forceWithdrawal")]
pub async fn force_withdrawal(
    path: web::Path<String>,
    withdrawals: web::Data<Withdrawals>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId(path.into_inner());
    info!("💻️ Forced withdrawal requested for order {order_id}");
    let order = withdrawals.force_withdraw(&order_id).await?;
    Ok(HttpResponse::Created().json(order))
}

#[post("/v2/payment/{payment_account}")]
pub async fn payment_status(
    path: web::Path<String>,
    orders: web::Data<Orders>,
) -> Result<HttpResponse, ServerError> {
    let account = path.into_inner();
    let order = orders.get_order_by_payment_account(&account).await?;
    Ok(HttpResponse::Ok().json(order))
}

#[get("/v2/status")]
pub async fn status(info: web::Data<ServerInfo>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "server_info": {
            "version": info.version,
            "instance_id": info.instance_id,
            "remark": info.remark,
        },
        "chain_name": info.chain_name,
        "supported_currencies": info.supported_currencies,
    }))
}

#[get("/v2/health")]
pub async fn health(info: web::Data<ServerInfo>, connection: web::Data<Connection>) -> impl Responder {
    let connected_rpc = connection.active_endpoint().await;
    let health_status = if connected_rpc.is_some() { "connected" } else { "degraded" };
    HttpResponse::Ok().json(json!({
        "server_info": {
            "version": info.version,
            "instance_id": info.instance_id,
            "remark": info.remark,
        },
        "connected_rpcs": connected_rpc.into_iter().collect::<Vec<_>>(),
        "status": health_status,
    }))
}
