pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod store;
pub mod switch;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::clients::AccountsClient;
use crate::config::Config;
use crate::middleware::filter_webhook_source;
use crate::services::{InboundService, TransactionService};
use crate::store::TransactionStore;
use crate::switch::SwitchClient;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TransactionStore>,
    pub transactions: TransactionService,
    pub inbound: InboundService,
    pub switch: SwitchClient,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn TransactionStore>, config: Config) -> Self {
        let accounts = AccountsClient::new(config.accounts_service_url.clone());
        let switch = SwitchClient::new(config.switch_url.clone(), config.switch_api_key.clone());

        Self {
            transactions: TransactionService::new(
                Arc::clone(&store),
                accounts.clone(),
                switch.clone(),
                &config,
            ),
            inbound: InboundService::new(Arc::clone(&store), accounts, switch.clone(), &config),
            store,
            switch,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    // The webhook is the only surface open to other banks; everything else
    // sits behind the bank's own perimeter.
    let webhook = Router::new()
        .route("/webhook/transfers", post(handlers::webhook::receive_transfer))
        .layer(axum::middleware::from_fn_with_state(
            state.config.allowed_webhook_ips.clone(),
            filter_webhook_source,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/transactions", post(handlers::transactions::create))
        .route("/transactions/:id", get(handlers::transactions::get_by_id))
        .route(
            "/transactions/reference/:reference",
            get(handlers::transactions::get_by_reference),
        )
        .route(
            "/accounts/:id/transactions",
            get(handlers::transactions::account_history),
        )
        .route(
            "/transactions/:id/reversal",
            post(handlers::transactions::request_reversal),
        )
        .route(
            "/transactions/:id/reconcile",
            post(handlers::transactions::reconcile),
        )
        .route("/banks", get(handlers::banks::list_banks))
        .route("/banks/health", get(handlers::banks::switch_health))
        .merge(webhook)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
