//! Best-effort merchant callback delivery.
//!
//! Delivery is fire-and-forget: it runs on the event-hook task pool with a bounded timeout,
//! failures are logged and never touch order state, and the reconciliation path never waits on
//! a merchant endpoint.

use std::{future::Future, pin::Pin, time::Duration};

use chrono::Utc;
use log::*;
use serde_json::json;

use crate::events::{Handler, PaymentReceivedEvent};

const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_DELIVERY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!("📣️ Could not build the webhook HTTP client ({e}). Using the default client.");
            reqwest::Client::new()
        });
        Self { client }
    }

    /// Delivers the payment notification to the order's callback URL, if one is set.
    pub async fn notify_payment(&self, event: &PaymentReceivedEvent) {
        let order = &event.order;
        let Some(url) = order.callback.as_deref() else {
            return;
        };
        let body = json!({
            "order": order.order_id.as_str(),
            "payment_status": order.payment_status,
            "withdrawal_status": order.withdrawal_status,
            "amount": order.amount,
            "amount_repaid": order.repaid_amount,
            "currency": order.currency,
            "timestamp": Utc::now().to_rfc3339(),
            "transaction_hash": event.transaction_hash,
            "block_number": event.block_number,
        });
        match self.client.post(url).json(&body).send().await {
            Ok(res) if res.status().is_success() => {
                info!("📣️ Callback URL {url} notified for order {}", order.order_id);
            },
            Ok(res) => {
                error!("📣️ Callback URL {url} returned {} for order {}", res.status(), order.order_id);
            },
            Err(e) => {
                error!("📣️ Error notifying callback URL for order {}: {e}", order.order_id);
            },
        }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The event-hook adapter: wire this into [`EventHooks::on_payment_received`] to get callback
/// delivery off the reconciliation critical path.
///
/// [`EventHooks::on_payment_received`]: crate::events::EventHooks::on_payment_received
pub fn payment_received_hook(notifier: WebhookNotifier) -> Handler<PaymentReceivedEvent> {
    std::sync::Arc::new(move |event: PaymentReceivedEvent| {
        let notifier = notifier.clone();
        Box::pin(async move {
            notifier.notify_payment(&event).await;
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    })
}
