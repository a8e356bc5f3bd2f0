use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    OrderPaidEvent,
    PaymentReceivedEvent,
    WithdrawalCompletedEvent,
};

/// The producer halves handed to the engines. Cloned freely; publishing with no registered
/// handler is a no-op.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_received_producers: Vec<EventProducer<PaymentReceivedEvent>>,
    pub order_paid_producers: Vec<EventProducer<OrderPaidEvent>>,
    pub withdrawal_completed_producers: Vec<EventProducer<WithdrawalCompletedEvent>>,
}

impl EventProducers {
    pub async fn publish_payment_received(&self, event: PaymentReceivedEvent) {
        for producer in &self.payment_received_producers {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_order_paid(&self, event: OrderPaidEvent) {
        for producer in &self.order_paid_producers {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_withdrawal_completed(&self, event: WithdrawalCompletedEvent) {
        for producer in &self.withdrawal_completed_producers {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_payment_received: Option<EventHandler<PaymentReceivedEvent>>,
    pub on_order_paid: Option<EventHandler<OrderPaidEvent>>,
    pub on_withdrawal_completed: Option<EventHandler<WithdrawalCompletedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        Self {
            on_payment_received: hooks.on_payment_received.map(|f| EventHandler::new(buffer_size, f)),
            on_order_paid: hooks.on_order_paid.map(|f| EventHandler::new(buffer_size, f)),
            on_withdrawal_completed: hooks.on_withdrawal_completed.map(|f| EventHandler::new(buffer_size, f)),
        }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_received {
            result.payment_received_producers.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_order_paid {
            result.order_paid_producers.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_withdrawal_completed {
            result.withdrawal_completed_producers.push(handler.subscribe());
        }
        result
    }

    pub fn start_handlers(self) {
        if let Some(handler) = self.on_payment_received {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_order_paid {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_withdrawal_completed {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_received: Option<Handler<PaymentReceivedEvent>>,
    pub on_order_paid: Option<Handler<OrderPaidEvent>>,
    pub on_withdrawal_completed: Option<Handler<WithdrawalCompletedEvent>>,
}

impl EventHooks {
    pub fn on_payment_received<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentReceivedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_received = Some(Arc::new(f));
        self
    }

    pub fn on_order_paid<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderPaidEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_paid = Some(Arc::new(f));
        self
    }

    pub fn on_withdrawal_completed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(WithdrawalCompletedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_withdrawal_completed = Some(Arc::new(f));
        self
    }
}
