use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    PaymentSettledEvent,
    RefundIssuedEvent,
    ReservationChangedEvent,
};

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub reservation_changed_producer: Vec<EventProducer<ReservationChangedEvent>>,
    pub payment_settled_producer: Vec<EventProducer<PaymentSettledEvent>>,
    pub refund_issued_producer: Vec<EventProducer<RefundIssuedEvent>>,
}

impl EventProducers {
    pub async fn publish_reservation_changed(&self, event: ReservationChangedEvent) {
        for producer in &self.reservation_changed_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_payment_settled(&self, event: PaymentSettledEvent) {
        for producer in &self.payment_settled_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_refund_issued(&self, event: RefundIssuedEvent) {
        for producer in &self.refund_issued_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_reservation_changed: Option<EventHandler<ReservationChangedEvent>>,
    pub on_payment_settled: Option<EventHandler<PaymentSettledEvent>>,
    pub on_refund_issued: Option<EventHandler<RefundIssuedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_reservation_changed = hooks.on_reservation_changed.map(|f| EventHandler::new(buffer_size, f));
        let on_payment_settled = hooks.on_payment_settled.map(|f| EventHandler::new(buffer_size, f));
        let on_refund_issued = hooks.on_refund_issued.map(|f| EventHandler::new(buffer_size, f));
        Self { on_reservation_changed, on_payment_settled, on_refund_issued }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_reservation_changed {
            result.reservation_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_settled {
            result.payment_settled_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_refund_issued {
            result.refund_issued_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_reservation_changed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_payment_settled {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_refund_issued {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_reservation_changed: Option<Handler<ReservationChangedEvent>>,
    pub on_payment_settled: Option<Handler<PaymentSettledEvent>>,
    pub on_refund_issued: Option<Handler<RefundIssuedEvent>>,
}

impl EventHooks {
    pub fn on_reservation_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ReservationChangedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_reservation_changed = Some(Arc::new(f));
        self
    }

    pub fn on_payment_settled<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentSettledEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_payment_settled = Some(Arc::new(f));
        self
    }

    pub fn on_refund_issued<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(RefundIssuedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_refund_issued = Some(Arc::new(f));
        self
    }
}
