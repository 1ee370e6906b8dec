use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::PlanStatus;

/// Domain events emitted by the plan manager, ledger and autopay
/// orchestrator. Consumers are in-process; emission is best-effort and
/// never fails the operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LayawayEvent {
    PlanCreated {
        plan_id: Uuid,
        customer_id: Uuid,
        installments: u32,
    },
    PlanStatusChanged {
        plan_id: Uuid,
        old_status: PlanStatus,
        new_status: PlanStatus,
    },
    PlanCancelled {
        plan_id: Uuid,
        skipped_payments: u64,
    },
    PaymentRecorded {
        plan_id: Uuid,
        payment_id: Uuid,
        transaction_id: String,
        amount: i64,
    },
    PaymentFailed {
        plan_id: Uuid,
        payment_id: Uuid,
        attempt_count: i32,
        terminal: bool,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<LayawayEvent>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<LayawayEvent>) -> Self {
        Self { sender }
    }

    /// Fire-and-forget emission; a full or closed channel only logs.
    pub fn emit(&self, event: LayawayEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("dropping layaway event: {}", e);
        }
    }
}

/// Creates a connected sender/receiver pair with the given buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<LayawayEvent>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Background consumer that logs every domain event. The surrounding
/// application is expected to replace this with notification fan-out.
pub async fn process_events(mut receiver: mpsc::Receiver<LayawayEvent>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            LayawayEvent::PlanCreated {
                plan_id,
                customer_id,
                installments,
            } => info!(%plan_id, %customer_id, installments, "plan created"),
            LayawayEvent::PlanStatusChanged {
                plan_id,
                old_status,
                new_status,
            } => info!(%plan_id, %old_status, %new_status, "plan status changed"),
            LayawayEvent::PlanCancelled {
                plan_id,
                skipped_payments,
            } => info!(%plan_id, skipped_payments, "plan cancelled"),
            LayawayEvent::PaymentRecorded {
                plan_id,
                payment_id,
                transaction_id,
                amount,
            } => info!(%plan_id, %payment_id, %transaction_id, amount, "payment recorded"),
            LayawayEvent::PaymentFailed {
                plan_id,
                payment_id,
                attempt_count,
                terminal,
                reason,
            } => warn!(%plan_id, %payment_id, attempt_count, terminal, %reason, "payment failed"),
        }
    }
}
