//! Fan-out of one inbound notification into per-destination delivery jobs.

use std::sync::Arc;

use bytes::Bytes;
use hookrelay_delivery::metrics as delivery_metrics;
use hookrelay_delivery::{DeliveryJob, DeliveryQueueStorage, NewDeliveryJob, RetryPolicy};
use serde::Serialize;

use crate::metrics;
use crate::resolver::DestinationResolver;

/// Outcome of a dispatch. `queued + failed_to_queue == total_destinations`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub total_destinations: usize,
    pub queued: usize,
    pub failed_to_queue: usize,
}

/// Turns a notification into one queued delivery job per destination.
#[derive(Clone)]
pub struct FanoutCoordinator {
    resolver: DestinationResolver,
    queue: Arc<dyn DeliveryQueueStorage>,
    max_attempts: u32,
}

impl FanoutCoordinator {
    pub fn new(
        resolver: DestinationResolver,
        queue: Arc<dyn DeliveryQueueStorage>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            queue,
            max_attempts: retry.max_attempts,
        }
    }

    pub fn resolver(&self) -> &DestinationResolver {
        &self.resolver
    }

    pub fn queue(&self) -> &Arc<dyn DeliveryQueueStorage> {
        &self.queue
    }

    /// Resolves the identifier and enqueues one job per destination, in
    /// resolved order. Returns without waiting for any delivery.
    ///
    /// A failed enqueue is logged and counted; the remaining destinations are
    /// still enqueued.
    pub async fn dispatch(&self, phone_number_id: &str, payload: Bytes) -> DispatchSummary {
        metrics::record_dispatch();
        let destinations = self.resolver.resolve(phone_number_id).await;

        let mut summary = DispatchSummary {
            total_destinations: destinations.len(),
            ..Default::default()
        };

        if destinations.is_empty() {
            tracing::warn!(phone_number_id, "No destinations found for phone number");
            return summary;
        }

        for dest in destinations.iter() {
            let job = DeliveryJob::new(
                NewDeliveryJob {
                    destination_id: dest.destination_id,
                    destination_name: dest.destination_name.clone(),
                    endpoint: dest.endpoint.clone(),
                    phone_number_id: phone_number_id.to_string(),
                    payload: payload.clone(),
                },
                self.max_attempts,
            );

            match self.queue.enqueue(&job).await {
                Ok(()) => {
                    summary.queued += 1;
                    delivery_metrics::record_enqueued();
                    tracing::debug!(
                        job_id = %job.id,
                        destination = %dest.destination_name,
                        priority = dest.priority,
                        "Delivery job queued"
                    );
                }
                Err(e) => {
                    summary.failed_to_queue += 1;
                    tracing::error!(
                        phone_number_id,
                        destination = %dest.destination_name,
                        endpoint = %dest.endpoint,
                        error = %e,
                        "Failed to queue delivery job"
                    );
                }
            }
        }

        tracing::info!(
            phone_number_id,
            total = summary.total_destinations,
            queued = summary.queued,
            failed_to_queue = summary.failed_to_queue,
            "Webhook fanned out"
        );

        summary
    }
}
