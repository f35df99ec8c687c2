//! Per-job progress fan-out.
//!
//! Each job gets one unbounded channel. Events published before anyone
//! subscribes are buffered in the channel; the single subscriber drains them
//! in order. The sender is dropped right after `Finished`, which ends the
//! subscriber's stream once the buffer is empty.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;

use futures::Stream;
use strata_core::models::TransferEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{TransferError, TransferResult};

pub type ProgressStream = Pin<Box<dyn Stream<Item = TransferEvent> + Send>>;

struct JobChannel {
    tx: Option<mpsc::UnboundedSender<TransferEvent>>,
    rx: Option<mpsc::UnboundedReceiver<TransferEvent>>,
}

#[derive(Default)]
pub struct ProgressBroadcaster {
    channels: Mutex<HashMap<Uuid, JobChannel>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobChannel>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the channel for a new job.
    pub fn register(&self, job_id: Uuid) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels().insert(
            job_id,
            JobChannel {
                tx: Some(tx),
                rx: Some(rx),
            },
        );
    }

    /// Publish an event. A `Finished` event closes the channel; anything
    /// published afterwards is dropped.
    pub fn publish(&self, job_id: Uuid, event: TransferEvent) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(&job_id) else {
            return;
        };
        let finished = event.is_finished();
        if let Some(tx) = channel.tx.as_ref() {
            // Send fails only when the subscriber went away; the job keeps running.
            let _ = tx.send(event);
        }
        if finished {
            channel.tx = None;
        }
    }

    /// Take the job's event stream. Only one subscriber is allowed per job.
    pub fn subscribe(&self, job_id: Uuid) -> TransferResult<ProgressStream> {
        let mut channels = self.channels();
        let channel = channels
            .get_mut(&job_id)
            .ok_or(TransferError::JobNotFound(job_id))?;
        let rx = channel
            .rx
            .take()
            .ok_or(TransferError::AlreadySubscribed(job_id))?;

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }

    /// Drop the job's channel and any undelivered events.
    pub fn remove(&self, job_id: Uuid) {
        self.channels().remove(&job_id);
    }
}
