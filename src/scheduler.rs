//! Background payment reconciliation.
//!
//! One recurring task per process: sweeps pending payments once on start,
//! then on a fixed interval, until stopped. Idempotent settlement makes an
//! overlapping manual check harmless.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::services::payments::PaymentService;

pub struct ReconciliationScheduler {
    payments: Arc<PaymentService>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ReconciliationScheduler {
    pub fn new(payments: Arc<PaymentService>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            payments,
            interval,
            shutdown,
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Spawns the sweep loop. The first tick fires immediately.
    pub fn start(&self) {
        let mut guard = self.handle.lock().expect("scheduler lock poisoned");
        if guard.is_some() {
            debug!("Reconciliation scheduler already running");
            return;
        }

        let payments = self.payments.clone();
        let interval = self.interval;
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let summary = payments.reconcile_pending().await;
                        debug!(?summary, "Scheduler tick finished");
                    }
                    _ = shutdown.changed() => {
                        info!("Reconciliation scheduler stopping");
                        break;
                    }
                }
            }
        });

        *guard = Some(handle);
        info!(interval_secs = interval.as_secs(), "Reconciliation scheduler started");
    }

    /// Clears the timer. An in-flight sweep runs to completion.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Ok(mut guard) = self.handle.lock() {
            guard.take();
        }
    }
}

impl Drop for ReconciliationScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
