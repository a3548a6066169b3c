//! Long-lived worker owning the periodic health-check loop.
//!
//! One task runs [`HealthChecker::check_all`] on a fixed cadence. Other tasks
//! can ask for an immediate cycle through [`ProbeWorkerHandle::trigger_now`],
//! and the loop exits when its cancellation token fires.
use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::adapters::health_checker::HealthChecker;

/// Control surface of a running prober worker.
pub struct ProbeWorkerHandle {
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ProbeWorkerHandle {
    /// Request a cycle now. Requests made while a cycle runs collapse into one.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Stop the loop and wait for it to finish. An in-flight cycle is abandoned.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Prober worker ended abnormally: {}", e);
        }
    }
}

/// Spawn the worker. The first cycle runs immediately.
pub fn spawn_probe_worker(
    checker: Arc<HealthChecker>,
    every: Duration,
    cancel: CancellationToken,
) -> ProbeWorkerHandle {
    let trigger = Arc::new(Notify::new());
    let task = tokio::spawn(run(checker, every, trigger.clone(), cancel.clone()));
    ProbeWorkerHandle {
        trigger,
        cancel,
        task,
    }
}

async fn run(
    checker: Arc<HealthChecker>,
    every: Duration,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) {
    tracing::info!(
        "Prober worker started. Interval: {:?}, timeout: {:?}",
        every,
        checker.settings().timeout
    );

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {
                tracing::debug!("Health check cycle triggered on demand");
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            reports = checker.check_all() => {
                let (connected, other) = checker.connection_summary();
                tracing::debug!(
                    "Probed {} child servers: {} connected, {} not connected",
                    reports.len(),
                    connected,
                    other
                );
            }
        }
    }

    tracing::info!("Prober worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use hyper::{Request, Response, StatusCode};

    use super::*;
    use crate::{
        adapters::health_checker::ProbeSettings,
        core::{ChildServerDescriptor, GatewayState},
        ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    };

    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for CountingClient {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            Err(HttpClientError::ConnectionError(
                "not used in tests".to_string(),
            ))
        }

        async fn health_check(
            &self,
            _url: &str,
            _authorization: Option<&str>,
            _timeout: Duration,
        ) -> HttpClientResult<StatusCode> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StatusCode::OK)
        }
    }

    async fn wait_for_calls(client: &CountingClient, expected: usize) -> bool {
        for _ in 0..100 {
            if client.calls.load(Ordering::SeqCst) >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_trigger_now_runs_an_extra_cycle() {
        let state = Arc::new(GatewayState::default());
        state
            .register(ChildServerDescriptor::proxy("ado", "ado", "http://ado.local/mcp"))
            .unwrap();
        let client = Arc::new(CountingClient::default());
        let checker = Arc::new(HealthChecker::new(
            state,
            client.clone(),
            ProbeSettings::default(),
        ));

        let handle = spawn_probe_worker(
            checker,
            Duration::from_secs(3600),
            CancellationToken::new(),
        );

        // Initial cycle.
        assert!(wait_for_calls(&client, 1).await);
        handle.trigger_now();
        assert!(wait_for_calls(&client, 2).await);

        handle.shutdown().await;
        let after = client.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), after);
    }

    #[tokio::test]
    async fn test_external_cancellation_stops_worker() {
        let state = Arc::new(GatewayState::default());
        let checker = Arc::new(HealthChecker::new(
            state,
            Arc::new(CountingClient::default()),
            ProbeSettings::default(),
        ));
        let cancel = CancellationToken::new();
        let handle = spawn_probe_worker(checker, Duration::from_millis(10), cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
    }
}
