//! Background probing of unhealthy endpoints.

use crate::config::BalancerConfig;
use crate::events::BalancerEvent;
use crate::{Endpoint, EndpointPool, HealthProbe};
use http::{Request, Response};
use http_body::Body;
use http_body_util::BodyExt;
#[cfg(feature = "metrics")]
use metrics::{counter, gauge};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_service::Service;

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Endpoints that passed their probe and were put back into rotation.
    pub promoted: Vec<Endpoint>,
    /// Endpoints whose probe failed; they stay unhealthy.
    pub failed: Vec<Endpoint>,
    /// True if a stop signal cut the pass short.
    pub interrupted: bool,
}

impl RecoveryReport {
    /// Number of endpoints probed in this pass.
    pub fn probed(&self) -> usize {
        self.promoted.len() + self.failed.len()
    }
}

/// Probes every unhealthy endpoint of a pool on a fixed interval.
pub(crate) struct RecoveryLoop<S, P, B> {
    pool: Arc<EndpointPool>,
    config: Arc<BalancerConfig<P>>,
    executor: S,
    stop: watch::Receiver<bool>,
    _request_body: PhantomData<fn() -> B>,
}

impl<S, P, B, ResB> RecoveryLoop<S, P, B>
where
    S: Service<Request<B>, Response = Response<ResB>>,
    S::Error: fmt::Display,
    ResB: Body,
    ResB::Error: fmt::Display,
    B: Default,
    P: HealthProbe<B>,
{
    pub(crate) fn new(
        pool: Arc<EndpointPool>,
        config: Arc<BalancerConfig<P>>,
        executor: S,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            config,
            executor,
            stop,
            _request_body: PhantomData,
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    /// Run until the stop signal fires.
    pub(crate) async fn run(mut self) {
        let period = self.config.probe_interval;

        #[cfg(feature = "tracing")]
        tracing::info!(
            balancer = %self.config.name,
            interval = ?period,
            endpoints = self.pool.len(),
            "recovery loop started"
        );

        if !self.config.initial_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.config.initial_delay) => {}
                _ = self.stop.changed() => {}
            }
        }

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        while !self.stop_requested() {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.stop.changed() => continue,
            }
            self.tick().await;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(balancer = %self.config.name, "recovery loop stopped");
    }

    /// Probe every endpoint that is unhealthy right now, one at a time.
    ///
    /// A failure on one endpoint never prevents the others from being probed.
    /// The stop signal is checked before each probe; a probe already in
    /// flight is allowed to finish.
    pub(crate) async fn tick(&mut self) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for endpoint in self.pool.unhealthy() {
            if self.stop_requested() {
                report.interrupted = true;
                break;
            }

            match self.probe(&endpoint).await {
                Ok(()) => {
                    #[cfg(feature = "metrics")]
                    counter!("balancer_probes_total", "balancer" => self.config.name.clone(), "outcome" => "success").increment(1);

                    if self.pool.promote(&endpoint) {
                        self.on_promoted(&endpoint);
                    }
                    report.promoted.push(endpoint);
                }
                Err(reason) => {
                    #[cfg(feature = "metrics")]
                    counter!("balancer_probes_total", "balancer" => self.config.name.clone(), "outcome" => "failure").increment(1);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        balancer = %self.config.name,
                        endpoint = %endpoint,
                        %reason,
                        "probe failed, endpoint stays unhealthy"
                    );

                    self.config.emit(|| BalancerEvent::ProbeFailed {
                        pattern_name: self.config.name.clone(),
                        timestamp: Instant::now(),
                        endpoint: endpoint.address().to_string(),
                        reason,
                    });
                    report.failed.push(endpoint);
                }
            }
        }

        report
    }

    async fn probe(&mut self, endpoint: &Endpoint) -> Result<(), String> {
        let mut request = Request::new(B::default());
        endpoint.apply_to(&mut request);

        let probe = Arc::clone(&self.config.probe);
        if !probe.check(endpoint, &mut request, None) {
            return Err("probe request could not be prepared".to_string());
        }

        // The executor consumes the request; the judge gets its head back.
        let mut sent = Request::new(B::default());
        *sent.method_mut() = request.method().clone();
        *sent.uri_mut() = request.uri().clone();
        *sent.headers_mut() = request.headers().clone();

        let response = self
            .executor
            .ready()
            .await
            .map_err(|e| format!("executor not ready: {e}"))?
            .call(request)
            .await
            .map_err(|e| format!("probe request failed: {e}"))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| format!("reading probe response failed: {e}"))?
            .to_bytes();
        let response = Response::from_parts(parts, body);

        if probe.check(endpoint, &mut sent, Some(&response)) {
            Ok(())
        } else {
            Err(format!("probe rejected response with status {}", response.status()))
        }
    }

    fn on_promoted(&self, endpoint: &Endpoint) {
        let healthy = self.pool.healthy_count();

        #[cfg(feature = "tracing")]
        tracing::info!(
            balancer = %self.config.name,
            endpoint = %endpoint,
            healthy,
            "endpoint recovered, back in rotation"
        );

        #[cfg(feature = "metrics")]
        {
            counter!("balancer_transitions_total", "balancer" => self.config.name.clone(), "to" => "healthy").increment(1);
            gauge!("balancer_healthy_endpoints", "balancer" => self.config.name.clone()).set(healthy as f64);
        }

        self.config.emit(|| BalancerEvent::Promoted {
            pattern_name: self.config.name.clone(),
            timestamp: Instant::now(),
            endpoint: endpoint.address().to_string(),
            healthy_remaining: healthy,
        });
    }
}

/// Owns a running recovery loop.
///
/// Dropping the handle signals the loop to stop without waiting for it.
pub(crate) struct RecoveryHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RecoveryHandle {
    /// Spawn `recovery` onto the current Tokio runtime.
    pub(crate) fn spawn<S, P, B, ResB>(
        pool: Arc<EndpointPool>,
        config: Arc<BalancerConfig<P>>,
        executor: S,
    ) -> Self
    where
        S: Service<Request<B>, Response = Response<ResB>> + Send + 'static,
        S::Future: Send,
        S::Error: fmt::Display + Send,
        ResB: Body + Send + 'static,
        ResB::Data: Send,
        ResB::Error: fmt::Display + Send,
        B: Default + Send + 'static,
        P: HealthProbe<B> + 'static,
    {
        let (stop, stop_rx) = watch::channel(false);
        let recovery = RecoveryLoop::new(pool, config, executor, stop_rx);
        let task = tokio::spawn(recovery.run());
        Self {
            stop,
            task: Some(task),
        }
    }

    /// Whether the loop task is still running.
    pub(crate) fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the loop and wait for it to exit.
    ///
    /// A probe in flight completes first; no new probe starts.
    pub(crate) async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RecoveryHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}
