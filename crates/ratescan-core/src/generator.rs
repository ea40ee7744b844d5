//! Load generation at a fixed request rate
//!
//! A [`LoadGenerator`] issues requests at a constant frequency for a fixed
//! duration and streams back one [`Outcome`] per attempted request. The
//! stream closes once the last in-flight request has completed, which is
//! what lets a probe block on it without any extra signalling.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONNECTION};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::{GeneratorConfig, TargetConfig};
use crate::error::{RatescanError, Result};

/// Result of a single request
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Time from send to fully read response (or failure)
    pub latency: Duration,

    /// HTTP status, `None` when no response was received
    pub status: Option<u16>,

    /// Offset from the start of the attack at which the request was sent
    pub issued_at: Duration,

    /// Transport error description
    pub error: Option<String>,
}

impl Outcome {
    /// Outcome carrying an HTTP status
    pub fn with_status(status: u16, latency: Duration, issued_at: Duration) -> Self {
        Self {
            latency,
            status: Some(status),
            issued_at,
            error: None,
        }
    }

    /// Outcome for a request that never got a response
    pub fn failed(error: impl Into<String>, latency: Duration, issued_at: Duration) -> Self {
        Self {
            latency,
            status: None,
            issued_at,
            error: Some(error.into()),
        }
    }

    /// 2xx and 3xx responses count as successes; everything else is an error
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(code) if (200..400).contains(&code))
    }
}

/// Drives load against the target
pub trait LoadGenerator: Send + Sync {
    /// Start issuing `rate` requests per second for `duration`.
    ///
    /// Must be called from within a tokio runtime. The returned channel closes
    /// once every issued request has produced its outcome.
    fn attack(&self, rate: u32, duration: Duration) -> mpsc::Receiver<Outcome>;
}

/// Run the generator and discard every outcome, returning how many there were
pub async fn drain<G: LoadGenerator + ?Sized>(generator: &G, rate: u32, duration: Duration) -> u64 {
    let mut outcomes = generator.attack(rate, duration);
    let mut count = 0;
    while outcomes.recv().await.is_some() {
        count += 1;
    }
    count
}

/// Number of requests a fixed-rate attack issues
pub fn hit_count(rate: u32, duration: Duration) -> u64 {
    (u128::from(rate) * duration.as_nanos() / 1_000_000_000) as u64
}

/// Send offset of the `index`-th request at `rate`
pub fn hit_offset(rate: u32, index: u64) -> Duration {
    Duration::from_nanos((u128::from(index) * 1_000_000_000 / u128::from(rate.max(1))) as u64)
}

// ============================================================================
// HTTP GENERATOR
// ============================================================================

/// Request template sent on every hit
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub method: reqwest::Method,
    pub url: reqwest::Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl TargetSpec {
    /// Build the template from configuration and an already loaded body
    pub fn from_config(target: &TargetConfig, body: Option<Vec<u8>>) -> Result<Self> {
        let url = reqwest::Url::parse(&target.url)
            .map_err(|e| RatescanError::config(format!("invalid target url {:?}: {e}", target.url)))?;
        let method = reqwest::Method::from_bytes(target.method.as_bytes())
            .map_err(|_| RatescanError::config(format!("invalid http method {:?}", target.method)))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        for (name, value) in &target.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RatescanError::config(format!("invalid header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| RatescanError::config(format!("invalid value for header {name}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }
}

/// Fixed-schedule HTTP load generator backed by `reqwest`.
///
/// Request `i` is due at `i / rate` seconds after the start. Due requests wait
/// for one of `max_connections` permits; the send offset is taken after the
/// permit is granted, so a saturated generator shows up as a lower achieved rate.
pub struct HttpGenerator {
    client: reqwest::Client,
    target: Arc<TargetSpec>,
    max_connections: usize,
}

impl HttpGenerator {
    pub fn new(config: &GeneratorConfig, mut target: TargetSpec) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.max_timeout);

        if config.keep_alive {
            builder = builder.pool_max_idle_per_host(config.max_connections);
        } else {
            builder = builder.pool_max_idle_per_host(0);
            target
                .headers
                .insert(CONNECTION, HeaderValue::from_static("close"));
        }

        Ok(Self {
            client: builder.build()?,
            target: Arc::new(target),
            max_connections: config.max_connections,
        })
    }
}

impl LoadGenerator for HttpGenerator {
    fn attack(&self, rate: u32, duration: Duration) -> mpsc::Receiver<Outcome> {
        let (tx, rx) = mpsc::channel(self.max_connections.clamp(1, 4096) * 2);
        let client = self.client.clone();
        let target = self.target.clone();
        let permits = Arc::new(Semaphore::new(self.max_connections));
        let hits = hit_count(rate, duration);

        tokio::spawn(async move {
            let start = Instant::now();
            let mut in_flight = JoinSet::new();

            for index in 0..hits {
                sleep_until(start + hit_offset(rate, index)).await;

                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let issued_at = start.elapsed();
                let client = client.clone();
                let target = target.clone();
                let tx = tx.clone();

                in_flight.spawn(async move {
                    let outcome = hit(&client, &target, issued_at).await;
                    drop(permit);
                    if tx.send(outcome).await.is_err() {
                        debug!("outcome receiver dropped");
                    }
                });

                // Reap finished requests so the set does not grow with the run.
                while let Some(joined) = in_flight.try_join_next() {
                    if let Err(e) = joined {
                        warn!("request task failed: {}", e);
                    }
                }
            }

            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    warn!("request task failed: {}", e);
                }
            }
            debug!("attack at {} req/sec finished after {:?}", rate, start.elapsed());
        });

        rx
    }
}

async fn hit(client: &reqwest::Client, target: &TargetSpec, issued_at: Duration) -> Outcome {
    let mut request = client
        .request(target.method.clone(), target.url.clone())
        .headers(target.headers.clone());
    if let Some(body) = &target.body {
        request = request.body(body.clone());
    }

    let start = Instant::now();
    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            match response.bytes().await {
                Ok(_) => Outcome::with_status(status, start.elapsed(), issued_at),
                Err(e) => Outcome::failed(e.to_string(), start.elapsed(), issued_at),
            }
        }
        Err(e) => Outcome::failed(e.to_string(), start.elapsed(), issued_at),
    }
}
