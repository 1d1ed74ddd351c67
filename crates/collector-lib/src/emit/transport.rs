//! Downstream transports for metric batches

use crate::models::MetricSample;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("endpoint rejected batch with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport closed")]
    Closed,
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Destination of every collected batch
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, samples: &[MetricSample]) -> Result<(), TransportError>;

    fn name(&self) -> &'static str;
}

/// Writes every datapoint to the log
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

impl LogTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, samples: &[MetricSample]) -> Result<(), TransportError> {
        for sample in samples {
            debug!(
                metric = %sample.metric,
                value = sample.value.as_f64(),
                dimensions = ?sample.dimensions,
                "Datapoint"
            );
        }
        info!(samples = samples.len(), "Batch written to log");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    datapoints: &'a [MetricSample],
}

/// POSTs each batch as JSON to an ingest endpoint
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = endpoint.into();
        reqwest::Url::parse(&endpoint)
            .with_context(|| format!("Invalid ingest URL: {}", endpoint))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, samples: &[MetricSample]) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&Payload {
                datapoints: samples,
            })
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        debug!(
            endpoint = %self.endpoint,
            samples = samples.len(),
            "Batch accepted"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Hands batches to an in-process receiver
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Vec<MetricSample>>,
}

impl ChannelTransport {
    /// Create a transport and the receiving end of its batches
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Vec<MetricSample>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, samples: &[MetricSample]) -> Result<(), TransportError> {
        self.tx
            .send(samples.to_vec())
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dimensions, MetricType, MetricValue};
    use chrono::Utc;
    use tokio_test::{assert_err, assert_ok};

    fn sample() -> MetricSample {
        MetricSample {
            metric: "kubernetes.pod_phase".to_string(),
            value: MetricValue::Int(2),
            metric_type: MetricType::Gauge,
            dimensions: Dimensions::from([("kubernetes_uid".to_string(), "p1".to_string())]),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_transport_delivers_batch() {
        let (transport, mut rx) = ChannelTransport::new(4);
        assert_ok!(transport.send(&[sample(), sample()]).await);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].metric, "kubernetes.pod_phase");
    }

    #[tokio::test]
    async fn test_channel_transport_closed() {
        let (transport, rx) = ChannelTransport::new(1);
        drop(rx);
        assert!(matches!(
            transport.send(&[sample()]).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_log_transport_accepts_everything() {
        assert_ok!(LogTransport::new().send(&[sample()]).await);
    }

    #[test]
    fn test_http_transport_rejects_bad_url() {
        assert_err!(HttpTransport::new("not a url", Duration::from_secs(1)));
        assert_ok!(HttpTransport::new(
            "http://localhost:9080/v2/datapoint",
            Duration::from_secs(1)
        ));
    }

    #[test]
    fn test_payload_shape() {
        let samples = vec![sample()];
        let json = serde_json::to_value(Payload {
            datapoints: &samples,
        })
        .unwrap();
        assert_eq!(json["datapoints"][0]["metric"], "kubernetes.pod_phase");
        assert_eq!(json["datapoints"][0]["value"], 2);
        assert_eq!(json["datapoints"][0]["metric_type"], "gauge");
    }
}
