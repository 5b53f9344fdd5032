//! The Publisher loop: fetch a price, sign it as a fresh Observation, emit
//! it to the topic, on a fixed interval.
//!
//! Grounded on `usecase/publisher.go`. The
//! Publisher is deliberately stateless — it never consults signers already
//! collected on prior observations, so independent origination by every
//! peer on every tick is the expected steady state, not a race to avoid.

use oracle_crypto::Signer;
use oracle_feed::PriceTicker;
use oracle_network::Transport;
use oracle_types::Observation;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct PublisherConfig {
    pub fetch_price_interval: Duration,
}

/// Runs the Publisher loop until `shutdown` is cancelled.
pub async fn run(
    signer: Arc<Signer>,
    ticker: Arc<dyn PriceTicker>,
    transport: Arc<dyn Transport>,
    config: PublisherConfig,
    shutdown: CancellationToken,
) {
    let mut tick = tokio::time::interval(config.fetch_price_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("publisher loop shutting down");
                return;
            }
            _ = tick.tick() => {
                if let Err(e) = publish_once(signer.as_ref(), ticker.as_ref(), transport.as_ref()).await {
                    tracing::warn!(error = %e, "publisher tick failed");
                }
            }
        }
    }
}

async fn publish_once(
    signer: &Signer,
    ticker: &dyn PriceTicker,
    transport: &dyn Transport,
) -> anyhow::Result<()> {
    let price = ticker.fetch_price().await?;
    let node_id = signer.node_id();
    let signature = signer.sign(price.as_bytes())?;

    let observation = Observation {
        id: Uuid::new_v4().to_string(),
        price,
        publisher: node_id.clone(),
        writer: String::new(),
        signers: vec![node_id],
        signatures: vec![signature],
        created_at: chrono::Utc::now().timestamp(),
        timestamp: None,
    };

    transport.publish(&observation).await?;
    tracing::info!(id = %observation.id, price = %observation.price, "published observation");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oracle_feed::FeedError;
    use oracle_network::NetworkError;
    use std::sync::Mutex;

    struct FixedTicker(&'static str);

    #[async_trait]
    impl PriceTicker for FixedTicker {
        async fn fetch_price(&self) -> Result<String, FeedError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingTicker;

    #[async_trait]
    impl PriceTicker for FailingTicker {
        async fn fetch_price(&self) -> Result<String, FeedError> {
            Err(FeedError::FetchFailed("network down".into()))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        published: Mutex<Vec<Observation>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, observation: &Observation) -> Result<(), NetworkError> {
            self.published.lock().unwrap().push(observation.clone());
            Ok(())
        }

        async fn receive(&self) -> Option<Observation> {
            None
        }

        fn node_id(&self) -> String {
            "peerA".to_string()
        }
    }

    #[tokio::test]
    async fn publish_once_emits_a_single_self_signed_observation() {
        let signer = Signer::generate();
        let ticker = FixedTicker("3000.00");
        let transport = RecordingTransport::default();

        publish_once(&signer, &ticker, &transport).await.unwrap();

        let published = transport.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let obs = &published[0];
        assert_eq!(obs.price, "3000.00");
        assert_eq!(obs.publisher, signer.node_id());
        assert_eq!(obs.signers, vec![signer.node_id()]);
        assert_eq!(obs.signatures.len(), 1);
        assert!(obs.writer.is_empty());
        assert!(obs.timestamp.is_none());
    }

    #[tokio::test]
    async fn fetch_failure_publishes_nothing() {
        let signer = Signer::generate();
        let transport = RecordingTransport::default();

        let result = publish_once(&signer, &FailingTicker, &transport).await;

        assert!(result.is_err());
        assert!(transport.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn distinct_ticks_allocate_distinct_ids() {
        let signer = Signer::generate();
        let ticker = FixedTicker("3000.00");
        let transport = RecordingTransport::default();

        publish_once(&signer, &ticker, &transport).await.unwrap();
        publish_once(&signer, &ticker, &transport).await.unwrap();

        let published = transport.published.lock().unwrap();
        assert_ne!(published[0].id, published[1].id);
    }
}
