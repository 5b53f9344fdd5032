//! The Subscriber loop and the aggregation decision.
//!
//! Grounded on `usecase/subscriber.go`, with the 1-second polling ticker bug
//! removed: this loop blocks directly on
//! [`Transport::receive`] inside the main `select!`, with cancellation as
//! the only other wakeup, rather than polling a ticker as the Go prototype
//! did. Self-originated deliveries never reach the aggregation decision —
//! [`oracle_network::Libp2pTransport`] filters on `propagation_source`
//! before a message is ever forwarded out of the transport.

use oracle_crypto::Signer;
use oracle_network::Transport;
use oracle_storage::{PriceMessageRepository, WriteOutcome};
use oracle_types::Observation;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct SubscriberConfig {
    /// `Q`, the minimum number of distinct signatures required to attempt a
    /// durable write.
    pub min_signatures_to_write: usize,
    /// `ΔW`, the minimum spacing the Write gate enforces between commits.
    pub min_interval_between_writes: Duration,
}

/// Runs the Subscriber loop until `shutdown` is cancelled or the transport
/// closes.
pub async fn run(
    signer: Arc<Signer>,
    transport: Arc<dyn Transport>,
    repository: Arc<dyn PriceMessageRepository>,
    config: SubscriberConfig,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("subscriber loop shutting down");
                return;
            }
            delivery = transport.receive() => {
                match delivery {
                    Some(observation) => {
                        if let Err(e) = handle_delivery(
                            signer.as_ref(),
                            transport.as_ref(),
                            repository.as_ref(),
                            &config,
                            observation,
                        )
                        .await
                        {
                            tracing::warn!(error = %e, "subscriber failed to handle delivery");
                        }
                    }
                    None => {
                        tracing::info!("transport closed, subscriber exiting");
                        return;
                    }
                }
            }
        }
    }
}

/// The aggregation decision from spec §4.2, applied to one incoming,
/// already-foreign delivery.
async fn handle_delivery(
    signer: &Signer,
    transport: &dyn Transport,
    repository: &dyn PriceMessageRepository,
    config: &SubscriberConfig,
    mut observation: Observation,
) -> anyhow::Result<()> {
    if let Err(e) = observation.validate_structural() {
        tracing::info!(id = %observation.id, error = %e, "dropping malformed observation");
        return Ok(());
    }

    let node_id = signer.node_id();

    if observation.signature_count() >= config.min_signatures_to_write {
        observation.writer = node_id;
        match repository
            .store_if_allowed(&observation, config.min_interval_between_writes)
            .await
        {
            Ok(WriteOutcome::Committed) => {
                tracing::info!(id = %observation.id, "committed quorum-complete observation");
            }
            Ok(WriteOutcome::SkippedSpacing) => {
                tracing::debug!(id = %observation.id, "skipped: spacing not yet satisfied");
            }
            Err(e) => {
                tracing::warn!(id = %observation.id, error = %e, "write gate error");
            }
        }
        return Ok(());
    }

    if observation.already_signed_by(&node_id) {
        tracing::debug!(id = %observation.id, "already signed, dropping silently");
        return Ok(());
    }

    let signature = signer.sign(observation.price.as_bytes())?;
    observation.signers.push(node_id);
    observation.signatures.push(signature);
    transport.publish(&observation).await?;
    tracing::debug!(id = %observation.id, signatures = observation.signature_count(), "appended signature, re-emitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oracle_network::NetworkError;
    use oracle_storage::StoreError;
    use std::sync::Mutex;

    fn observation(signers: &[&str], signatures: &[&str]) -> Observation {
        Observation {
            id: "11111111-1111-1111-1111-111111111111".into(),
            price: "3000.00".into(),
            publisher: signers[0].to_string(),
            writer: String::new(),
            signers: signers.iter().map(|s| s.to_string()).collect(),
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
            created_at: 1_700_000_000,
            timestamp: None,
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        republished: Mutex<Vec<Observation>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, observation: &Observation) -> Result<(), NetworkError> {
            self.republished.lock().unwrap().push(observation.clone());
            Ok(())
        }

        async fn receive(&self) -> Option<Observation> {
            None
        }

        fn node_id(&self) -> String {
            "selfPeer".to_string()
        }
    }

    #[derive(Default)]
    struct FakeRepository {
        outcome: Mutex<Option<WriteOutcome>>,
        committed: Mutex<Vec<Observation>>,
    }

    impl FakeRepository {
        fn returning(outcome: WriteOutcome) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
                committed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PriceMessageRepository for FakeRepository {
        async fn store_if_allowed(
            &self,
            observation: &Observation,
            _min_interval: Duration,
        ) -> Result<WriteOutcome, StoreError> {
            let outcome = self.outcome.lock().unwrap().unwrap_or(WriteOutcome::Committed);
            if outcome == WriteOutcome::Committed {
                self.committed.lock().unwrap().push(observation.clone());
            }
            Ok(outcome)
        }
    }

    fn config(quorum: usize) -> SubscriberConfig {
        SubscriberConfig {
            min_signatures_to_write: quorum,
            min_interval_between_writes: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn below_quorum_and_not_yet_signed_appends_and_republishes() {
        let signer = Signer::generate();
        let transport = RecordingTransport::default();
        let repository = FakeRepository::returning(WriteOutcome::Committed);
        let obs = observation(&["peerA"], &["aabbcc"]);

        handle_delivery(&signer, &transport, &repository, &config(2), obs)
            .await
            .unwrap();

        let republished = transport.republished.lock().unwrap();
        assert_eq!(republished.len(), 1);
        assert_eq!(republished[0].signature_count(), 2);
        assert!(republished[0].already_signed_by(&signer.node_id()));
        assert!(repository.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_signed_is_dropped_silently() {
        let signer = Signer::generate();
        let transport = RecordingTransport::default();
        let repository = FakeRepository::returning(WriteOutcome::Committed);
        let obs = observation(&["peerA", &signer.node_id()], &["aabbcc", "ddeeff"]);

        handle_delivery(&signer, &transport, &repository, &config(3), obs)
            .await
            .unwrap();

        assert!(transport.republished.lock().unwrap().is_empty());
        assert!(repository.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn quorum_reached_invokes_write_gate_without_republishing() {
        let signer = Signer::generate();
        let transport = RecordingTransport::default();
        let repository = FakeRepository::returning(WriteOutcome::Committed);
        let obs = observation(&["peerA", "peerB"], &["aabbcc", "ddeeff"]);

        handle_delivery(&signer, &transport, &repository, &config(2), obs)
            .await
            .unwrap();

        assert!(transport.republished.lock().unwrap().is_empty());
        let committed = repository.committed.lock().unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].writer, signer.node_id());
    }

    #[tokio::test]
    async fn quorum_reached_but_spacing_unmet_is_silent() {
        let signer = Signer::generate();
        let transport = RecordingTransport::default();
        let repository = FakeRepository::returning(WriteOutcome::SkippedSpacing);
        let obs = observation(&["peerA", "peerB"], &["aabbcc", "ddeeff"]);

        let result = handle_delivery(&signer, &transport, &repository, &config(2), obs).await;

        assert!(result.is_ok());
        assert!(transport.republished.lock().unwrap().is_empty());
        assert!(repository.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_observation_is_dropped_before_aggregation() {
        let signer = Signer::generate();
        let transport = RecordingTransport::default();
        let repository = FakeRepository::returning(WriteOutcome::Committed);
        let mut obs = observation(&["peerA"], &["aabbcc"]);
        obs.price = "abc".to_string();

        handle_delivery(&signer, &transport, &repository, &config(2), obs)
            .await
            .unwrap();

        assert!(transport.republished.lock().unwrap().is_empty());
        assert!(repository.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn quorum_already_met_by_others_still_attempts_write_gate() {
        // Self is not among the signers, but quorum is already satisfied —
        // the peer must still attempt the write gate, never append.
        let signer = Signer::generate();
        let transport = RecordingTransport::default();
        let repository = FakeRepository::returning(WriteOutcome::Committed);
        let obs = observation(&["peerA", "peerB"], &["aabbcc", "ddeeff"]);

        handle_delivery(&signer, &transport, &repository, &config(2), obs)
            .await
            .unwrap();

        assert!(transport.republished.lock().unwrap().is_empty());
        assert_eq!(repository.committed.lock().unwrap().len(), 1);
    }
}
