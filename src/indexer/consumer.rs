//! Durable stream consumer feeding the reindex pipeline

use async_nats::jetstream::{self, consumer::pull::Config as ConsumerConfig, AckKind};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::AppError;
use crate::models::Job;

/// Decode a stream message payload into a job. A decode failure means the
/// message is a poison pill and must be terminated, not redelivered.
pub fn route_message(payload: &[u8]) -> Result<Job, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Consumes the reindex subject through a named durable consumer.
pub struct StreamConsumer {
    nats_uri: String,
    stream_name: String,
    topic: String,
    durable: String,
}

impl StreamConsumer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            nats_uri: cfg.nats_uri.clone(),
            stream_name: cfg.nats_stream_name.clone(),
            topic: cfg.nats_subscriber_topic.clone(),
            durable: cfg.nats_subscriber_durable.clone(),
        }
    }

    /// Run the message loop until shutdown. Messages are acked before
    /// they are enqueued: every reindex re-reads upstream state, so a
    /// lost event is tolerable while head-of-line blocking is not.
    pub async fn run(
        self,
        jobs: mpsc::Sender<Job>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        let client = async_nats::connect(&self.nats_uri)
            .await
            .map_err(|err| AppError::Internal(format!("failed to connect to nats: {err}")))?;
        let context = jetstream::new(client);

        let subject = format!("{}.{}", self.stream_name, self.topic);
        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: self.stream_name.clone(),
                subjects: vec![format!("{}.>", self.stream_name)],
                ..Default::default()
            })
            .await
            .map_err(|err| AppError::Internal(format!("failed to get the stream: {err}")))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.durable,
                ConsumerConfig {
                    durable_name: Some(self.durable.clone()),
                    filter_subject: subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| {
                AppError::Internal(format!("failed to subscribe to the stream: {err}"))
            })?;

        let mut messages = consumer.messages().await.map_err(|err| {
            AppError::Internal(format!("failed to consume from the stream: {err}"))
        })?;

        tracing::info!(
            subject = %subject,
            durable = %self.durable,
            "reindexer ready to receive messages"
        );

        loop {
            tokio::select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        return Err(AppError::Internal(
                            "stream closed unexpectedly".to_string(),
                        ));
                    };
                    let message = match message {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::error!(error = %err, "failed to receive message");
                            continue;
                        }
                    };
                    match route_message(&message.payload) {
                        Ok(job) => {
                            if let Err(err) = message.ack().await {
                                tracing::error!(error = %err, "failed to ack the message");
                            }
                            if jobs.send(job).await.is_err() {
                                // pipeline gone, shutting down
                                return Ok(());
                            }
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "failed to decode message");
                            if let Err(err) = message.ack_with(AckKind::Term).await {
                                tracing::error!(error = %err, "failed to term the message");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    return Ok(());
                }
            }
        }
    }
}
