//! Reindex pipeline: stream consumer, batching dispatcher, worker pool

pub mod consumer;
pub mod pipeline;
pub mod worker;

pub use consumer::StreamConsumer;
pub use pipeline::{start_pipeline, JobProcessor, PipelineConfig, JOBS_CHAN_SIZE};
pub use worker::ReindexWorker;
