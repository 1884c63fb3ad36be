//! Batching dispatcher and worker pool.
//!
//! A single dispatcher owns the `jobs` channel, groups incoming jobs into
//! batches bounded by size and latency, and hands full batches to workers
//! over an unbuffered `dispatch` channel. Batch buffers are recycled
//! through a `pool` channel sized to the worker count, which is the
//! pipeline's backpressure point: the dispatcher blocks on an empty pool
//! when every worker is busy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::models::Job;

/// Buffered capacity of the jobs channel
pub const JOBS_CHAN_SIZE: usize = 1000;

/// Processes one batch of reindex jobs
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process_jobs(&self, jobs: &[Job]);
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub max_batch_time: Duration,
    pub worker_concurrency: usize,
}

impl From<&Config> for PipelineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            batch_size: cfg.reindex_batch_size,
            max_batch_time: Duration::from_millis(cfg.reindex_max_time_msec),
            worker_concurrency: cfg.worker_concurrency,
        }
    }
}

/// Spawn the dispatcher and worker tasks; the returned sender feeds jobs
/// into the pipeline.
pub fn start_pipeline(
    cfg: PipelineConfig,
    processor: Arc<dyn JobProcessor>,
    shutdown: watch::Receiver<bool>,
) -> (mpsc::Sender<Job>, Vec<JoinHandle<()>>) {
    let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(JOBS_CHAN_SIZE);
    let (dispatch_tx, dispatch_rx) = mpsc::channel::<Vec<Job>>(1);
    let (pool_tx, pool_rx) = mpsc::channel::<Vec<Job>>(cfg.worker_concurrency);

    for _ in 0..cfg.worker_concurrency {
        pool_tx
            .try_send(Vec::with_capacity(cfg.batch_size))
            .expect("pool channel sized to the worker count");
    }

    let mut handles = Vec::with_capacity(cfg.worker_concurrency + 1);
    handles.push(tokio::spawn(dispatch_loop(
        cfg.clone(),
        jobs_rx,
        dispatch_tx,
        pool_rx,
        shutdown,
    )));

    let dispatch_rx = Arc::new(Mutex::new(dispatch_rx));
    for worker_id in 0..cfg.worker_concurrency {
        handles.push(tokio::spawn(worker_loop(
            worker_id,
            processor.clone(),
            dispatch_rx.clone(),
            pool_tx.clone(),
        )));
    }

    (jobs_tx, handles)
}

async fn dispatch_loop(
    cfg: PipelineConfig,
    mut jobs_rx: mpsc::Receiver<Job>,
    dispatch_tx: mpsc::Sender<Vec<Job>>,
    mut pool_rx: mpsc::Receiver<Vec<Job>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(mut batch) = pool_rx.recv().await else {
        return;
    };
    let sleep = tokio::time::sleep(cfg.max_batch_time);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            job = jobs_rx.recv() => {
                let Some(job) = job else { return };
                batch.push(job);
                if batch.len() == cfg.batch_size {
                    let full = std::mem::take(&mut batch);
                    if dispatch_tx.send(full).await.is_err() {
                        return;
                    }
                    let Some(fresh) = pool_rx.recv().await else { return };
                    batch = fresh;
                    sleep.as_mut().reset(Instant::now() + cfg.max_batch_time);
                }
            }
            _ = &mut sleep => {
                if !batch.is_empty() {
                    let full = std::mem::take(&mut batch);
                    if dispatch_tx.send(full).await.is_err() {
                        return;
                    }
                    let Some(fresh) = pool_rx.recv().await else { return };
                    batch = fresh;
                }
                sleep.as_mut().reset(Instant::now() + cfg.max_batch_time);
            }
            _ = shutdown.changed() => {
                // drain the in-flight batch before exiting
                if !batch.is_empty() {
                    let _ = dispatch_tx.send(std::mem::take(&mut batch)).await;
                }
                return;
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    processor: Arc<dyn JobProcessor>,
    dispatch_rx: Arc<Mutex<mpsc::Receiver<Vec<Job>>>>,
    pool_tx: mpsc::Sender<Vec<Job>>,
) {
    tracing::debug!(worker_id, "reindex worker started");
    loop {
        let batch = {
            let mut rx = dispatch_rx.lock().await;
            rx.recv().await
        };
        let Some(mut batch) = batch else { return };

        tracing::debug!(worker_id, jobs = batch.len(), "processing batch");
        processor.process_jobs(&batch).await;

        batch.clear();
        if pool_tx.send(batch).await.is_err() {
            return;
        }
    }
}
