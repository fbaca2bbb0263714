//! Worker pool for resolution and transformation
//!
//! A fixed number of tokio tasks pull jobs from one queue. Plugin code is
//! synchronous and may touch the file system, so each job runs on the
//! blocking thread pool. Workers never see the graph; they get an owned
//! job and send back an owned result.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::BuildOptions;
use crate::graph::NodeId;
use crate::plugins::PluginRegistry;
use crate::transform::{TransformOutcome, TransformPipeline, TransformRequest};
use crate::types::Dependency;

/// Work the coordinator hands out
#[derive(Debug, Clone)]
pub enum Job {
    Resolve {
        dep_node: NodeId,
        dependency: Dependency,
    },
    Transform {
        key: String,
        request: TransformRequest,
    },
}

/// What a worker sends back for a [`Job`]
#[derive(Debug)]
pub enum JobResult {
    Resolved {
        dep_node: NodeId,
        result: anyhow::Result<Option<PathBuf>>,
    },
    Transformed {
        key: String,
        request: TransformRequest,
        result: anyhow::Result<TransformOutcome>,
    },
    /// The job was dropped because the build was cancelled
    Cancelled,
}

struct Envelope {
    job: Job,
    reply: mpsc::UnboundedSender<JobResult>,
}

pub struct WorkerPool {
    queue: mpsc::UnboundedSender<Envelope>,
    cancelled: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers. Must be called inside a tokio runtime.
    pub fn new(size: usize, registry: Arc<PluginRegistry>, options: Arc<BuildOptions>) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel::<Envelope>();
        let receiver = Arc::new(Mutex::new(receiver));
        let cancelled = Arc::new(AtomicBool::new(false));

        let workers = (0..size.max(1))
            .map(|index| {
                let receiver = receiver.clone();
                let registry = registry.clone();
                let options = options.clone();
                let cancelled = cancelled.clone();

                tokio::spawn(async move {
                    loop {
                        let envelope = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        let Some(Envelope { job, reply }) = envelope else {
                            break;
                        };

                        let result = if cancelled.load(Ordering::SeqCst) {
                            JobResult::Cancelled
                        } else {
                            trace!("Worker {} running {:?}", index, job_label(&job));
                            run_job(job, registry.clone(), options.clone()).await
                        };

                        // The coordinator may have stopped listening after a failure
                        let _ = reply.send(result);
                    }
                    debug!("Worker {} stopped", index);
                })
            })
            .collect();

        Self {
            queue,
            cancelled,
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job; its result is sent on `reply`
    pub fn submit(&self, job: Job, reply: mpsc::UnboundedSender<JobResult>) -> anyhow::Result<()> {
        self.queue
            .send(Envelope { job, reply })
            .map_err(|_| anyhow!("Worker pool has shut down"))
    }

    /// Make workers skip every job that has not started yet
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Accept work again after a cancelled build
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.workers.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn job_label(job: &Job) -> String {
    match job {
        Job::Resolve { dependency, .. } => format!("resolve '{}'", dependency.specifier),
        Job::Transform { request, .. } => format!("transform {}", request.file_path.display()),
    }
}

async fn run_job(job: Job, registry: Arc<PluginRegistry>, options: Arc<BuildOptions>) -> JobResult {
    let fallback = job.clone();

    let handle = tokio::task::spawn_blocking(move || match job {
        Job::Resolve {
            dep_node,
            dependency,
        } => JobResult::Resolved {
            dep_node,
            result: registry.resolve(&dependency, &options.root),
        },
        Job::Transform { key, request } => {
            let result = TransformPipeline::new(&registry, &options).run(&request);
            JobResult::Transformed {
                key,
                request,
                result,
            }
        }
    });

    match handle.await {
        Ok(result) => result,
        Err(e) => {
            let error = anyhow!("Worker task failed: {}", e);
            match fallback {
                Job::Resolve { dep_node, .. } => JobResult::Resolved {
                    dep_node,
                    result: Err(error),
                },
                Job::Transform { key, request } => JobResult::Transformed {
                    key,
                    request,
                    result: Err(error),
                },
            }
        }
    }
}
