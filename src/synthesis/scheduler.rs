/*!
 * Bounded-concurrency synthesis scheduling.
 *
 * Jobs are submitted in the order given (document order). A permit from a
 * semaphore is taken before each job is spawned, so at most
 * `max_concurrent_requests` requests are in flight and excess jobs wait in
 * submission order. Jobs complete in any order; each sends exactly one
 * `SynthesisResult` on the results channel. Artifacts are written under a
 * name derived from the segment order only.
 */

use log::{debug, error, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::app_config::Config;
use crate::errors::{ProviderError, SynthesisError};
use crate::file_utils::FileManager;
use crate::markup::flatten::SegmentKind;
use crate::providers::{ImageProvider, ImageRequest, SpeechProvider, SpeechRequest};
use crate::synthesis::manifest::SynthesisResult;
use crate::synthesis::retry::{RetryOutcome, RetryPolicy};

/// One generation request bound to its segment
#[derive(Debug, Clone)]
pub enum SynthesisJob {
    Image { order: usize, request: ImageRequest },
    Speech { order: usize, request: SpeechRequest },
}

impl SynthesisJob {
    pub fn order(&self) -> usize {
        match self {
            SynthesisJob::Image { order, .. } | SynthesisJob::Speech { order, .. } => *order,
        }
    }

    pub fn kind(&self) -> SegmentKind {
        match self {
            SynthesisJob::Image { .. } => SegmentKind::Image,
            SynthesisJob::Speech { .. } => SegmentKind::Text,
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of in-flight requests
    pub max_concurrent_requests: usize,
    /// Backoff schedule for every request
    pub retry: RetryPolicy,
    /// Directory receiving the artifacts of this run
    pub output_dir: PathBuf,
    /// Download generated images instead of reporting their URL
    pub download_images: bool,
}

impl SchedulerOptions {
    /// Options for a run writing into `output_dir`
    pub fn from_config(config: &Config, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_concurrent_requests: config.scheduler.max_concurrent_requests.max(1),
            retry: RetryPolicy::new(config.scheduler.retry_delays()),
            output_dir: output_dir.into(),
            download_images: config.image.download,
        }
    }
}

/// Runs synthesis jobs against the speech and image providers
#[derive(Debug, Clone)]
pub struct SynthesisScheduler {
    speech: Arc<dyn SpeechProvider>,
    images: Arc<dyn ImageProvider>,
    options: SchedulerOptions,
}

impl SynthesisScheduler {
    pub fn new(speech: Arc<dyn SpeechProvider>, images: Arc<dyn ImageProvider>, options: SchedulerOptions) -> Self {
        Self {
            speech,
            images,
            options,
        }
    }

    /// Submit every job and wait for all of them.
    ///
    /// Returns the number of jobs submitted. Results are delivered on
    /// `results` as they complete.
    pub async fn run(&self, jobs: Vec<SynthesisJob>, results: mpsc::UnboundedSender<SynthesisResult>) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_requests.max(1)));
        let mut tasks = JoinSet::new();
        let mut submitted = 0;

        for job in jobs {
            // Waiting here keeps submission in document order
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker pool closed: {}", e);
                    break;
                }
            };

            let worker = self.clone();
            let results = results.clone();
            submitted += 1;
            debug!("Submitting segment {} ({:?})", job.order(), job.kind());

            tasks.spawn(async move {
                let result = worker.process(job).await;
                drop(permit);
                if results.send(result).is_err() {
                    debug!("Result receiver dropped");
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Synthesis task panicked: {}", e);
            }
        }

        submitted
    }

    /// Run one job to completion, retries included
    pub async fn process(&self, job: SynthesisJob) -> SynthesisResult {
        let order = job.order();
        let kind = job.kind();
        let outcome = match job {
            SynthesisJob::Image { order, request } => self.process_image(order, request).await,
            SynthesisJob::Speech { order, request } => self.process_speech(order, request).await,
        };

        match outcome {
            Ok(location) => SynthesisResult::synthesized(order, kind, location),
            Err(e) => {
                warn!("{}", e);
                SynthesisResult::failed(order, kind, e.to_string())
            }
        }
    }

    async fn process_speech(&self, order: usize, request: SpeechRequest) -> Result<String, SynthesisError> {
        let label = format!("speech segment {}", order);
        let outcome = self
            .options
            .retry
            .run(&label, |_| {
                let speech = Arc::clone(&self.speech);
                let request = request.clone();
                async move { speech.synthesize(request).await }
            })
            .await;

        let audio = outcome_to_result(order, outcome)?;
        let path = FileManager::segment_artifact_path(&self.options.output_dir, order, &request.format);
        self.persist(order, &path, &audio).await?;
        Ok(path.display().to_string())
    }

    async fn process_image(&self, order: usize, request: ImageRequest) -> Result<String, SynthesisError> {
        let label = format!("image segment {}", order);
        let outcome = self
            .options
            .retry
            .run(&label, |_| {
                let images = Arc::clone(&self.images);
                let request = request.clone();
                async move { images.generate(request).await }
            })
            .await;

        let url = outcome_to_result(order, outcome)?;
        if !self.options.download_images {
            return Ok(url);
        }

        let label = format!("image download {}", order);
        let outcome = self
            .options
            .retry
            .run(&label, |_| {
                let images = Arc::clone(&self.images);
                let url = url.clone();
                async move { images.download(&url).await }
            })
            .await;

        let bytes = outcome_to_result(order, outcome)?;
        let path = FileManager::segment_artifact_path(&self.options.output_dir, order, &request.format);
        self.persist(order, &path, &bytes).await?;
        Ok(path.display().to_string())
    }

    async fn persist(&self, order: usize, path: &std::path::Path, bytes: &[u8]) -> Result<(), SynthesisError> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| SynthesisError::Artifact {
                order,
                message: format!("{}: {}", path.display(), e),
            })
    }
}

fn outcome_to_result<T>(order: usize, outcome: RetryOutcome<T, ProviderError>) -> Result<T, SynthesisError> {
    match outcome {
        RetryOutcome::Success { value, .. } => Ok(value),
        RetryOutcome::Failure { error, attempts } => Err(SynthesisError::Rejected {
            order,
            attempts,
            cause: error.to_string(),
        }),
        RetryOutcome::Exhausted { last_error, attempts } => Err(SynthesisError::RetryExhausted {
            order,
            attempts,
            last_error: last_error.to_string(),
        }),
    }
}
