/*!
 * Tests for synthesis scheduling, retries and ordered assembly
 */

use anyhow::Result;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use narravox::errors::ProviderError;
use narravox::markup::SegmentKind;
use narravox::providers::mock::{MockBehavior, MockImages, MockSpeech};
use narravox::providers::{ImageProvider, ImageRequest, Prosody, SpeechProvider, SpeechRequest};
use narravox::synthesis::{
    ArtifactStatus, Manifest, OrderedAssembler, RetryOutcome, RetryPolicy, SchedulerOptions, SynthesisJob,
    SynthesisResult, SynthesisScheduler,
};
use crate::common::{self, ConcurrencyTracker};

fn options(dir: &Path, concurrency: usize) -> SchedulerOptions {
    SchedulerOptions {
        max_concurrent_requests: concurrency,
        retry: RetryPolicy::from_millis(&[1, 1, 1]),
        output_dir: dir.to_path_buf(),
        download_images: false,
    }
}

fn speech_job(order: usize) -> SynthesisJob {
    SynthesisJob::Speech {
        order,
        request: SpeechRequest {
            text: format!("line {}", order),
            reference_audio: Bytes::from_static(b"ref"),
            reference_transcript: "reference".to_string(),
            prosody: Prosody::default(),
            format: "mp3".to_string(),
        },
    }
}

fn image_job(order: usize) -> SynthesisJob {
    SynthesisJob::Image {
        order,
        request: ImageRequest {
            prompt: format!("scene {}", order),
            steps: 4,
            width: 64,
            height: 64,
            format: "webp".to_string(),
        },
    }
}

/// Schedule jobs and assemble their results the way a pipeline run does
async fn synthesize(
    speech: Arc<dyn SpeechProvider>,
    images: Arc<dyn ImageProvider>,
    options: SchedulerOptions,
    jobs: Vec<SynthesisJob>,
) -> Manifest {
    let assembler = OrderedAssembler::new(jobs.iter().map(|job| (job.order(), job.kind())));
    let scheduler = SynthesisScheduler::new(speech, images, options);
    let (tx, rx) = mpsc::unbounded_channel();
    let (_, manifest) = tokio::join!(scheduler.run(jobs, tx), assembler.collect(rx, |_, _, _| {}));
    manifest
}

#[tokio::test]
async fn test_scheduler_withRandomDelays_shouldProduceSortedManifest() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let speech = MockSpeech::random_delay(15);

    let mut jobs = Vec::new();
    for order in 0..30 {
        jobs.push(if order % 6 == 0 { image_job(order) } else { speech_job(order) });
    }

    let manifest = synthesize(
        Arc::new(speech.clone()),
        Arc::new(MockImages::new(MockBehavior::RandomDelay { max_delay_ms: 15 })),
        options(temp_dir.path(), 5),
        jobs,
    )
    .await;

    let orders: Vec<usize> = manifest.entries.iter().map(|e| e.order).collect();
    assert_eq!(orders, (0..30).collect::<Vec<_>>());
    assert!(manifest.is_complete());
    assert_eq!(speech.request_count(), 25);

    let entry = manifest.get(7).unwrap();
    assert_eq!(entry.kind, SegmentKind::Text);
    let artifact = temp_dir.path().join("segment_7.mp3");
    assert_eq!(entry.artifact.as_deref(), Some(artifact.display().to_string().as_str()));
    assert_eq!(std::fs::read(artifact)?, b"AUDIO:line 7");
    Ok(())
}

#[tokio::test]
async fn test_scheduler_withLimit_shouldNeverExceedConcurrency() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let tracker = ConcurrencyTracker::new(5);

    let manifest = synthesize(
        Arc::new(tracker.clone()),
        Arc::new(MockImages::working()),
        options(temp_dir.path(), 3),
        (0..12).map(speech_job).collect(),
    )
    .await;

    assert_eq!(manifest.len(), 12);
    assert!(tracker.peak() >= 1);
    assert!(tracker.peak() <= 3, "peak concurrency was {}", tracker.peak());
    Ok(())
}

#[tokio::test]
async fn test_scheduler_withFailingImages_shouldIsolateFailures() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let images = MockImages::failing();

    let manifest = synthesize(
        Arc::new(MockSpeech::working()),
        Arc::new(images.clone()),
        options(temp_dir.path(), 2),
        vec![image_job(0), speech_job(1), speech_job(2)],
    )
    .await;

    let image = manifest.get(0).unwrap();
    assert_eq!(image.status, ArtifactStatus::Failed);
    assert!(image.artifact.is_none());
    assert!(image.error.as_deref().unwrap_or("").contains("3 attempts"));
    assert_eq!(images.request_count(), 3);

    assert_eq!(manifest.count(ArtifactStatus::Synthesized), 2);
    Ok(())
}

#[tokio::test]
async fn test_scheduler_withRejectedRequest_shouldNotRetry() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let speech = MockSpeech::new(MockBehavior::Rejecting);

    let manifest = synthesize(
        Arc::new(speech.clone()),
        Arc::new(MockImages::working()),
        options(temp_dir.path(), 2),
        vec![speech_job(0)],
    )
    .await;

    let entry = manifest.get(0).unwrap();
    assert_eq!(entry.status, ArtifactStatus::Failed);
    let error = entry.error.as_deref().unwrap_or("");
    assert!(error.contains("rejected after 1 attempt"), "unexpected error: {}", error);
    assert!(!error.contains("failed after"));
    assert_eq!(speech.attempts_for("line 0"), 1);
    Ok(())
}

#[tokio::test]
async fn test_retry_policy_withPersistentFailure_shouldReportExhaustion() {
    let policy = RetryPolicy::from_millis(&[1, 2]);
    let outcome: RetryOutcome<(), ProviderError> = policy
        .run("always failing", |_| async {
            Err(ProviderError::ConnectionError("down".to_string()))
        })
        .await;

    assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 2, .. }));
}

#[tokio::test]
async fn test_retry_policy_withRecovery_shouldReportAttempts() {
    let policy = RetryPolicy::from_millis(&[1, 1, 1, 1]);
    let outcome = policy
        .run("recovering", |attempt| async move {
            if attempt < 3 {
                Err(ProviderError::RequestFailed(format!("attempt {}", attempt)))
            } else {
                Ok(attempt)
            }
        })
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts(), 3);
}

#[tokio::test]
async fn test_assembler_withClosedChannel_shouldMarkMissingAsFailed() {
    let assembler = OrderedAssembler::new([(0, SegmentKind::Image), (1, SegmentKind::Text), (2, SegmentKind::Text)]);
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(SynthesisResult::synthesized(2, SegmentKind::Text, "c")).unwrap();
    tx.send(SynthesisResult::synthesized(0, SegmentKind::Image, "a")).unwrap();
    drop(tx);

    let mut progress = Vec::new();
    let manifest = assembler.collect(rx, |result, done, _| progress.push((result.order, done))).await;

    assert_eq!(progress, vec![(2, 1), (0, 2)]);
    assert_eq!(manifest.len(), 3);
    assert_eq!(manifest.get(1).map(|e| e.status), Some(ArtifactStatus::Failed));
}
