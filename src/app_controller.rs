use anyhow::{anyhow, Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::app_config::{Config, NarrationConfig};
use crate::errors::ResolutionError;
use crate::file_utils::FileManager;
use crate::markup::assignments::{AssignmentScanner, VoiceDeclaration};
use crate::markup::flatten::{FlattenOptions, FlattenWarning, Segment, SegmentFlattener};
use crate::markup::parser::{parse_document, ParseDiagnostic};
use crate::providers::{ImageRequest, Prosody, ProviderSet, SpeechRequest};
use crate::synthesis::{
    group_segments, ArtifactStatus, GroupingOutcome, Manifest, OrderedAssembler, SchedulerOptions, SynthesisJob,
    SynthesisResult, SynthesisScheduler,
};
use crate::voice::{
    CachingEmbedder, EmotionResolver, ReferenceAudio, ReferenceCatalog, ReferenceLoader, VoiceAssignments,
    VoiceBinding, VoiceRegistry, VoiceResolver,
};

// @module: Pipeline orchestration from script to manifest

/// Name of the manifest written into each run directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Name of the per-run log file
pub const RUN_LOG_FILE: &str = "run.log";

/// Static view of a script: what would be synthesized, without calling any service
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptAnalysis {
    /// Flattened segments in order
    pub segments: Vec<Segment>,
    /// Voice declarations found in assignment blocks
    pub declarations: Vec<VoiceDeclaration>,
    /// Recovered parse problems
    pub diagnostics: Vec<ParseDiagnostic>,
    /// Authoring lint warnings
    pub warnings: Vec<FlattenWarning>,
}

/// Parse and flatten a script.
///
/// Speaker tags are recognized from the configured list, the names declared
/// in the script's assignment blocks and `known_speakers`.
pub fn analyze_script<S: AsRef<str>>(
    config: &NarrationConfig,
    script: &str,
    known_speakers: &[S],
) -> Result<ScriptAnalysis> {
    let scanner = AssignmentScanner::new(&config.assignment_tag)
        .with_context(|| format!("Invalid assignment tag '{}'", config.assignment_tag))?;
    let declarations = scanner.declarations(script);

    let document = parse_document(script);
    let options = FlattenOptions::from_config(config)
        .with_speakers(known_speakers.iter().map(|s| s.as_ref()))
        .with_speakers(declarations.iter().map(|d| d.name.as_str()));
    let flattened = SegmentFlattener::new(options).flatten(&document.nodes);

    debug!(
        "Script flattened into {} segments from {} narration blocks",
        flattened.segments.len(),
        flattened.narration_blocks
    );

    Ok(ScriptAnalysis {
        segments: flattened.segments,
        declarations,
        diagnostics: document.diagnostics,
        warnings: flattened.warnings,
    })
}

/// Everything a pipeline run produced
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Directory holding this run's artifacts; absent when nothing was scheduled
    pub run_dir: Option<PathBuf>,
    /// Segments with their resolved voice, reference and artifact
    pub segments: Vec<Segment>,
    /// Voice bindings made or confirmed by this run
    pub bindings: Vec<VoiceBinding>,
    /// Ordered results
    pub manifest: Manifest,
    /// Recovered parse problems
    pub diagnostics: Vec<ParseDiagnostic>,
    /// Authoring lint warnings
    pub warnings: Vec<FlattenWarning>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl RunReport {
    /// Number of segments that produced an artifact
    pub fn synthesized(&self) -> usize {
        self.manifest.count(ArtifactStatus::Synthesized)
    }
}

/// Progress of a run, streamed to callers of [`Controller::run_with_events`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// One segment is accounted for; arrives in completion order
    Segment(SynthesisResult),
    /// Every segment has been reported and the run files are written
    Complete {
        run_dir: Option<PathBuf>,
        synthesized: usize,
        total: usize,
    },
}

/// Main application controller for narration synthesis
pub struct Controller {
    // @field: App configuration
    config: Config,
    providers: ProviderSet,
    registry: Arc<VoiceRegistry>,
    // Kept across runs so reprocessed scripts keep their first bindings
    assignments: VoiceAssignments,
    scanner: AssignmentScanner,
    references: ReferenceLoader,
}

impl Controller {
    /// Create a controller talking to the services named in the configuration
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let providers = ProviderSet::from_config(&config);
        Self::with_providers(config, providers).await
    }

    /// Create a controller with explicit collaborators, loading the catalog from disk
    pub async fn with_providers(config: Config, providers: ProviderSet) -> Result<Self> {
        let catalog = ReferenceCatalog::load(&config.voices.catalog_path)
            .with_context(|| format!("Failed to load voice catalog {:?}", config.voices.catalog_path))?;
        Self::with_catalog(config, providers, catalog).await
    }

    // @method: Build the voice registry and wire the pipeline
    pub async fn with_catalog(config: Config, providers: ProviderSet, catalog: ReferenceCatalog) -> Result<Self> {
        let scanner = AssignmentScanner::new(&config.narration.assignment_tag)
            .with_context(|| format!("Invalid assignment tag '{}'", config.narration.assignment_tag))?;

        let embedder = CachingEmbedder::new(Arc::clone(&providers.embeddings));
        let registry = VoiceRegistry::build(catalog, embedder).await?;
        if !registry.contains(&config.narration.default_voice_profile) {
            warn!(
                "Default voice profile '{}' is not in the catalog, unassigned speakers will not be voiced",
                config.narration.default_voice_profile
            );
        }

        let references = ReferenceLoader::new(config.voices.effective_reference_root(), providers.transcriber.clone());

        Ok(Self {
            config,
            providers,
            registry: Arc::new(registry),
            assignments: VoiceAssignments::new(),
            scanner,
            references,
        })
    }

    /// Replace the speaker bindings, e.g. with ones saved by an earlier session
    pub fn with_assignments(mut self, assignments: VoiceAssignments) -> Self {
        self.assignments = assignments;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &VoiceRegistry {
        &self.registry
    }

    /// Speaker bindings accumulated so far
    pub fn assignments(&self) -> &VoiceAssignments {
        &self.assignments
    }

    /// Flatten a script with the current bindings, without synthesis
    pub fn analyze(&self, script: &str) -> Result<ScriptAnalysis> {
        analyze_script(&self.config.narration, script, &self.assignments.speakers())
    }

    /// Run the pipeline on a script file
    pub async fn run_file(&self, input_file: &Path, output_root: &Path) -> Result<RunReport> {
        if !FileManager::file_exists(input_file) {
            return Err(anyhow!("Input file does not exist: {:?}", input_file));
        }
        let script = FileManager::read_to_string(input_file)?;
        info!("Processing {}", input_file.display());
        self.run(&script, output_root).await
    }

    /// Run the pipeline on a script: resolve voices, flatten, synthesize and
    /// write the manifest into a fresh directory under `output_root`
    pub async fn run(&self, script: &str, output_root: &Path) -> Result<RunReport> {
        self.run_streaming(script, output_root, None).await
    }

    /// Same as [`Controller::run`], sending every segment result to `events`
    /// as soon as it is known, then [`RunEvent::Complete`].
    ///
    /// A closed receiver does not interrupt the run.
    pub async fn run_with_events(
        &self,
        script: &str,
        output_root: &Path,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> Result<RunReport> {
        let report = self.run_streaming(script, output_root, Some(&events)).await?;
        let _ = events.send(RunEvent::Complete {
            run_dir: report.run_dir.clone(),
            synthesized: report.synthesized(),
            total: report.manifest.len(),
        });
        Ok(report)
    }

    async fn run_streaming(
        &self,
        script: &str,
        output_root: &Path,
        events: Option<&mpsc::UnboundedSender<RunEvent>>,
    ) -> Result<RunReport> {
        let start_time = Instant::now();

        if script.trim().is_empty() {
            info!("Empty script, nothing to synthesize");
            return Ok(RunReport::default());
        }

        let bindings = self.resolve_voices(script).await;
        let analysis = self.analyze(script)?;
        let mut report = RunReport {
            bindings,
            diagnostics: analysis.diagnostics,
            warnings: analysis.warnings,
            ..RunReport::default()
        };
        for warning in &report.warnings {
            warn!("{:?}", warning);
        }

        let mut segments = analysis.segments;
        if segments.is_empty() {
            info!("Script has no narration segments");
            report.elapsed = start_time.elapsed();
            return Ok(report);
        }

        let grouping = group_segments(&segments);
        let mut assembler = OrderedAssembler::new(segments.iter().map(|s| (s.order, s.kind)));
        for orphan in &grouping.orphans {
            assembler.record(SynthesisResult::orphaned(orphan.order));
        }

        let jobs = self.build_jobs(&grouping, &mut segments, &mut assembler).await;

        let run_dir = FileManager::create_run_directory(output_root, script)?;
        info!("Synthesizing {} segments into {}", jobs.len(), run_dir.display());

        let manifest = self.synthesize(jobs, assembler, &run_dir, events).await;

        for entry in &manifest.entries {
            if let Some(segment) = segments.get_mut(entry.order) {
                segment.artifact_location = entry.artifact.clone();
            }
        }

        self.write_run_files(&manifest, &run_dir)?;

        report.elapsed = start_time.elapsed();
        info!(
            "{}/{} segments synthesized in {}",
            manifest.count(ArtifactStatus::Synthesized),
            manifest.len(),
            Self::format_duration(report.elapsed)
        );

        report.segments = segments;
        report.manifest = manifest;
        report.run_dir = Some(run_dir);
        Ok(report)
    }

    /// Run every script of a directory, one after the other.
    ///
    /// A failing script is logged and skipped.
    pub async fn run_folder(&self, input_dir: &Path, output_root: &Path) -> Result<Vec<(PathBuf, RunReport)>> {
        let start_time = Instant::now();

        if !FileManager::dir_exists(input_dir) {
            return Err(anyhow!("Input directory does not exist: {:?}", input_dir));
        }

        let scripts = FileManager::find_scripts(input_dir)?;
        if scripts.is_empty() {
            return Err(anyhow!("No scripts found in directory: {:?}", input_dir));
        }

        let multi_progress = MultiProgress::new();
        let folder_pb = multi_progress.add(ProgressBar::new(scripts.len() as u64));
        folder_pb.set_style(Self::progress_style("scripts"));
        folder_pb.set_message("Processing scripts");

        let mut reports = Vec::new();
        let mut error_count = 0;

        for script in &scripts {
            let file_name = script
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            folder_pb.set_message(format!("Processing: {}", file_name));

            match self.run_file(script, output_root).await {
                Ok(report) => reports.push((script.clone(), report)),
                Err(e) => {
                    error!("Error processing script {}: {:#}", file_name, e);
                    error_count += 1;
                }
            }
            folder_pb.inc(1);
        }

        folder_pb.finish_with_message("Folder processing complete");

        let summary = format!(
            "Folder processing completed: {} processed, {} errors - Duration: {}",
            reports.len(),
            error_count,
            Self::format_duration(start_time.elapsed())
        );
        info!("{}", summary);

        let log_path = output_root.join("narravox.log");
        if let Err(e) = FileManager::append_to_log_file(&log_path, &format!("{} ({})", summary, input_dir.display())) {
            warn!("Failed to write folder log: {}", e);
        }

        Ok(reports)
    }

    /// Merge the script's voice declarations into the bindings.
    ///
    /// A script without any assignment block binds the default speaker.
    async fn resolve_voices(&self, script: &str) -> Vec<VoiceBinding> {
        let resolver = VoiceResolver::new(Arc::clone(&self.registry), self.scanner.clone());
        let mut bindings = resolver.resolve_script(script, &self.assignments).await;

        if !self.scanner.has_blocks(script) {
            let narration = &self.config.narration;
            bindings.push(resolver.bind_default(
                &narration.default_speaker,
                &narration.default_voice_profile,
                &self.assignments,
            ));
        }
        bindings
    }

    /// Turn grouped segments into jobs in submission order.
    ///
    /// Text segments whose voice or reference cannot be resolved are recorded
    /// as unresolved and get no job.
    async fn build_jobs(
        &self,
        grouping: &GroupingOutcome,
        segments: &mut [Segment],
        assembler: &mut OrderedAssembler,
    ) -> Vec<SynthesisJob> {
        let emotions = EmotionResolver::new(Arc::clone(&self.registry));
        let speech = &self.config.speech;
        let image = &self.config.image;
        let prosody = Prosody {
            speed: speech.speed,
            volume: speech.volume,
        };

        let mut jobs = Vec::new();
        for segment in grouping.submission_order() {
            if segment.is_image() {
                jobs.push(SynthesisJob::Image {
                    order: segment.order,
                    request: ImageRequest {
                        prompt: segment.content.clone(),
                        steps: image.steps,
                        width: image.width,
                        height: image.height,
                        format: image.format.clone(),
                    },
                });
                continue;
            }

            let profile = self
                .assignments
                .get(&segment.speaker)
                .unwrap_or_else(|| self.config.narration.default_voice_profile.clone());

            match self.resolve_reference(&emotions, &profile, &segment.emotion_raw).await {
                Ok((label, reference)) => {
                    if let Some(resolved) = segments.get_mut(segment.order) {
                        resolved.voice_profile = Some(profile);
                        resolved.reference_key = Some(label);
                    }
                    jobs.push(SynthesisJob::Speech {
                        order: segment.order,
                        request: SpeechRequest {
                            text: segment.content.clone(),
                            reference_audio: reference.audio,
                            reference_transcript: reference.transcript,
                            prosody,
                            format: speech.format.clone(),
                        },
                    });
                }
                Err(e) => {
                    warn!("Segment {} ('{}') left unresolved: {}", segment.order, segment.speaker, e);
                    assembler.record(SynthesisResult::unresolved(segment.order, e.to_string()));
                }
            }
        }
        jobs
    }

    async fn resolve_reference(
        &self,
        emotions: &EmotionResolver,
        profile: &str,
        emotion: &str,
    ) -> Result<(String, ReferenceAudio), ResolutionError> {
        let (_, entry) = emotions.resolve_in(profile, emotion).await?;
        let reference = self.references.load(&entry).await?;
        Ok((entry.raw_label, reference))
    }

    /// Schedule the jobs and assemble their results with a progress bar.
    ///
    /// Each result is forwarded to `events` once; results recorded before
    /// scheduling go out first.
    async fn synthesize(
        &self,
        jobs: Vec<SynthesisJob>,
        assembler: OrderedAssembler,
        run_dir: &Path,
        events: Option<&mpsc::UnboundedSender<RunEvent>>,
    ) -> Manifest {
        let scheduler = SynthesisScheduler::new(
            Arc::clone(&self.providers.speech),
            Arc::clone(&self.providers.images),
            SchedulerOptions::from_config(&self.config, run_dir),
        );

        let (done, total) = assembler.progress();
        let progress_bar = ProgressBar::new(total as u64);
        progress_bar.set_style(Self::progress_style("segments"));
        progress_bar.set_position(done as u64);
        progress_bar.set_message("Synthesizing");

        let send = |result: &SynthesisResult| {
            if let Some(tx) = events {
                let _ = tx.send(RunEvent::Segment(result.clone()));
            }
        };
        let mut emitted: BTreeSet<usize> = assembler
            .snapshot()
            .iter()
            .map(|result| {
                send(result);
                result.order
            })
            .collect();

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (submitted, manifest) = tokio::join!(
            scheduler.run(jobs, results_tx),
            assembler.collect(results_rx, |result, done, _total| {
                progress_bar.set_position(done as u64);
                if !result.is_synthesized() {
                    progress_bar.set_message(format!("segment {} failed", result.order));
                }
                emitted.insert(result.order);
                send(result);
            })
        );

        // Segments closed by the assembler without a result
        for entry in manifest.entries.iter().filter(|e| !emitted.contains(&e.order)) {
            send(entry);
        }

        progress_bar.finish_and_clear();
        debug!("{} synthesis jobs submitted", submitted);
        manifest
    }

    /// Write the manifest and append the run summary to the run log
    fn write_run_files(&self, manifest: &Manifest, run_dir: &Path) -> Result<()> {
        manifest
            .write_json(run_dir.join(MANIFEST_FILE))
            .context("Failed to write manifest")?;

        let log_path = run_dir.join(RUN_LOG_FILE);
        let mut lines = vec![format!(
            "Run finished: {} synthesized, {} failed, {} unresolved, {} orphaned",
            manifest.count(ArtifactStatus::Synthesized),
            manifest.count(ArtifactStatus::Failed),
            manifest.count(ArtifactStatus::Unresolved),
            manifest.count(ArtifactStatus::Orphaned),
        )];
        for entry in manifest.entries.iter().filter(|e| !e.is_synthesized()) {
            lines.push(format!(
                "[{:?}] segment {}: {}",
                entry.status,
                entry.order,
                entry.error.as_deref().unwrap_or("")
            ));
        }

        for line in lines {
            if let Err(e) = FileManager::append_to_log_file(&log_path, &line) {
                warn!("Failed to write run log: {}", e);
                break;
            }
        }
        Ok(())
    }

    fn progress_style(unit: &str) -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{percent}}%) {{msg}} {{eta}}",
                unit
            ))
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░")
    }

    // Format duration in a human-readable format (HH:MM:SS)
    fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}.{:03}s", seconds, duration.subsec_millis())
        }
    }
}
