/*!
 * End-to-end pipeline tests through the controller
 */

use anyhow::Result;
use std::collections::BTreeSet;
use std::fs;
use tokio::sync::mpsc;

use narravox::app_controller::{Controller, RunEvent, MANIFEST_FILE, RUN_LOG_FILE};
use narravox::markup::SegmentKind;
use narravox::providers::mock::{MockBehavior, MockImages, MockSpeech};
use narravox::synthesis::{ArtifactStatus, Manifest};
use narravox::voice::{BindingMethod, VoiceAssignments};
use crate::common::{self, NARRATOR};

const WORKED_EXAMPLE: &str =
    "<ASSIGN_VOICE>ALICE=VoiceA;</ASSIGN_VOICE><IMAGE 1>caption</IMAGE 1><ALICE><Joy>Hello.</Joy></ALICE>";

#[tokio::test]
async fn test_run_withWorkedExample_shouldProduceTwoEntryManifest() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let (controller, speech, images) = common::working_controller(temp_dir.path()).await?;

    let report = controller.run(WORKED_EXAMPLE, &temp_dir.path().join("out")).await?;

    assert_eq!(report.manifest.len(), 2);
    assert!(report.manifest.is_complete());

    let image = &report.segments[0];
    assert_eq!(image.kind, SegmentKind::Image);
    assert_eq!(image.content, "caption");
    assert_eq!(image.artifact_location, Some(MockImages::location_for("caption")));

    let line = &report.segments[1];
    assert_eq!(line.kind, SegmentKind::Text);
    assert_eq!(line.speaker, "ALICE");
    assert_eq!(line.emotion_raw, "Joy");
    assert_eq!(line.content, "Hello.");
    assert_eq!(line.voice_profile.as_deref(), Some("VoiceA"));
    assert_eq!(line.reference_key.as_deref(), Some("Joy"));

    assert_eq!(speech.request_count(), 1);
    assert_eq!(images.request_count(), 1);

    let run_dir = report.run_dir.expect("run directory");
    assert_eq!(fs::read(run_dir.join("segment_1.mp3"))?, b"AUDIO:Hello.");

    let written: Manifest = serde_json::from_str(&fs::read_to_string(run_dir.join(MANIFEST_FILE))?)?;
    assert_eq!(written, report.manifest);
    Ok(())
}

#[tokio::test]
async fn test_run_withEmptyScript_shouldReturnEmptyManifest() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let (controller, speech, _) = common::working_controller(temp_dir.path()).await?;

    let report = controller.run("  \n ", &temp_dir.path().join("out")).await?;

    assert!(report.manifest.is_empty());
    assert!(report.run_dir.is_none());
    assert_eq!(speech.request_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_run_withoutAssignments_shouldUseDefaultVoice() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let (controller, _, _) = common::working_controller(temp_dir.path()).await?;

    let script = "<Audiobook Narration><IMAGE 1>Hall</IMAGE 1>\
                  <STORYTELLER><Calm>Once upon a time.</Calm></STORYTELLER>\
                  <default>A plain line.</default></Audiobook Narration>";
    let report = controller.run(script, &temp_dir.path().join("out")).await?;

    assert_eq!(report.bindings.len(), 1);
    assert_eq!(report.bindings[0].speaker, "STORYTELLER");
    assert_eq!(report.bindings[0].method, BindingMethod::Default);

    assert!(report.manifest.is_complete());
    assert_eq!(report.segments[1].voice_profile.as_deref(), Some(NARRATOR));
    assert_eq!(report.segments[1].reference_key.as_deref(), Some("Calm"));
    assert_eq!(report.segments[2].speaker, "");
    assert_eq!(report.segments[2].voice_profile.as_deref(), Some(NARRATOR));
    assert_eq!(report.segments[2].reference_key.as_deref(), Some("default"));
    Ok(())
}

#[tokio::test]
async fn test_run_withOrphanAndUnresolvedSegments_shouldKeepThemInManifest() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let catalog = common::write_catalog(
        temp_dir.path(),
        &[(NARRATOR, &["default", "Calm"][..]), ("Broken", &["Joy"][..])],
    )?;
    fs::remove_file(temp_dir.path().join("Broken/Joy.mp3"))?;

    let speech = MockSpeech::working();
    let controller = Controller::with_providers(
        common::test_config(temp_dir.path(), &catalog),
        common::mock_providers(speech.clone(), MockImages::working()),
    )
    .await?;

    let script = "<ASSIGN_VOICE>EVE=Broken;</ASSIGN_VOICE>\
                  <Audiobook><Calm>Too early.</Calm><IMAGE 1>Hall</IMAGE 1>\
                  <EVE><Joy>Hi.</Joy></EVE><Calm>Fine.</Calm></Audiobook>";
    let report = controller.run(script, &temp_dir.path().join("out")).await?;

    let statuses: Vec<ArtifactStatus> = report.manifest.entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            ArtifactStatus::Orphaned,
            ArtifactStatus::Synthesized,
            ArtifactStatus::Unresolved,
            ArtifactStatus::Synthesized,
        ]
    );
    assert!(report.manifest.get(0).unwrap().artifact.is_none());
    assert!(report.manifest.get(2).unwrap().artifact.is_none());
    assert_eq!(speech.request_count(), 1);

    let log = fs::read_to_string(report.run_dir.unwrap().join(RUN_LOG_FILE))?;
    assert!(log.contains("1 unresolved, 1 orphaned"));
    Ok(())
}

#[tokio::test]
async fn test_run_withExhaustedSegment_shouldFinishOthers() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let catalog = common::default_catalog(temp_dir.path())?;
    let speech = MockSpeech::working().with_failure_predicate(|text| text == "Cursed line.");
    let controller = Controller::with_providers(
        common::test_config(temp_dir.path(), &catalog),
        common::mock_providers(speech.clone(), MockImages::working()),
    )
    .await?;

    let script = "<Audiobook><IMAGE 1>Crypt</IMAGE 1>\
                  <Calm>First line.</Calm><Calm>Cursed line.</Calm><Calm>Last line.</Calm></Audiobook>";
    let report = controller.run(script, &temp_dir.path().join("out")).await?;

    assert_eq!(report.manifest.len(), 4);
    assert_eq!(report.manifest.count(ArtifactStatus::Failed), 1);
    assert_eq!(report.manifest.get(2).map(|e| e.status), Some(ArtifactStatus::Failed));
    assert_eq!(report.synthesized(), 3);
    assert_eq!(speech.attempts_for("Cursed line."), 3);
    Ok(())
}

#[tokio::test]
async fn test_run_withReprocessedScript_shouldKeepFirstBinding() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let (controller, _, _) = common::working_controller(temp_dir.path()).await?;
    let out = temp_dir.path().join("out");

    controller.run(WORKED_EXAMPLE, &out).await?;

    let edited = "<ASSIGN_VOICE>ALICE=VoiceB;</ASSIGN_VOICE><IMAGE 1>caption</IMAGE 1><ALICE><Angry>Hello!</Angry></ALICE>";
    let report = controller.run(edited, &out).await?;

    assert_eq!(report.bindings[0].method, BindingMethod::Retained);
    assert_eq!(report.segments[1].voice_profile.as_deref(), Some("VoiceA"));
    assert_eq!(controller.assignments().get("ALICE").as_deref(), Some("VoiceA"));
    Ok(())
}

#[tokio::test]
async fn test_run_withSavedAssignments_shouldKeepBindingAcrossControllers() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let saved = temp_dir.path().join("assignments.json");
    let out = temp_dir.path().join("out");

    let (first, _, _) = common::working_controller(temp_dir.path()).await?;
    first.run(WORKED_EXAMPLE, &out).await?;
    first.assignments().save(&saved)?;

    let (second, _, _) = common::working_controller(temp_dir.path()).await?;
    let second = second.with_assignments(VoiceAssignments::load(&saved)?);
    let edited = "<ASSIGN_VOICE>ALICE=VoiceB;</ASSIGN_VOICE><IMAGE 1>caption</IMAGE 1><ALICE><Joy>Again.</Joy></ALICE>";
    let report = second.run(edited, &out).await?;

    assert_eq!(report.bindings[0].method, BindingMethod::Retained);
    assert_eq!(report.segments[1].voice_profile.as_deref(), Some("VoiceA"));
    Ok(())
}

#[tokio::test]
async fn test_run_withImageDownload_shouldWriteLocalArtifact() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let catalog = common::default_catalog(temp_dir.path())?;
    let mut config = common::test_config(temp_dir.path(), &catalog);
    config.image.download = true;

    let controller = Controller::with_providers(
        config,
        common::mock_providers(MockSpeech::working(), MockImages::working()),
    )
    .await?;

    let report = controller.run(WORKED_EXAMPLE, &temp_dir.path().join("out")).await?;
    let run_dir = report.run_dir.expect("run directory");
    let image = run_dir.join("segment_0.webp");

    assert_eq!(
        report.segments[0].artifact_location.as_deref(),
        Some(image.display().to_string().as_str())
    );
    let bytes = fs::read_to_string(&image)?;
    assert_eq!(bytes, format!("IMAGE:{}", MockImages::location_for("caption")));
    Ok(())
}

#[tokio::test]
async fn test_run_folder_withTwoScripts_shouldProduceTwoRuns() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let (controller, speech, _) = common::working_controller(temp_dir.path()).await?;

    let scripts = temp_dir.path().join("scripts");
    common::create_test_file(&scripts, "01.xml", WORKED_EXAMPLE)?;
    common::create_test_file(
        &scripts,
        "02.xml",
        "<Audiobook><IMAGE 1>Dock</IMAGE 1><Calm>The ship left.</Calm></Audiobook>",
    )?;

    let reports = controller.run_folder(&scripts, &temp_dir.path().join("out")).await?;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|(_, report)| report.manifest.is_complete()));
    assert_ne!(reports[0].1.run_dir, reports[1].1.run_dir);
    assert_eq!(speech.request_count(), 2);
    Ok(())
}

/// Analysis needs no generation service
#[test]
fn test_analyze_withWorkedExample_shouldNotCallServices() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let (controller, speech, images) = tokio_test::block_on(common::working_controller(temp_dir.path()))?;

    let analysis = controller.analyze(WORKED_EXAMPLE)?;

    assert_eq!(analysis.segments.len(), 2);
    assert_eq!(analysis.declarations[0].name, "ALICE");
    assert_eq!(analysis.declarations[0].description, "VoiceA");
    assert!(analysis.diagnostics.is_empty());
    assert_eq!(speech.request_count(), 0);
    assert_eq!(images.request_count(), 0);
    assert!(controller.assignments().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_run_with_events_withRandomDelays_shouldStreamEveryOrderBeforeComplete() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let catalog = common::default_catalog(temp_dir.path())?;
    let controller = Controller::with_providers(
        common::test_config(temp_dir.path(), &catalog),
        common::mock_providers(
            MockSpeech::random_delay(10),
            MockImages::new(MockBehavior::RandomDelay { max_delay_ms: 10 }),
        ),
    )
    .await?;

    let mut script = String::from("<Audiobook><Calm>Before any picture.</Calm>");
    for scene in 1..=4 {
        script.push_str(&format!("<IMAGE {n}>Scene {n}</IMAGE {n}>", n = scene));
        script.push_str(&format!("<Calm>First line of {n}.</Calm><Calm>Second line of {n}.</Calm>", n = scene));
    }
    script.push_str("</Audiobook>");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = controller.run_with_events(&script, &temp_dir.path().join("out"), tx).await?;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let (last, streamed) = events.split_last().expect("at least the completion event");
    assert_eq!(
        last,
        &RunEvent::Complete {
            run_dir: report.run_dir.clone(),
            synthesized: 12,
            total: 13,
        }
    );

    let mut seen = BTreeSet::new();
    for event in streamed {
        match event {
            RunEvent::Segment(result) => assert!(seen.insert(result.order), "segment {} streamed twice", result.order),
            RunEvent::Complete { .. } => panic!("completion arrived before every segment"),
        }
    }
    assert_eq!(seen, (0..13).collect::<BTreeSet<_>>());

    // The orphaned line is known before anything is scheduled
    assert!(matches!(&streamed[0], RunEvent::Segment(result) if result.status == ArtifactStatus::Orphaned));
    Ok(())
}

#[tokio::test]
async fn test_run_with_events_withEmptyScript_shouldOnlyComplete() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let (controller, _, _) = common::working_controller(temp_dir.path()).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.run_with_events(" ", &temp_dir.path().join("out"), tx).await?;

    assert_eq!(
        rx.recv().await,
        Some(RunEvent::Complete {
            run_dir: None,
            synthesized: 0,
            total: 0,
        })
    );
    assert_eq!(rx.recv().await, None);
    Ok(())
}
