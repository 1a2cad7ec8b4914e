/*!
 * Tests for voice assignment and emotion resolution
 */

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use narravox::errors::ResolutionError;
use narravox::markup::AssignmentScanner;
use narravox::providers::mock::{MockEmbedder, MockTranscriber};
use narravox::voice::{
    BindingMethod, CachingEmbedder, EmotionMatchKind, EmotionResolver, ReferenceCatalog, ReferenceEntry,
    ReferenceLoader, ReferenceSource, VoiceAssignments, VoiceProfile, VoiceRegistry, VoiceResolver,
};
use crate::common;

fn source(path: &str) -> ReferenceSource {
    ReferenceSource::Path(PathBuf::from(path))
}

fn embedder() -> MockEmbedder {
    MockEmbedder::new()
        .with_vector("VoiceA", vec![1.0, 0.0])
        .with_vector("VoiceB", vec![0.0, 1.0])
        .with_vector("a gravelly old man", vec![0.1, 0.9])
        .with_vector("Angry", vec![0.9, 0.1])
        .with_vector("Calm", vec![0.0, 1.0])
        .with_vector("Furious", vec![1.0, 0.0])
}

async fn registry() -> Result<Arc<VoiceRegistry>> {
    let catalog = ReferenceCatalog::from_entries(vec![
        ("VoiceA", vec![("Joy_1", source("a/joy1.mp3")), ("Joy", source("a/joy.mp3"))]),
        ("VoiceB", vec![("Angry", source("b/angry.mp3")), ("Calm", source("b/calm.mp3"))]),
        ("Silent", vec![]),
    ]);
    let registry = VoiceRegistry::build(catalog, CachingEmbedder::new(Arc::new(embedder()))).await?;
    Ok(Arc::new(registry))
}

#[tokio::test]
async fn test_resolve_script_withRepeatedSpeaker_shouldKeepFirstBinding() -> Result<()> {
    let resolver = VoiceResolver::new(registry().await?, AssignmentScanner::default());
    let assignments = VoiceAssignments::new();

    let script = "<ASSIGN_VOICE>ALICE=VoiceA;ALICE=VoiceB;</ASSIGN_VOICE>";
    let bindings = resolver.resolve_script(script, &assignments).await;

    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0].method, BindingMethod::Exact);
    assert_eq!(bindings[1].method, BindingMethod::Retained);
    assert_eq!(assignments.get("alice").as_deref(), Some("VoiceA"));

    // A later script cannot rebind either
    resolver
        .resolve_script("<ASSIGN_VOICE>ALICE=VoiceB;</ASSIGN_VOICE>", &assignments)
        .await;
    assert_eq!(assignments.get("ALICE").as_deref(), Some("VoiceA"));
    Ok(())
}

#[tokio::test]
async fn test_resolve_script_withDescription_shouldPickNearestProfile() -> Result<()> {
    let resolver = VoiceResolver::new(registry().await?, AssignmentScanner::default());
    let assignments = VoiceAssignments::new();

    let bindings = resolver
        .resolve_script("<ASSIGN_VOICE>BOB=a gravelly old man;</ASSIGN_VOICE>", &assignments)
        .await;

    assert_eq!(bindings[0].profile, "VoiceB");
    assert!(matches!(bindings[0].method, BindingMethod::Similarity { .. }));
    Ok(())
}

#[tokio::test]
async fn test_bind_if_absent_withConcurrentWriters_shouldBindOnce() {
    let assignments = VoiceAssignments::new();
    let mut handles = Vec::new();
    for i in 0..16 {
        let assignments = assignments.clone();
        handles.push(tokio::spawn(async move {
            assignments.bind_if_absent("CAROL", &format!("Voice{}", i)).is_none()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(assignments.len(), 1);
}

#[tokio::test]
async fn test_emotion_resolve_withExactLabel_shouldBeatSimilarity() -> Result<()> {
    let registry = registry().await?;
    let resolver = EmotionResolver::new(Arc::clone(&registry));
    let profile = registry.require("VoiceA")?;

    // "Joy_1" and "Joy" clean to the same key; only an exact match reaches "Joy"
    let exact = resolver.resolve(profile, "Joy").await?;
    assert_eq!(exact.entry.raw_label, "Joy");
    assert_eq!(exact.kind, EmotionMatchKind::Exact);

    // Without an exact match the tie goes to the first catalog entry
    let similar = resolver.resolve(profile, "joy").await?;
    assert_eq!(similar.entry.raw_label, "Joy_1");
    assert!(matches!(similar.kind, EmotionMatchKind::Similarity { .. }));
    Ok(())
}

/// The exact key wins even when another key is strictly more similar
#[tokio::test]
async fn test_emotion_resolve_withExactLabel_shouldBeatHigherSimilarity() -> Result<()> {
    let entry = |label: &str, embedding: Vec<f32>| ReferenceEntry {
        raw_label: label.to_string(),
        cleaned_label: label.to_string(),
        audio: PathBuf::from(format!("{}.mp3", label)),
        transcript: None,
        embedding,
    };
    let profile = VoiceProfile {
        id: "Moody".to_string(),
        description_embedding: vec![1.0, 0.0],
        references: vec![entry("Calm", vec![0.0, 1.0]), entry("Stormy", vec![1.0, 0.0])],
    };
    // Embedding "Calm" lands on "Stormy", far from the stored "Calm" vector
    let mock = MockEmbedder::new().with_vector("Calm", vec![1.0, 0.0]);
    let registry = Arc::new(VoiceRegistry::from_profiles(vec![profile], CachingEmbedder::new(Arc::new(mock.clone()))));
    let resolver = EmotionResolver::new(Arc::clone(&registry));
    let profile = registry.require("Moody")?;

    let similar = resolver.resolve(profile, "calm").await?;
    assert_eq!(similar.entry.raw_label, "Stormy");
    assert!(matches!(similar.kind, EmotionMatchKind::Similarity { score } if score > 0.99));

    let exact = resolver.resolve(profile, "Calm").await?;
    assert_eq!(exact.entry.raw_label, "Calm");
    assert_eq!(exact.kind, EmotionMatchKind::Exact);
    assert_eq!(mock.call_count(), 1);
    Ok(())
}

/// A label made only of name parts and an index still gets a similarity key
#[tokio::test]
async fn test_registry_build_withLabelCleaningToNothing_shouldSucceed() -> Result<()> {
    let catalog = ReferenceCatalog::from_entries(vec![(
        "Moody",
        vec![("A_B_C_1", source("m/abc.mp3")), ("Moody_x_y_Calm_2", source("m/calm.mp3"))],
    )]);
    let mock = MockEmbedder::new()
        .with_vector("A B C 1", vec![1.0, 0.0])
        .with_vector("Calm", vec![0.0, 1.0])
        .with_vector("Serene", vec![0.1, 0.9]);
    let registry = Arc::new(VoiceRegistry::build(catalog, CachingEmbedder::new(Arc::new(mock))).await?);

    let profile = registry.require("Moody")?;
    assert_eq!(profile.references[0].cleaned_label, "A B C 1");
    assert_eq!(profile.references[1].cleaned_label, "Calm");

    let resolver = EmotionResolver::new(Arc::clone(&registry));
    let (_, exact) = resolver.resolve_in("Moody", "A_B_C_1").await?;
    assert_eq!(exact.raw_label, "A_B_C_1");
    let (_, similar) = resolver.resolve_in("Moody", "Serene").await?;
    assert_eq!(similar.raw_label, "Moody_x_y_Calm_2");
    Ok(())
}

#[tokio::test]
async fn test_emotion_resolve_withUnknownLabel_shouldUseNearestEmbedding() -> Result<()> {
    let registry = registry().await?;
    let resolver = EmotionResolver::new(Arc::clone(&registry));

    let (profile, entry) = resolver.resolve_in("VoiceB", "Furious").await?;
    assert_eq!(profile, "VoiceB");
    assert_eq!(entry.raw_label, "Angry");
    Ok(())
}

#[tokio::test]
async fn test_emotion_resolve_withMissingProfiles_shouldReportResolutionMiss() -> Result<()> {
    let registry = registry().await?;
    let resolver = EmotionResolver::new(registry);

    let unknown = resolver.resolve_in("Nobody", "Joy").await;
    assert!(matches!(unknown, Err(ResolutionError::UnknownVoiceProfile(_))));

    let empty = resolver.resolve_in("Silent", "Joy").await;
    assert!(matches!(empty, Err(ResolutionError::EmptyReferenceSet(_))));
    Ok(())
}

#[tokio::test]
async fn test_reference_loader_withTranscriptFile_shouldNotTranscribe() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    common::create_test_file(temp_dir.path(), "voice/joy.mp3", "RIFF")?;
    common::create_test_file(temp_dir.path(), "voice/joy_transcript.txt", "  I am so happy.\n")?;

    let transcriber = MockTranscriber::new("should not be used");
    let loader = ReferenceLoader::new(temp_dir.path(), Some(Arc::new(transcriber.clone())));
    let entry = ReferenceEntry {
        raw_label: "Joy".to_string(),
        cleaned_label: "Joy".to_string(),
        audio: PathBuf::from("voice/joy.mp3"),
        transcript: None,
        embedding: vec![1.0],
    };

    let reference = loader.load(&entry).await?;
    assert_eq!(reference.transcript, "I am so happy.");
    assert_eq!(reference.audio.as_ref(), b"RIFF");
    assert_eq!(transcriber.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_reference_loader_withoutAnyTranscript_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    common::create_test_file(temp_dir.path(), "voice/sad.mp3", "RIFF")?;

    let loader = ReferenceLoader::new(temp_dir.path(), None);
    let entry = ReferenceEntry {
        raw_label: "Sad".to_string(),
        cleaned_label: "Sad".to_string(),
        audio: PathBuf::from("voice/sad.mp3"),
        transcript: None,
        embedding: vec![1.0],
    };

    let result = loader.load(&entry).await;
    assert!(matches!(result, Err(ResolutionError::MissingTranscript(_))));
    Ok(())
}
