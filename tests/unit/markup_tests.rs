/*!
 * Tests for markup parsing, flattening and rendering
 */

use narravox::markup::{
    parse_document, render_segments, DiagnosticKind, FlattenOptions, FlattenWarning, FlattenedScript, RenderOptions,
    Segment, SegmentFlattener, SegmentKind,
};

fn flatten(source: &str, speakers: &[&str]) -> FlattenedScript {
    let document = parse_document(source);
    let options = FlattenOptions::default().with_speakers(speakers.iter().copied());
    SegmentFlattener::new(options).flatten(&document.nodes)
}

/// (kind, speaker, emotion, content) of each segment
fn shape(segments: &[Segment]) -> Vec<(SegmentKind, String, String, String)> {
    segments
        .iter()
        .map(|s| (s.kind, s.speaker.clone(), s.emotion_raw.clone(), s.content.clone()))
        .collect()
}

const CHAPTER: &str = r#"
<Audiobook Narration>
<IMAGE 1>A candle-lit hall</IMAGE 1>
<STORYTELLER><Calm>The hall was quiet.</Calm></STORYTELLER>
<JOHN><Angry>Who goes there?</Angry></JOHN>
<NICOLE><Whisper>Only me.</Whisper> Do not shout.</NICOLE>
<IMAGE 2>A narrow stair</IMAGE 2>
They climbed.
</Audiobook Narration>
"#;

#[test]
fn test_flatten_withChapter_shouldProduceDenseOrders() {
    let result = flatten(CHAPTER, &["JOHN", "NICOLE"]);
    let orders: Vec<usize> = result.segments.iter().map(|s| s.order).collect();
    assert_eq!(orders, (0..result.segments.len()).collect::<Vec<_>>());
    assert_eq!(result.segments.len(), 7);
    assert_eq!(result.narration_blocks, 1);

    let nicole: Vec<&Segment> = result.segments.iter().filter(|s| s.speaker == "NICOLE").collect();
    assert_eq!(nicole.len(), 2);
    assert_eq!(nicole[0].emotion_raw, "Whisper");
    assert_eq!(nicole[1].emotion_raw, "default");
    assert_eq!(nicole[1].content, "Do not shout.");

    let last = result.segments.last().unwrap();
    assert_eq!(last.speaker, "");
    assert_eq!(last.content, "They climbed.");
}

#[test]
fn test_render_withFlattenedChapter_shouldRoundTrip() {
    let speakers = ["JOHN", "NICOLE"];
    let first = flatten(CHAPTER, &speakers);
    let rendered = render_segments(&first.segments, &RenderOptions::default());
    let second = flatten(&rendered, &speakers);

    assert_eq!(shape(&first.segments), shape(&second.segments));
    assert!(parse_document(&rendered).is_clean());
}

#[test]
fn test_render_withMarkupCharacters_shouldStayParseable() {
    let segments = vec![
        Segment::image(0, "Sign reading <closed>"),
        Segment::text(1, "", "default", "a < b > c"),
    ];
    let rendered = render_segments(&segments, &RenderOptions::default());
    let reparsed = flatten(&rendered, &[]);

    assert_eq!(reparsed.segments.len(), 2);
    assert_eq!(reparsed.segments[1].content, "a  b  c");
}

#[test]
fn test_parse_withMismatchedClosingTag_shouldRecoverAndKeepText() {
    let source = "<Audiobook><IMAGE 1>hall</IMAGE 1><JOHN><Joy>Hello.</Sad></JOHN><JOHN>Bye.</JOHN></Audiobook>";
    let document = parse_document(source);

    assert!(document.diagnostics.iter().any(|d| matches!(
        &d.kind,
        DiagnosticKind::MismatchedClosingTag { expected, found } if expected == "Joy" && found == "Sad"
    )));

    let result = flatten(source, &["JOHN"]);
    let texts: Vec<&str> = result.segments.iter().filter(|s| s.is_text()).map(|s| s.content.as_str()).collect();
    assert_eq!(texts, vec!["Hello.", "Bye."]);
    assert_eq!(result.segments[1].emotion_raw, "Joy");
}

#[test]
fn test_parse_withUnterminatedElement_shouldReportAndFlatten() {
    let source = "<Audiobook><IMAGE 1>hall</IMAGE 1><JOHN><Joy>Never closed";
    let document = parse_document(source);
    assert!(!document.is_clean());

    let result = flatten(source, &["JOHN"]);
    assert_eq!(result.segments.len(), 2);
    assert_eq!(result.segments[1].content, "Never closed");
}

#[test]
fn test_flatten_withNestedEmotions_shouldUseInnermostAndWarn() {
    let result = flatten("<Audiobook><Joy>outer <Sad>inner</Sad></Joy></Audiobook>", &[]);

    assert_eq!(result.segments[0].emotion_raw, "Joy");
    assert_eq!(result.segments[1].emotion_raw, "Sad");
    assert_eq!(
        result.warnings,
        vec![FlattenWarning::NestedEmotion {
            outer: "Joy".to_string(),
            inner: "Sad".to_string()
        }]
    );
}

#[test]
fn test_flatten_withAssignmentBlock_shouldSkipIt() {
    let source = "<Audiobook><ASSIGN_VOICE>ALICE=VoiceA;</ASSIGN_VOICE><IMAGE 1>x</IMAGE 1>Text</Audiobook>";
    let result = flatten(source, &["ALICE"]);
    assert_eq!(result.segments.len(), 2);
    assert!(result.segments.iter().all(|s| !s.content.contains("VoiceA")));
}

#[test]
fn test_flatten_withEmptyDocument_shouldReturnNothing() {
    assert!(flatten("", &[]).segments.is_empty());
    assert!(flatten("   \n  ", &[]).segments.is_empty());
}

/// A speaker whose name starts with the image marker stays a speaker
#[test]
fn test_flatten_withSpeakerNamedLikeImageMarker_shouldPreferSpeaker() {
    let script = "<Audiobook><IMAGE 1>Gallery</IMAGE 1><IMAGER><Proud>I painted these.</Proud></IMAGER></Audiobook>";
    let result = flatten(script, &["IMAGER"]);

    assert_eq!(
        shape(&result.segments),
        vec![
            (SegmentKind::Image, "".to_string(), "".to_string(), "Gallery".to_string()),
            (SegmentKind::Text, "IMAGER".to_string(), "Proud".to_string(), "I painted these.".to_string()),
        ]
    );
}
