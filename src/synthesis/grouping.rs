use log::warn;

use crate::markup::flatten::Segment;

/// One image with the text segments that follow it
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub image: Segment,
    pub texts: Vec<Segment>,
}

/// Groups plus the text segments that had no preceding image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingOutcome {
    pub groups: Vec<Group>,
    pub orphans: Vec<Segment>,
}

impl GroupingOutcome {
    /// Segments in submission order: each image, then its texts
    pub fn submission_order(&self) -> impl Iterator<Item = &Segment> {
        self.groups
            .iter()
            .flat_map(|group| std::iter::once(&group.image).chain(group.texts.iter()))
    }
}

/// Partition segments into image-led groups, in `order`.
///
/// Text before the first image has nothing to illustrate it; it is reported
/// as an orphan and left out of every group.
pub fn group_segments(segments: &[Segment]) -> GroupingOutcome {
    let mut sorted: Vec<&Segment> = segments.iter().collect();
    sorted.sort_by_key(|segment| segment.order);

    let mut outcome = GroupingOutcome::default();
    let mut current: Option<Group> = None;

    for segment in sorted {
        if segment.is_image() {
            if let Some(group) = current.take() {
                outcome.groups.push(group);
            }
            current = Some(Group {
                image: segment.clone(),
                texts: Vec::new(),
            });
        } else if let Some(group) = current.as_mut() {
            group.texts.push(segment.clone());
        } else {
            warn!(
                "Text segment {} precedes any image and is left out: '{}'",
                segment.order, segment.content
            );
            outcome.orphans.push(segment.clone());
        }
    }

    if let Some(group) = current {
        outcome.groups.push(group);
    }
    outcome
}
