/*!
 * Ordered assembly of synthesis results.
 *
 * Results arrive in completion order. The assembler buffers them keyed by
 * `order` and produces the manifest once every expected segment has been
 * accounted for. Intermediate snapshots are sorted too, but may have gaps.
 */

use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;

use crate::markup::flatten::SegmentKind;
use crate::synthesis::manifest::{Manifest, SynthesisResult};

/// Collects results for a known set of segment orders
#[derive(Debug, Clone, Default)]
pub struct OrderedAssembler {
    expected: BTreeMap<usize, SegmentKind>,
    received: BTreeMap<usize, SynthesisResult>,
}

impl OrderedAssembler {
    /// Expect one result per `(order, kind)` pair
    pub fn new<I>(expected: I) -> Self
    where
        I: IntoIterator<Item = (usize, SegmentKind)>,
    {
        Self {
            expected: expected.into_iter().collect(),
            received: BTreeMap::new(),
        }
    }

    /// Record one result. Unknown and duplicate orders are ignored.
    pub fn record(&mut self, result: SynthesisResult) -> bool {
        if !self.expected.contains_key(&result.order) {
            warn!("Ignoring result for unexpected segment {}", result.order);
            return false;
        }
        if self.received.contains_key(&result.order) {
            warn!("Ignoring duplicate result for segment {}", result.order);
            return false;
        }
        self.received.insert(result.order, result);
        true
    }

    /// (received, expected)
    pub fn progress(&self) -> (usize, usize) {
        (self.received.len(), self.expected.len())
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.expected.len()
    }

    /// Orders still missing a result
    pub fn missing(&self) -> BTreeSet<usize> {
        self.expected
            .keys()
            .filter(|order| !self.received.contains_key(order))
            .copied()
            .collect()
    }

    /// Sorted view of what has arrived so far
    pub fn snapshot(&self) -> Vec<SynthesisResult> {
        self.received.values().cloned().collect()
    }

    /// Receive results until every segment is accounted for or the channel
    /// closes, reporting progress after each accepted result.
    pub async fn collect<F>(mut self, mut results: mpsc::UnboundedReceiver<SynthesisResult>, mut on_progress: F) -> Manifest
    where
        F: FnMut(&SynthesisResult, usize, usize),
    {
        while !self.is_complete() {
            let Some(result) = results.recv().await else {
                break;
            };
            let snapshot = result.clone();
            if self.record(result) {
                let (done, total) = self.progress();
                debug!("Segment {} finished ({}/{})", snapshot.order, done, total);
                on_progress(&snapshot, done, total);
            }
        }
        self.finish()
    }

    /// Close the assembly; segments without a result are reported failed
    pub fn finish(mut self) -> Manifest {
        for order in self.missing() {
            warn!("No result received for segment {}", order);
            let kind = self.expected[&order];
            self.received
                .insert(order, SynthesisResult::failed(order, kind, "no result received"));
        }
        Manifest {
            entries: self.received.into_values().collect(),
        }
    }
}
