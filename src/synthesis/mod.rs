/*!
 * Concurrent media synthesis.
 *
 * - `grouping`: image-led groups in document order
 * - `retry`: fixed backoff schedule shared by every request kind
 * - `scheduler`: bounded worker pool issuing generation requests
 * - `assembler`: reorders completed results into the manifest
 * - `manifest`: per-segment results and the output manifest
 */

pub mod assembler;
pub mod grouping;
pub mod manifest;
pub mod retry;
pub mod scheduler;

pub use assembler::OrderedAssembler;
pub use grouping::{group_segments, Group, GroupingOutcome};
pub use manifest::{ArtifactStatus, Manifest, SynthesisResult};
pub use retry::{RetryOutcome, RetryPolicy, RetryableError};
pub use scheduler::{SchedulerOptions, SynthesisJob, SynthesisScheduler};
