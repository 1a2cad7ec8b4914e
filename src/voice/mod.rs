/*!
 * Voice and emotion resolution.
 *
 * - `registry`: voice profiles and their emotion references with embeddings
 * - `assignment`: speaker -> profile bindings from assignment blocks
 * - `emotion`: emotion label -> reference recording
 * - `reference`: loading reference audio and transcripts
 * - `cache` / `similarity`: embedding memoization and cosine matching
 */

pub mod assignment;
pub mod cache;
pub mod emotion;
pub mod reference;
pub mod registry;
pub mod similarity;

pub use assignment::{canonical_speaker, BindingMethod, VoiceAssignments, VoiceBinding, VoiceResolver};
pub use cache::{CachingEmbedder, EmbeddingCache};
pub use emotion::{clean_emotion_key, similarity_key, EmotionMatch, EmotionMatchKind, EmotionResolver};
pub use reference::{ReferenceAudio, ReferenceLoader};
pub use registry::{ReferenceCatalog, ReferenceEntry, ReferenceSource, VoiceProfile, VoiceRegistry};
