//! Text segmentation for chapter playback.
//!
//! Splits raw chapter text into addressable reading units, classifying
//! each as regular prose, dialogue, or a scene change, and breaking long
//! paragraphs at sentence boundaries to respect the synthesis provider's
//! input limit.

pub mod filter;
pub mod line;
pub mod segmenter;

pub use filter::{compile_filters, CompiledFilter, SegmentError};
pub use line::{Line, ReadMode};
pub use segmenter::{Segmenter, PROVIDER_INPUT_CEILING, SCENE_BREAK};
