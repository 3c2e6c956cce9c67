//! Local, deterministic text analysis. Nothing here performs I/O or fails:
//! empty or malformed input yields zero values.

pub mod content;
pub mod features;
pub mod redact;
pub mod text;

pub use content::{ContentScanner, DEFAULT_BLACKLIST, SUSPICIOUS_KEYWORDS};
pub use features::{FeatureExtractor, Features};
pub use redact::PiiRedactor;
pub use text::{sender_hash, truncate_excerpt};
