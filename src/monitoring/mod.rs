//! Discovery monitoring
//!
//! One `ChangeDetector` per discovery-mode account polls the store catalog,
//! remembers every id it has seen and hands filtered new sub-items to an
//! `IntentSink`.

pub mod detector;
pub mod filters;
pub mod known;

pub use detector::{ChangeDetector, DetectorError, DetectorPhase, IntentSink};
pub use filters::SnipeFilter;
pub use known::{Admission, KnownItemSet};
