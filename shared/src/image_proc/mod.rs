//! Image processing for locating the pipette tip in microscope frames.
//!
//! - **template_match**: normalized cross-correlation search of a template
//!   inside a frame
//! - **histogram**: fixed-bin intensity histograms used to pick template
//!   windows

pub mod histogram;
pub mod template_match;

pub use histogram::histogram;
pub use template_match::{
    match_template, PixelPos, TemplateMatch, TemplateMatchError, MATCH_THRESHOLD,
};
