//! Error types shared by every stage of the transformation core.
//!
//! Only two things can genuinely fail: the raster engine (decode, encode,
//! evaluation) and the [deadline guard](crate::deadline). Geometry and
//! compositing clamp instead of failing, and classification and metadata
//! treat "unknown" or "absent" as ordinary values. Everything is passed up
//! unchanged with `?`; the gateway decides how to present it.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// A crop rectangle escaped the image. Geometry resolution clamps, so
    /// this indicates a broken invariant rather than bad user input.
    #[error(
        "Crop {width}x{height}+{left}+{top} is outside the {image_width}x{image_height} image"
    )]
    GeometryOutOfBounds {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },
    #[error(transparent)]
    EvaluationTimeout(#[from] EvaluationTimeout),
    #[error("Engine failure: {0}")]
    Engine(#[from] EngineError),
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Engine(EngineError::Image(err))
    }
}

/// Opaque failures surfaced by the raster engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Evaluation was killed")]
    Killed,
    #[error("Input image exceeds pixel limit: {pixels} > {max_pixels}")]
    PixelLimit { pixels: u64, max_pixels: u64 },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Raised when an evaluation outlives its budget.
///
/// The message is phrased so the gateway can show it to the client as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationTimeout {
    /// Configured budget in seconds.
    pub deadline: u64,
    /// Seconds the evaluation had been running when it was stopped.
    pub run: u64,
    /// Completion percentage at the moment of abort.
    pub percent: u32,
}

impl fmt::Display for EvaluationTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Maximum image processing time of {} second{} exceeded with {} second{}. \
             Operation was canceled after {}% completion",
            self.deadline,
            plural(self.deadline),
            self.run,
            plural(self.run),
            self.percent
        )
    }
}

impl std::error::Error for EvaluationTimeout {}

fn plural(n: u64) -> &'static str {
    if n > 1 { "s" } else { "" }
}
