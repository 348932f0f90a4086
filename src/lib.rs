//! # imgserve
//!
//! The transformation core of an on-demand image gateway. Given the bytes
//! of a source image and a request (target size, crop placement, output
//! format), it decodes, resizes, crops and re-encodes the image, or
//! describes it as JSON.
//!
//! # Pipeline
//!
//! ```text
//! decode → classify → choose output → resize → crop (per frame) → deadline → encode
//!                                   ↘ describe (json)
//! ```
//!
//! Animated images travel through the pipeline as a single vertical strip
//! of equally tall frames. Every crop is applied to each frame, so frames
//! never bleed into one another.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`format`] | Source type classification, output formats, enabled-encoder masks |
//! | [`geometry`] | Anchor and focal-point crop placement, cover-resize factor |
//! | [`frames`] | Per-frame cropping of multi-frame strips |
//! | [`deadline`] | One-shot evaluation timeout |
//! | [`metadata`] | JSON description of a decoded image |
//! | [`engine`] | The [`ImageHandle`](engine::ImageHandle) interface and the bundled `image`-crate engine |
//! | [`pipeline`] | Request orchestration |
//! | [`config`] | `imgserve.toml` loading, merging and validation |
//! | [`error`] | Crate error type |
//!
//! # Design Decisions
//!
//! ## Clamp, Don't Fail
//!
//! Crop placement never fails. Offsets are clamped into the image, and a
//! window larger than the image is pinned to the origin. An out-of-bounds
//! crop reaching the engine therefore indicates a bug, and is reported as
//! [`Error::GeometryOutOfBounds`].
//!
//! ## Cooperative Deadlines
//!
//! Evaluation is lazy: nothing is computed until the final image is
//! encoded. The deadline guard watches progress notifications emitted
//! during that single evaluation and flips the image's kill switch once the
//! budget is spent. The engine stops at its next checkpoint (a batch of
//! output rows, or a band of a resize) and the caller receives the timeout
//! message unchanged. Decoding runs before the guard exists.
//!
//! ## One Shrink Factor
//!
//! Focal-point placement maps source coordinates through the same factor the
//! resize used. Both call [`geometry::shrink_factor`], so the two cannot
//! drift apart.

pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod format;
pub mod frames;
pub mod geometry;
pub mod metadata;
pub mod pipeline;

pub use error::{Error, Result};
