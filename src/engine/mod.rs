//! Raster engine interface.
//!
//! The orchestration code never touches pixels directly. It talks to an
//! [`ImageHandle`]: a lazily evaluated image with dimension accessors, a
//! string-keyed attribute store, crop and vertical-join operations, a
//! progress subscription and a kill switch.
//!
//! The module is split into:
//! - **Attributes**: well-known keys and typed accessors over the store
//! - **Progress**: [`Progress`] notifications, [`KillSwitch`], [`EvalHandler`]
//! - **Probe**: container header parsing for facts the decoders don't expose
//! - **Raster**: [`RasterImage`], the bundled implementation on top of the
//!   `image` crate
//! - **Encode**: [`RasterImage::write_to_buffer`] and [`Quality`]

pub mod attributes;
mod encode;
mod probe;
pub mod progress;
pub mod raster;

pub use attributes::{AttributeExt, AttributeValue};
pub use encode::Quality;
pub use progress::{EvalHandler, KillSwitch, Progress};
pub use raster::{LoadOptions, RasterImage};

use crate::error::Result;

/// How band values should be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpretation {
    Multiband,
    BW,
    Cmyk,
    Lab,
    Srgb,
    Rgb16,
    Grey16,
    Scrgb,
}

impl Interpretation {
    /// Engine nickname, as emitted in metadata.
    pub fn nick(self) -> &'static str {
        match self {
            Interpretation::Multiband => "multiband",
            Interpretation::BW => "b-w",
            Interpretation::Cmyk => "cmyk",
            Interpretation::Lab => "lab",
            Interpretation::Srgb => "srgb",
            Interpretation::Rgb16 => "rgb16",
            Interpretation::Grey16 => "grey16",
            Interpretation::Scrgb => "scrgb",
        }
    }
}

/// Numeric format of a single band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandFormat {
    Uchar,
    Char,
    Ushort,
    Short,
    Uint,
    Int,
    Float,
    Double,
}

impl BandFormat {
    pub fn nick(self) -> &'static str {
        match self {
            BandFormat::Uchar => "uchar",
            BandFormat::Char => "char",
            BandFormat::Ushort => "ushort",
            BandFormat::Short => "short",
            BandFormat::Uint => "uint",
            BandFormat::Int => "int",
            BandFormat::Float => "float",
            BandFormat::Double => "double",
        }
    }
}

/// A lazily evaluated image owned by the gateway.
///
/// Operations build new handles; nothing is computed until the handle is
/// evaluated (encoded, written). Handles are cheap to clone and a clone
/// refers to the same image, including its evaluation hook and kill switch.
pub trait ImageHandle: Sized {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Number of bands (channels).
    fn bands(&self) -> u32;

    fn band_format(&self) -> BandFormat;

    fn interpretation(&self) -> Interpretation;

    /// Horizontal resolution in pixels per millimetre.
    fn xres(&self) -> f64;

    /// Does the last band carry alpha?
    fn has_alpha(&self) -> bool {
        let bands = self.bands();
        let interpretation = self.interpretation();
        (bands == 2 && interpretation == Interpretation::BW)
            || (bands == 4 && interpretation != Interpretation::Cmyk)
            || bands > 4
    }

    fn attribute(&self, name: &str) -> Option<&AttributeValue>;

    fn set_attribute(&mut self, name: &str, value: AttributeValue);

    fn remove_attribute(&mut self, name: &str);

    /// Crop a rectangle. Fails with `GeometryOutOfBounds` if it escapes the image.
    fn extract_area(&self, left: u32, top: u32, width: u32, height: u32) -> Result<Self>;

    /// Stack images of equal width top to bottom, in order.
    fn join_vertical(frames: Vec<Self>) -> Result<Self>;

    /// Subscribe to progress notifications emitted while this image is evaluated.
    fn on_eval(&self, handler: EvalHandler);

    /// The flag that aborts evaluation of this image.
    fn kill_switch(&self) -> &KillSwitch;
}
