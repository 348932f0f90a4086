//! Format registry: what an image *is*, and what it may become.
//!
//! | Item | Role |
//! |---|---|
//! | [`ImageType`] | Source type, assigned once from the engine's loader name |
//! | [`OutputFormat`] | Requested encoding, one power-of-two bit each |
//! | [`OutputSet`] | Bitmask of enabled encoders (from config) |
//! | [`classify`] | Loader name → [`ImageType`] via an ordered prefix table |
//!
//! ## GIF loader name
//!
//! The engine renamed its GIF loader in 8.11 (`VipsForeignLoadGif` became
//! `VipsForeignLoadNsgif`). The prefix is fixed at build time by the
//! `legacy-gif-loader` cargo feature; it is never probed at runtime.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "legacy-gif-loader")]
pub const GIF_LOADER: &str = "VipsForeignLoadGif";
#[cfg(not(feature = "legacy-gif-loader"))]
pub const GIF_LOADER: &str = "VipsForeignLoadNsgif";

/// Loader-name prefixes in match priority order.
const LOADER_PREFIXES: [(&str, ImageType); 9] = [
    ("VipsForeignLoadJpeg", ImageType::Jpeg),
    ("VipsForeignLoadPng", ImageType::Png),
    ("VipsForeignLoadWebp", ImageType::Webp),
    ("VipsForeignLoadTiff", ImageType::Tiff),
    (GIF_LOADER, ImageType::Gif),
    ("VipsForeignLoadSvg", ImageType::Svg),
    ("VipsForeignLoadPdf", ImageType::Pdf),
    ("VipsForeignLoadHeif", ImageType::Heif),
    ("VipsForeignLoadMagick", ImageType::Magick),
];

/// Type of a decoded source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Jpeg,
    Png,
    Webp,
    Tiff,
    Gif,
    Svg,
    Pdf,
    Heif,
    Magick,
    Unknown,
}

impl ImageType {
    /// Identifier used in metadata output.
    pub fn id(self) -> &'static str {
        match self {
            ImageType::Jpeg => "jpeg",
            ImageType::Png => "png",
            ImageType::Webp => "webp",
            ImageType::Tiff => "tiff",
            ImageType::Gif => "gif",
            ImageType::Svg => "svg",
            ImageType::Pdf => "pdf",
            ImageType::Heif => "heif",
            ImageType::Magick => "magick",
            ImageType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Determine the image type from the name of the load operation.
pub fn classify(loader: &str) -> ImageType {
    LOADER_PREFIXES
        .iter()
        .find(|(prefix, _)| loader.starts_with(prefix))
        .map(|&(_, image_type)| image_type)
        .unwrap_or(ImageType::Unknown)
}

/// Output encodings. Each variant's discriminant is its bit in an [`OutputSet`].
///
/// Bit 0 is left free for "same as the input".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum OutputFormat {
    Jpeg = 1 << 1,
    Png = 1 << 2,
    Webp = 1 << 3,
    Avif = 1 << 4,
    Tiff = 1 << 5,
    Gif = 1 << 6,
    Json = 1 << 7,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 7] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Webp,
        OutputFormat::Avif,
        OutputFormat::Tiff,
        OutputFormat::Gif,
        OutputFormat::Json,
    ];

    pub fn bit(self) -> u32 {
        self as u32
    }

    fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.bit() == bit)
    }

    /// Lower-case format name, as used in config files and capability lists.
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Gif => "gif",
            OutputFormat::Json => "json",
        }
    }

    /// Resolve a file extension against the allow-list of [`extension_for`].
    ///
    /// The leading dot is optional and matching ignores ASCII case. `jpeg`
    /// and `tif` are accepted as spellings of the canonical extensions.
    pub fn from_extension(ext: &str) -> Result<Self> {
        let ext = ext.strip_prefix('.').unwrap_or(ext).to_ascii_lowercase();
        let canonical = match ext.as_str() {
            "jpeg" => "jpg",
            "tif" => "tiff",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|&f| &extension_for(f)[1..] == canonical)
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!("extension '.{ext}' is not allowed"))
            })
    }

    /// Whether the bundled encoder writes every frame of a multi-page image.
    pub fn can_animate(self) -> bool {
        self == OutputFormat::Gif
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedFormat(format!("unknown output format '{s}'")))
    }
}

/// Default output for a source type when the request names none.
///
/// HEIF/HEIC sources re-encode to AVIF rather than HEIF.
pub fn default_output_for(image_type: ImageType) -> OutputFormat {
    match image_type {
        ImageType::Jpeg => OutputFormat::Jpeg,
        ImageType::Webp => OutputFormat::Webp,
        ImageType::Heif => OutputFormat::Avif,
        ImageType::Tiff => OutputFormat::Tiff,
        ImageType::Gif => OutputFormat::Gif,
        _ => OutputFormat::Png,
    }
}

/// File extension for an output format.
///
/// This is also the allow-list of extensions handed to the encoders; any
/// other extension is rejected before it reaches them.
pub fn extension_for(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Jpeg => ".jpg",
        OutputFormat::Webp => ".webp",
        OutputFormat::Avif => ".avif",
        OutputFormat::Tiff => ".tiff",
        OutputFormat::Gif => ".gif",
        OutputFormat::Json => ".json",
        OutputFormat::Png => ".png",
    }
}

pub fn supports_multi_frame(image_type: ImageType) -> bool {
    matches!(
        image_type,
        ImageType::Webp
            | ImageType::Tiff
            | ImageType::Gif
            | ImageType::Pdf
            | ImageType::Heif
            | ImageType::Magick
    )
}

pub fn supports_alpha(image_type: ImageType) -> bool {
    matches!(
        image_type,
        ImageType::Png | ImageType::Webp | ImageType::Heif | ImageType::Tiff | ImageType::Gif
    )
}

/// Render an encoder mask as `"jpeg, png, ..."` in ascending bit order.
///
/// Only meant for humans (error messages, `imgserve formats`).
pub fn render_enabled_outputs(mask: u32) -> String {
    (1..=7)
        .map(|i| 1u32 << i)
        .filter(|bit| mask & bit != 0)
        .filter_map(OutputFormat::from_bit)
        .map(OutputFormat::name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Set of enabled output encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<OutputFormat>", into = "Vec<OutputFormat>")]
pub struct OutputSet(u32);

impl OutputSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        OutputFormat::ALL.into_iter().collect()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, format: OutputFormat) -> bool {
        self.0 & format.bit() != 0
    }

    pub fn insert(&mut self, format: OutputFormat) {
        self.0 |= format.bit();
    }

    pub fn render(self) -> String {
        render_enabled_outputs(self.0)
    }
}

impl Default for OutputSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<OutputFormat> for OutputSet {
    fn from_iter<I: IntoIterator<Item = OutputFormat>>(iter: I) -> Self {
        let mut set = Self::empty();
        for format in iter {
            set.insert(format);
        }
        set
    }
}

impl From<Vec<OutputFormat>> for OutputSet {
    fn from(formats: Vec<OutputFormat>) -> Self {
        formats.into_iter().collect()
    }
}

impl From<OutputSet> for Vec<OutputFormat> {
    fn from(set: OutputSet) -> Self {
        OutputFormat::ALL
            .into_iter()
            .filter(|&f| set.contains(f))
            .collect()
    }
}
