//! JSON description of a decoded image.
//!
//! Field order is part of the output contract and follows the declaration
//! order of [`ImageMetadata`]. Optional fields are left out entirely when
//! the engine has nothing to say about them, rather than written as `null`.

use crate::engine::{AttributeExt, ImageHandle, attributes};
use crate::format::ImageType;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub space: &'static str,
    pub channels: u32,
    pub depth: &'static str,
    /// Pixels per inch, only for images with a resolution above 1 px/mm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chroma_subsampling: Option<String>,
    pub is_progressive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub palette_bit_depth: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_height: Option<i32>,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<i32>,
    /// Per-frame delays in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<Vec<i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_primary: Option<i32>,
    pub has_profile: bool,
    pub has_alpha: bool,
    pub orientation: i32,
}

pub fn describe(image: &impl ImageHandle, image_type: ImageType) -> ImageMetadata {
    ImageMetadata {
        format: image_type.id(),
        width: image.width(),
        height: image.height(),
        space: image.interpretation().nick(),
        channels: image.bands(),
        depth: image.band_format().nick(),
        density: attributes::has_density(image).then(|| attributes::density(image)),
        chroma_subsampling: image.chroma_subsampling().map(str::to_string),
        is_progressive: image.is_interlaced(),
        palette_bit_depth: image.palette_bit_depth(),
        pages: image.n_pages(),
        page_height: image.raw_page_height(),
        loop_count: image.loop_count(),
        delay: image.frame_delays().map(<[i32]>::to_vec),
        page_primary: image.primary_page(),
        has_profile: image.has_profile(),
        has_alpha: image.has_alpha(),
        orientation: image.exif_orientation(),
    }
}

/// Compact JSON for [`describe`].
pub fn serialize(image: &impl ImageHandle, image_type: ImageType) -> String {
    serde_json::to_string(&describe(image, image_type))
        .expect("metadata contains only plain values and must serialize")
}
