//! Typed access to the engine's attribute store.
//!
//! The store itself is stringly typed: a key may be missing, or present
//! with a value of any [`AttributeValue`] variant. [`AttributeExt`] wraps
//! each well-known key in an accessor with explicit `Option` semantics, so
//! callers never see raw type tags. A key holding a value of the wrong type
//! reads as absent.

use super::ImageHandle;

pub const LOADER: &str = "vips-loader";
pub const ICC_PROFILE: &str = "icc-profile-data";
pub const ORIENTATION: &str = "orientation";
pub const N_PAGES: &str = "n-pages";
pub const PAGE_HEIGHT: &str = "page-height";
pub const LOOP: &str = "loop";
pub const DELAY: &str = "delay";
pub const HEIF_PRIMARY: &str = "heif-primary";
pub const CHROMA_SUBSAMPLE: &str = "jpeg-chroma-subsample";
pub const INTERLACED: &str = "interlaced";
pub const PALETTE_BIT_DEPTH: &str = "palette-bit-depth";

/// A value in the attribute store.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i32),
    Double(f64),
    Str(String),
    IntArray(Vec<i32>),
    Blob(Vec<u8>),
}

/// Typed accessors, available on every [`ImageHandle`].
pub trait AttributeExt {
    fn has_attribute(&self, name: &str) -> bool;

    fn get_int(&self, name: &str) -> Option<i32>;

    fn get_string(&self, name: &str) -> Option<&str>;

    fn get_int_array(&self, name: &str) -> Option<&[i32]>;

    /// Name of the load operation that produced the image.
    fn loader(&self) -> Option<&str> {
        self.get_string(LOADER)
    }

    /// Does the image carry an embedded ICC profile?
    fn has_profile(&self) -> bool {
        self.has_attribute(ICC_PROFILE)
    }

    /// EXIF orientation, 0 when absent.
    fn exif_orientation(&self) -> i32 {
        self.get_int(ORIENTATION).unwrap_or(0)
    }

    /// Page count as recorded by the loader.
    fn n_pages(&self) -> Option<i32> {
        self.get_int(N_PAGES)
    }

    /// Page height as recorded by the loader, unchecked.
    fn raw_page_height(&self) -> Option<i32> {
        self.get_int(PAGE_HEIGHT)
    }

    fn loop_count(&self) -> Option<i32> {
        self.get_int(LOOP)
    }

    /// Per-frame delays in milliseconds.
    fn frame_delays(&self) -> Option<&[i32]> {
        self.get_int_array(DELAY)
    }

    fn primary_page(&self) -> Option<i32> {
        self.get_int(HEIF_PRIMARY)
    }

    fn chroma_subsampling(&self) -> Option<&str> {
        self.get_string(CHROMA_SUBSAMPLE)
    }

    /// Progressive (JPEG) or interlaced (PNG, GIF) encoding.
    fn is_interlaced(&self) -> bool {
        self.get_int(INTERLACED).is_some_and(|v| v != 0)
    }

    fn palette_bit_depth(&self) -> Option<i32> {
        self.get_int(PALETTE_BIT_DEPTH)
    }
}

impl<H: ImageHandle> AttributeExt for H {
    fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    fn get_int(&self, name: &str) -> Option<i32> {
        match self.attribute(name)? {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn get_string(&self, name: &str) -> Option<&str> {
        match self.attribute(name)? {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn get_int_array(&self, name: &str) -> Option<&[i32]> {
        match self.attribute(name)? {
            AttributeValue::IntArray(v) => Some(v),
            _ => None,
        }
    }
}

/// Does the image have a non-default density?
pub fn has_density(image: &impl ImageHandle) -> bool {
    image.xres() > 1.0
}

/// Pixels/mm resolution as pixels/inch.
pub fn density(image: &impl ImageHandle) -> u32 {
    (image.xres() * 25.4).round() as u32
}

/// Sanity-checked page height.
///
/// The recorded value is used only if it is positive, no taller than the
/// image, and divides the image height evenly; otherwise the whole image is
/// one page.
pub fn page_height(image: &impl ImageHandle) -> u32 {
    let height = image.height();
    match image.raw_page_height() {
        Some(ph) if ph > 0 && (ph as u32) <= height && height % (ph as u32) == 0 => ph as u32,
        _ => height,
    }
}
