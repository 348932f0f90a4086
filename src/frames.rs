//! Cropping multi-frame images.
//!
//! Animated images are held as one vertical strip: `n_pages` frames of
//! `page_height` rows each, stacked top to bottom. Cropping the strip as a
//! whole would cut across frame boundaries, so a crop is applied to every
//! frame separately and the pieces are joined back into a strip.
//!
//! A crop that keeps full frame height is the exception: it touches only
//! columns, so a single extract over the whole strip gives the same pixels.

use crate::engine::{ImageHandle, attributes};
use crate::error::Result;
use crate::geometry::Rect;

/// Frame layout of a strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSet {
    pub n_pages: u32,
    pub page_height: u32,
}

impl FrameSet {
    /// Read the layout from an image's sanity-checked page height.
    pub fn of(image: &impl ImageHandle) -> Self {
        let page_height = attributes::page_height(image);
        Self {
            n_pages: (image.height() / page_height.max(1)).max(1),
            page_height,
        }
    }

    pub fn is_multi_frame(&self) -> bool {
        self.n_pages > 1
    }

    /// Full-frame rectangles for a strip `width` pixels wide.
    pub fn pages(&self, width: u32) -> Vec<Rect> {
        self.crop_rects(0, 0, width, self.page_height)
    }

    /// The same crop placed on every frame, in frame order.
    pub fn crop_rects(&self, left: u32, top: u32, width: u32, height: u32) -> Vec<Rect> {
        (0..self.n_pages)
            .map(|i| Rect::new(left, self.page_height * i + top, width, height))
            .collect()
    }
}

/// Crop every frame of a strip to `width`x`height` at `(left, top)`.
///
/// The caller is responsible for recording the new page height on the
/// result.
pub fn composite_frames<H: ImageHandle>(
    image: &H,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    n_pages: u32,
    page_height: u32,
) -> Result<H> {
    if top == 0 && height == page_height {
        log::debug!("cropping {n_pages} frame(s) with a single extract");
        return image.extract_area(left, 0, width, image.height());
    }
    log::debug!("cropping {n_pages} frame(s) one by one");
    crop_each_frame(image, left, top, width, height, n_pages, page_height)
}

fn crop_each_frame<H: ImageHandle>(
    image: &H,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    n_pages: u32,
    page_height: u32,
) -> Result<H> {
    let frames = FrameSet {
        n_pages,
        page_height,
    };
    let pieces = frames
        .crop_rects(left, top, width, height)
        .into_iter()
        .map(|r| image.extract_area(r.left, r.top, r.width, r.height))
        .collect::<Result<Vec<_>>>()?;
    H::join_vertical(pieces)
}
