//! Request orchestration.
//!
//! ```text
//! bytes ─▶ decode ─▶ classify ─▶ choose output ─┬─▶ json: describe
//!                                               └─▶ flatten ─▶ resize ─▶ crop ─▶ guard ─▶ encode
//! ```
//!
//! Every stage before encoding only builds graph nodes. Pixels are computed
//! once, inside `write_to_buffer`, under the deadline guard.
//!
//! [`run`] does both halves in one call. [`plan`] stops after the graph is
//! built and returns a [`Plan`], so a caller can subscribe to the image's
//! progress before [`Render::execute`] encodes it.

use crate::config::GatewayConfig;
use crate::deadline::install_deadline;
use crate::engine::attributes::{self, AttributeExt};
use crate::engine::{AttributeValue, ImageHandle, LoadOptions, Quality, RasterImage};
use crate::error::{EngineError, Error, Result};
use crate::format::{ImageType, OutputFormat, classify, default_output_for, extension_for};
use crate::frames::{FrameSet, composite_frames};
use crate::geometry::{
    Position, cover_dimensions, fit_target, resolve_anchor, resolve_focal, shrink_factor,
};
use crate::metadata;

/// How the crop window is placed after a cover resize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crop {
    Position(Position),
    /// Normalised (0-1) coordinates on the source image.
    FocalPoint { x: f32, y: f32 },
}

impl Default for Crop {
    fn default() -> Self {
        Crop::Position(Position::Centre)
    }
}

/// One transformation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// Target width. With only one side given, the other follows the aspect ratio.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub crop: Crop,
    /// Output encoding; defaults from the source type.
    pub output: Option<OutputFormat>,
    /// Overrides `output.quality` from the config.
    pub quality: Option<Quality>,
    /// Decode every frame of animated input.
    pub all_pages: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Image { bytes: Vec<u8>, format: OutputFormat },
    Metadata(String),
}

impl Response {
    pub fn body(&self) -> &[u8] {
        match self {
            Response::Image { bytes, .. } => bytes,
            Response::Metadata(json) => json.as_bytes(),
        }
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            Response::Image { format, .. } => *format,
            Response::Metadata(_) => OutputFormat::Json,
        }
    }

    /// File extension matching the body, with the leading dot.
    pub fn extension(&self) -> &'static str {
        extension_for(self.format())
    }
}

/// A request that has been decoded and laid out but not yet computed.
#[derive(Debug)]
pub enum Plan {
    /// JSON output needs no pixels and is already complete.
    Metadata(String),
    Render(Render),
}

/// An image graph waiting to be encoded.
#[derive(Debug)]
pub struct Render {
    image: RasterImage,
    output: OutputFormat,
    quality: Quality,
    deadline: u64,
}

impl Render {
    /// The image that will be evaluated.
    pub fn image(&self) -> &RasterImage {
        &self.image
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    /// Arm the deadline and encode.
    pub fn execute(self) -> Result<Response> {
        install_deadline(&self.image, self.deadline);
        let bytes = self.image.write_to_buffer(self.output, self.quality)?;
        Ok(Response::Image {
            bytes,
            format: self.output,
        })
    }
}

pub fn run(input: &[u8], request: &Request, config: &GatewayConfig) -> Result<Response> {
    match plan(input, request, config)? {
        Plan::Metadata(json) => Ok(Response::Metadata(json)),
        Plan::Render(render) => render.execute(),
    }
}

pub fn plan(input: &[u8], request: &Request, config: &GatewayConfig) -> Result<Plan> {
    let options = LoadOptions {
        all_pages: request.all_pages,
        max_pages: config.limits.max_pages,
    };
    let image = RasterImage::decode(input, &options)?;
    check_pixel_limit(&image, config.limits.max_pixels)?;

    let image_type = image.loader().map(classify).unwrap_or(ImageType::Unknown);
    if image_type == ImageType::Unknown {
        return Err(Error::UnsupportedFormat(
            "source image type is not recognised".into(),
        ));
    }

    let output = request
        .output
        .unwrap_or_else(|| default_output_for(image_type));
    let enabled = config.output.enabled;
    if !enabled.contains(output) {
        return Err(Error::UnsupportedFormat(format!(
            "{output} output is disabled, enabled outputs: {}",
            enabled.render()
        )));
    }
    log::info!(
        "{image_type} {}x{} -> {output}",
        image.width(),
        image.height()
    );

    if output == OutputFormat::Json {
        return Ok(Plan::Metadata(metadata::serialize(&image, image_type)));
    }

    let mut image = if output.can_animate() {
        image
    } else {
        first_page(image)?
    };

    let frames = FrameSet::of(&image);
    if let Some((width, height)) =
        fit_target(image.width(), frames.page_height, request.width, request.height)
    {
        image = resize_and_crop(&image, frames, width, height, request.crop)?;
    }

    Ok(Plan::Render(Render {
        image,
        output,
        quality: request
            .quality
            .unwrap_or_else(|| Quality::new(config.output.quality)),
        deadline: config.limits.process_timeout,
    }))
}

fn check_pixel_limit(image: &RasterImage, max_pixels: u64) -> Result<()> {
    let pixels = u64::from(image.width()) * u64::from(image.height());
    if max_pixels > 0 && pixels > max_pixels {
        return Err(EngineError::PixelLimit { pixels, max_pixels }.into());
    }
    Ok(())
}

/// Drop every frame but the first.
fn first_page(image: RasterImage) -> Result<RasterImage> {
    let frames = FrameSet::of(&image);
    if !frames.is_multi_frame() {
        return Ok(image);
    }
    log::debug!("keeping first of {} frames", frames.n_pages);
    let mut page = image.extract_area(0, 0, image.width(), frames.page_height)?;
    for key in [
        attributes::N_PAGES,
        attributes::PAGE_HEIGHT,
        attributes::DELAY,
        attributes::LOOP,
    ] {
        page.remove_attribute(key);
    }
    Ok(page)
}

/// Cover-resize every frame to at least `width`x`height`, then cut the
/// window out of each.
fn resize_and_crop(
    image: &RasterImage,
    frames: FrameSet,
    width: u32,
    height: u32,
    crop: Crop,
) -> Result<RasterImage> {
    let (in_w, in_h) = (image.width(), frames.page_height);
    let factor = shrink_factor(in_w, in_h, width, height);
    let (resized_w, resized_h) = cover_dimensions(in_w, in_h, factor);
    let resized = resize_frames(image, frames, resized_w, resized_h)?;

    let (crop_w, crop_h) = (width.min(resized_w), height.min(resized_h));
    let (left, top) = match crop {
        Crop::Position(pos) => resolve_anchor(crop_w, crop_h, resized_w, resized_h, pos),
        Crop::FocalPoint { x, y } => {
            resolve_focal(x, y, in_w, in_h, crop_w, crop_h, resized_w, resized_h)
        }
    };

    let mut cropped =
        composite_frames(&resized, left, top, crop_w, crop_h, frames.n_pages, resized_h)?;
    if frames.is_multi_frame() {
        cropped.set_attribute(attributes::PAGE_HEIGHT, AttributeValue::Int(crop_h as i32));
    }
    Ok(cropped)
}

fn resize_frames(
    image: &RasterImage,
    frames: FrameSet,
    width: u32,
    height: u32,
) -> Result<RasterImage> {
    if (width, height) == (image.width(), frames.page_height) {
        return Ok(image.clone());
    }
    if !frames.is_multi_frame() {
        return image.resize(width, height);
    }
    let pages = frames
        .pages(image.width())
        .into_iter()
        .map(|r| image.extract_area(r.left, r.top, r.width, r.height)?.resize(width, height))
        .collect::<Result<Vec<_>>>()?;
    let mut strip = RasterImage::join_vertical(pages)?;
    strip.set_attribute(attributes::PAGE_HEIGHT, AttributeValue::Int(height as i32));
    Ok(strip)
}
