//! Bundled engine: a demand-driven region graph over the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP, GIF) | `image::ImageReader` |
//! | Animated GIF / WebP frames | `image::AnimationDecoder::into_frames` |
//! | Header facts (progressive, chroma, orientation) | [`probe`](super::probe) |
//! | Crop | `image::imageops::crop_imm` |
//! | Resize | `image::imageops::resize` with `Lanczos3`, one axis at a time |
//! | Encode | see [`encode`](super::encode) |
//!
//! Building a [`RasterImage`] from another only records a graph node.
//! Pixels are produced by [`RasterImage::evaluate`], which asks the graph
//! for one batch of scanlines at a time and notifies progress handlers
//! after each batch. Every node can serve an arbitrary rectangle, so a crop
//! of a crop of a join only ever touches the source rows it needs.
//!
//! A resize needs its whole input, so it is computed once and cached. The
//! work is split into bands of rows (horizontal pass) and strips of columns
//! (vertical pass) with a progress checkpoint after each, so a deadline can
//! stop it part way. Decoding happens eagerly in [`RasterImage::decode`],
//! before any handler can be attached, and is not covered by checkpoints.
//!
//! Pixels are held as 8-bit RGBA internally. The band count, band format
//! and interpretation reported by the decoder are kept alongside and drive
//! metadata and the channel layout on encode.
//!
//! Loader names follow the `VipsForeignLoad*` convention so handles from
//! this engine classify the same way as handles from libvips.

use super::attributes::{self, AttributeValue};
use super::probe;
use super::progress::{EvalHandler, KillSwitch, Progress};
use super::{BandFormat, ImageHandle, Interpretation};
use crate::error::{EngineError, Error, Result};
use crate::format::GIF_LOADER;
use crate::geometry::Rect;
use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::imageops::{self, FilterType};
use image::{
    AnimationDecoder, ColorType, DynamicImage, Frame, ImageDecoder, ImageFormat, ImageReader,
    RgbaImage,
};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

/// Scanlines computed between progress notifications.
const BATCH_ROWS: u32 = 16;

/// Rows (or columns) resampled between progress notifications.
const RESAMPLE_BAND: u32 = 64;

/// Options for [`RasterImage::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Decode every frame of animated GIF/WebP input into a vertical strip.
    pub all_pages: bool,
    /// Upper bound on decoded frames.
    pub max_pages: u32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            all_pages: false,
            max_pages: 256,
        }
    }
}

struct Graph {
    width: u32,
    height: u32,
    op: Op,
}

enum Op {
    Source(RgbaImage),
    Extract {
        input: Arc<Graph>,
        left: u32,
        top: u32,
    },
    Join(Vec<Arc<Graph>>),
    Resize {
        input: Arc<Graph>,
        cache: OnceLock<RgbaImage>,
    },
}

impl Graph {
    /// Compute the pixels of `r`, which must lie inside this node.
    fn region(&self, r: Rect, checkpoint: &Checkpoint<'_>) -> Result<RgbaImage> {
        match &self.op {
            Op::Source(pixels) => {
                Ok(imageops::crop_imm(pixels, r.left, r.top, r.width, r.height).to_image())
            }
            Op::Extract { input, left, top } => input.region(
                Rect {
                    left: r.left + left,
                    top: r.top + top,
                    ..r
                },
                checkpoint,
            ),
            Op::Join(parts) => {
                let mut raw = Vec::with_capacity(r.width as usize * r.height as usize * 4);
                let mut part_top = 0;
                for part in parts {
                    let part_bottom = part_top + part.height;
                    let from = r.top.max(part_top);
                    let to = r.bottom().min(part_bottom);
                    if from < to {
                        let tile = part.region(
                            Rect::new(r.left, from - part_top, r.width, to - from),
                            checkpoint,
                        )?;
                        raw.extend_from_slice(tile.as_raw());
                    }
                    part_top = part_bottom;
                }
                RgbaImage::from_raw(r.width, r.height, raw).ok_or_else(|| {
                    EngineError::ProcessingFailed(format!(
                        "joined region {}x{} is incomplete",
                        r.width, r.height
                    ))
                    .into()
                })
            }
            Op::Resize { input, cache } => {
                let resized = match cache.get() {
                    Some(resized) => resized,
                    None => {
                        let resized = resample(input, self.width, self.height, checkpoint)?;
                        cache.get_or_init(|| resized)
                    }
                };
                Ok(imageops::crop_imm(resized, r.left, r.top, r.width, r.height).to_image())
            }
        }
    }
}

/// Lanczos3 resize of a whole node to `width`x`height`.
///
/// Rows are independent in the horizontal pass and columns in the vertical
/// one, so each pass runs band by band with a checkpoint in between.
fn resample(
    input: &Graph,
    width: u32,
    height: u32,
    checkpoint: &Checkpoint<'_>,
) -> Result<RgbaImage> {
    let mut wide = RgbaImage::new(width, input.height);
    let mut top = 0;
    while top < input.height {
        let rows = RESAMPLE_BAND.min(input.height - top);
        let band = input.region(Rect::new(0, top, input.width, rows), checkpoint)?;
        let band = imageops::resize(&band, width, rows, FilterType::Lanczos3);
        imageops::replace(&mut wide, &band, 0, i64::from(top));
        top += rows;
        checkpoint.check()?;
    }

    let mut resized = RgbaImage::new(width, height);
    let mut left = 0;
    while left < width {
        let cols = RESAMPLE_BAND.min(width - left);
        let strip = imageops::crop_imm(&wide, left, 0, cols, input.height).to_image();
        let strip = imageops::resize(&strip, cols, height, FilterType::Lanczos3);
        imageops::replace(&mut resized, &strip, i64::from(left), 0);
        left += cols;
        checkpoint.check()?;
    }
    Ok(resized)
}

/// Per-image evaluation hook.
#[derive(Default)]
struct EvalHook {
    handlers: Mutex<Vec<EvalHandler>>,
    kill: KillSwitch,
}

impl EvalHook {
    fn notify(&self, start: Instant, tpels: u64, npels: u64) {
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.is_empty() {
            return;
        }

        let elapsed = start.elapsed();
        let percent = if tpels == 0 { 100 } else { npels * 100 / tpels };
        let eta = if npels == 0 {
            0
        } else {
            (elapsed.as_secs_f64() * (tpels - npels) as f64 / npels as f64) as u64
        };
        let progress = Progress {
            run: elapsed.as_secs(),
            eta,
            tpels,
            npels,
            percent: percent as u32,
        };
        for handler in handlers.iter_mut() {
            handler(&progress, &self.kill);
        }
    }
}

/// Progress of one [`RasterImage::evaluate`] call, shared with every node
/// that does expensive work.
struct Checkpoint<'a> {
    hook: &'a EvalHook,
    start: Instant,
    tpels: u64,
    /// Output pixels finished so far.
    npels: Cell<u64>,
}

impl Checkpoint<'_> {
    /// Notify handlers, then fail if one of them flipped the kill switch.
    fn check(&self) -> Result<()> {
        self.hook.notify(self.start, self.tpels, self.npels.get());
        if self.hook.kill.is_killed() {
            return Err(self.hook.kill.to_error());
        }
        Ok(())
    }
}

/// A lazily evaluated image.
///
/// Clones share the graph, the evaluation hook and the kill switch.
/// Attributes are copied, so setting one on a clone does not affect the
/// original.
#[derive(Clone)]
pub struct RasterImage {
    graph: Arc<Graph>,
    bands: u32,
    band_format: BandFormat,
    interpretation: Interpretation,
    xres: f64,
    attributes: BTreeMap<String, AttributeValue>,
    hook: Arc<EvalHook>,
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.graph.width)
            .field("height", &self.graph.height)
            .field("bands", &self.bands)
            .field("interpretation", &self.interpretation)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RasterImage {
    /// Wrap RGBA pixels as a 4-band sRGB image.
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        let graph = Graph {
            width: pixels.width(),
            height: pixels.height(),
            op: Op::Source(pixels),
        };
        Self {
            graph: Arc::new(graph),
            bands: 4,
            band_format: BandFormat::Uchar,
            interpretation: Interpretation::Srgb,
            xres: 1.0,
            attributes: BTreeMap::new(),
            hook: Arc::default(),
        }
    }

    /// Wrap decoded pixels, keeping their band layout as metadata.
    pub fn from_dynamic(pixels: DynamicImage) -> Self {
        let color = pixels.color();
        let (interpretation, band_format) = describe_color(color);
        Self {
            bands: u32::from(color.channel_count()),
            band_format,
            interpretation,
            ..Self::from_rgba(pixels.into_rgba8())
        }
    }

    /// Set the horizontal resolution in pixels per millimetre.
    pub fn with_resolution(mut self, xres: f64) -> Self {
        self.xres = xres;
        self
    }

    /// Decode an in-memory image, guessing its container from magic bytes.
    pub fn decode(data: &[u8], options: &LoadOptions) -> Result<Self> {
        let format = image::guess_format(data)?;
        let loader = loader_name(format)?;

        let animation = read_animation(data, format, options)?;
        let mut image = match &animation {
            Some(animation) if options.all_pages => animation.strip()?,
            _ => decode_still(data, format)?,
        };
        if let Some(animation) = animation {
            image.set_attribute(
                attributes::N_PAGES,
                AttributeValue::Int(animation.delays.len() as i32),
            );
            image.set_attribute(
                attributes::PAGE_HEIGHT,
                AttributeValue::Int(animation.page_height as i32),
            );
            image.set_attribute(attributes::DELAY, AttributeValue::IntArray(animation.delays));
        }

        let header = probe::probe(data, format);
        if header.interlaced {
            image.set_attribute(attributes::INTERLACED, AttributeValue::Int(1));
        }
        if let Some(label) = header.chroma_subsampling {
            image.set_attribute(attributes::CHROMA_SUBSAMPLE, AttributeValue::Str(label));
        }
        if let Some(depth) = header.palette_bit_depth {
            image.set_attribute(attributes::PALETTE_BIT_DEPTH, AttributeValue::Int(depth.into()));
        }
        if let Some(orientation) = header.orientation {
            image.set_attribute(attributes::ORIENTATION, AttributeValue::Int(orientation.into()));
        }
        if let Some(xres) = header.resolution {
            image.xres = xres;
        }

        log::debug!(
            "decoded {}x{} image with {loader}",
            image.width(),
            image.height()
        );
        image.set_attribute(attributes::LOADER, AttributeValue::Str(loader));
        Ok(image)
    }

    /// Cover-style resize to exactly `width`x`height`.
    pub fn resize(&self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::ProcessingFailed(format!(
                "cannot resize to {width}x{height}"
            ))
            .into());
        }
        Ok(self.derive(Graph {
            width,
            height,
            op: Op::Resize {
                input: Arc::clone(&self.graph),
                cache: OnceLock::new(),
            },
        }))
    }

    /// Compute every pixel, notifying progress handlers as rows complete.
    ///
    /// Fails with the kill switch's reason as soon as it is flipped.
    pub fn evaluate(&self) -> Result<RgbaImage> {
        let kill = &self.hook.kill;
        if kill.is_killed() {
            return Err(kill.to_error());
        }

        let (width, height) = (self.width(), self.height());
        let tpels = u64::from(width) * u64::from(height);
        let checkpoint = Checkpoint {
            hook: &self.hook,
            start: Instant::now(),
            tpels,
            npels: Cell::new(0),
        };
        let mut raw = Vec::with_capacity(tpels as usize * 4);

        let mut top = 0;
        while top < height {
            let rows = BATCH_ROWS.min(height - top);
            let tile = self
                .graph
                .region(Rect::new(0, top, width, rows), &checkpoint)?;
            raw.extend_from_slice(tile.as_raw());
            top += rows;

            checkpoint.npels.set(u64::from(width) * u64::from(top));
            checkpoint
                .check()
                .inspect_err(|_| log::debug!("evaluation killed at row {top} of {height}"))?;
        }

        RgbaImage::from_raw(width, height, raw).ok_or_else(|| {
            EngineError::ProcessingFailed(format!("evaluated {width}x{height} image is incomplete"))
                .into()
        })
    }

    pub(crate) fn eval_handler_count(&self) -> usize {
        self.hook
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// A new image computed by `graph`, inheriting properties and attributes.
    fn derive(&self, graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
            bands: self.bands,
            band_format: self.band_format,
            interpretation: self.interpretation,
            xres: self.xres,
            attributes: self.attributes.clone(),
            hook: Arc::default(),
        }
    }
}

impl ImageHandle for RasterImage {
    fn width(&self) -> u32 {
        self.graph.width
    }

    fn height(&self) -> u32 {
        self.graph.height
    }

    fn bands(&self) -> u32 {
        self.bands
    }

    fn band_format(&self) -> BandFormat {
        self.band_format
    }

    fn interpretation(&self) -> Interpretation {
        self.interpretation
    }

    fn xres(&self) -> f64 {
        self.xres
    }

    fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    fn set_attribute(&mut self, name: &str, value: AttributeValue) {
        self.attributes.insert(name.to_string(), value);
    }

    fn remove_attribute(&mut self, name: &str) {
        self.attributes.remove(name);
    }

    fn extract_area(&self, left: u32, top: u32, width: u32, height: u32) -> Result<Self> {
        let area = Rect::new(left, top, width, height);
        if !area.fits_within(self.width(), self.height()) {
            return Err(Error::GeometryOutOfBounds {
                left,
                top,
                width,
                height,
                image_width: self.width(),
                image_height: self.height(),
            });
        }
        Ok(self.derive(Graph {
            width,
            height,
            op: Op::Extract {
                input: Arc::clone(&self.graph),
                left,
                top,
            },
        }))
    }

    fn join_vertical(frames: Vec<Self>) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(EngineError::ProcessingFailed("no frames to join".into()).into());
        };
        let width = first.width();
        if let Some(odd) = frames.iter().find(|f| f.width() != width) {
            return Err(EngineError::ProcessingFailed(format!(
                "cannot join a {}px wide frame onto {width}px wide frames",
                odd.width()
            ))
            .into());
        }
        let height = frames.iter().map(|f| f.height()).sum();
        let parts = frames.iter().map(|f| Arc::clone(&f.graph)).collect();
        Ok(first.derive(Graph {
            width,
            height,
            op: Op::Join(parts),
        }))
    }

    fn on_eval(&self, handler: EvalHandler) {
        self.hook
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn kill_switch(&self) -> &KillSwitch {
        &self.hook.kill
    }
}

fn describe_color(color: ColorType) -> (Interpretation, BandFormat) {
    match color {
        ColorType::L8 | ColorType::La8 => (Interpretation::BW, BandFormat::Uchar),
        ColorType::L16 | ColorType::La16 => (Interpretation::Grey16, BandFormat::Ushort),
        ColorType::Rgb8 | ColorType::Rgba8 => (Interpretation::Srgb, BandFormat::Uchar),
        ColorType::Rgb16 | ColorType::Rgba16 => (Interpretation::Rgb16, BandFormat::Ushort),
        ColorType::Rgb32F | ColorType::Rgba32F => (Interpretation::Scrgb, BandFormat::Float),
        _ => (Interpretation::Multiband, BandFormat::Uchar),
    }
}

fn loader_name(format: ImageFormat) -> Result<String> {
    let prefix = match format {
        ImageFormat::Jpeg => "VipsForeignLoadJpeg",
        ImageFormat::Png => "VipsForeignLoadPng",
        ImageFormat::WebP => "VipsForeignLoadWebp",
        ImageFormat::Tiff => "VipsForeignLoadTiff",
        ImageFormat::Gif => GIF_LOADER,
        other => {
            return Err(Error::UnsupportedFormat(format!(
                "no loader for {other:?} input"
            )));
        }
    };
    Ok(format!("{prefix}Buffer"))
}

fn decode_still(data: &[u8], format: ImageFormat) -> Result<RasterImage> {
    let mut decoder = ImageReader::with_format(Cursor::new(data), format).into_decoder()?;
    let icc = decoder.icc_profile()?;
    let mut image = RasterImage::from_dynamic(DynamicImage::from_decoder(decoder)?);
    if let Some(profile) = icc {
        image.set_attribute(attributes::ICC_PROFILE, AttributeValue::Blob(profile));
    }
    Ok(image)
}

/// Frame facts of an animated GIF or WebP.
struct Animation {
    page_height: u32,
    /// Per-frame delays in milliseconds, one per counted frame.
    delays: Vec<i32>,
    /// Frame pixels. Empty unless every page was requested.
    frames: Vec<RgbaImage>,
}

impl Animation {
    /// Stack the kept frames into one strip.
    fn strip(&self) -> Result<RasterImage> {
        let Some(first) = self.frames.first() else {
            return Err(EngineError::ProcessingFailed("animation has no frames".into()).into());
        };
        let width = first.width();
        let n_pages = self.frames.len() as u32;
        let raw = self
            .frames
            .iter()
            .flat_map(|frame| frame.as_raw().iter().copied())
            .collect();
        let strip = RgbaImage::from_raw(width, self.page_height * n_pages, raw).ok_or_else(|| {
            EngineError::ProcessingFailed(format!("could not assemble {n_pages} frames"))
        })?;
        Ok(RasterImage::from_rgba(strip))
    }
}

/// Count up to `max_pages` frames and read their delays.
///
/// Frame pixels are kept only with `all_pages`. Returns `None` for formats
/// without animation and for still WebP files.
fn read_animation(
    data: &[u8],
    format: ImageFormat,
    options: &LoadOptions,
) -> Result<Option<Animation>> {
    let frames = match format {
        ImageFormat::Gif => GifDecoder::new(Cursor::new(data))?.into_frames(),
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(data))?;
            if !decoder.has_animation() {
                return Ok(None);
            }
            decoder.into_frames()
        }
        _ => return Ok(None),
    };

    let mut size = None;
    let mut delays = Vec::new();
    let mut kept = Vec::new();
    for frame in frames.take(options.max_pages.max(1) as usize) {
        let frame = frame?;
        let (width, height) = *size.get_or_insert(frame.buffer().dimensions());
        let (numer, denom) = frame.delay().numer_denom_ms();
        delays.push((numer / denom.max(1)) as i32);
        if options.all_pages {
            kept.push(frame_pixels(frame, width, height));
        }
    }
    Ok(size.map(|(_, page_height)| Animation {
        page_height,
        delays,
        frames: kept,
    }))
}

/// A frame's pixels on a canvas of the first frame's size.
fn frame_pixels(frame: Frame, width: u32, height: u32) -> RgbaImage {
    if frame.buffer().dimensions() == (width, height) {
        return frame.into_buffer();
    }
    let mut canvas = RgbaImage::new(width, height);
    imageops::overlay(
        &mut canvas,
        frame.buffer(),
        i64::from(frame.left()),
        i64::from(frame.top()),
    );
    canvas
}
