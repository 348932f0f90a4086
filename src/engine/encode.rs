//! Encoders for [`RasterImage`].
//!
//! | Output | Encoder |
//! |---|---|
//! | JPEG | `image::codecs::jpeg::JpegEncoder` with quality |
//! | PNG | `image::codecs::png::PngEncoder` |
//! | WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//! | AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | TIFF | `image::codecs::tiff::TiffEncoder` |
//! | GIF | `image::codecs::gif::GifEncoder`, one frame per page |
//!
//! Only GIF writes every page of a multi-page strip. Every other encoder
//! receives the strip as one tall image, so callers flatten first.

use super::attributes::{self, AttributeExt};
use super::{ImageHandle, Interpretation, RasterImage};
use crate::error::{Error, Result};
use crate::format::OutputFormat;
use image::codecs::avif::AvifEncoder;
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops;
use image::{Delay, DynamicImage, Frame, RgbaImage};
use std::io::Cursor;

/// Frame delay used when the source recorded none.
const DEFAULT_DELAY_MS: i32 = 100;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    fn as_u8(self) -> u8 {
        self.0 as u8
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

impl RasterImage {
    /// Evaluate the image and encode it in memory.
    ///
    /// Fails with the kill switch's reason if evaluation is aborted, and with
    /// `UnsupportedFormat` for [`OutputFormat::Json`], which has no encoder.
    pub fn write_to_buffer(&self, format: OutputFormat, quality: Quality) -> Result<Vec<u8>> {
        if format == OutputFormat::Json {
            return Err(Error::UnsupportedFormat(
                "json is produced by the metadata serializer, not an encoder".into(),
            ));
        }

        let strip = self.evaluate()?;
        let mut buf = Cursor::new(Vec::new());
        if format == OutputFormat::Gif {
            self.write_gif(strip, &mut buf)?;
        } else {
            let pixels = self.restore_bands(strip, format);
            match format {
                OutputFormat::Jpeg => pixels
                    .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.as_u8()))?,
                OutputFormat::Webp => pixels.write_with_encoder(WebPEncoder::new_lossless(&mut buf))?,
                OutputFormat::Avif => pixels.write_with_encoder(
                    AvifEncoder::new_with_speed_quality(&mut buf, 6, quality.as_u8()),
                )?,
                OutputFormat::Tiff => pixels.write_with_encoder(TiffEncoder::new(&mut buf))?,
                _ => pixels.write_with_encoder(PngEncoder::new(&mut buf))?,
            }
        }

        log::debug!(
            "encoded {}x{} {format} ({} bytes)",
            self.width(),
            self.height(),
            buf.get_ref().len()
        );
        Ok(buf.into_inner())
    }

    /// Convert the internal RGBA pixels back to the decoded channel layout.
    ///
    /// Greyscale is restored for the encoders that write it natively; alpha
    /// is dropped when the source had none or the target is JPEG.
    fn restore_bands(&self, strip: RgbaImage, format: OutputFormat) -> DynamicImage {
        let pixels = DynamicImage::ImageRgba8(strip);
        let grey = matches!(
            self.interpretation(),
            Interpretation::BW | Interpretation::Grey16
        ) && matches!(
            format,
            OutputFormat::Jpeg | OutputFormat::Png | OutputFormat::Webp
        );
        let alpha = self.has_alpha() && format != OutputFormat::Jpeg;

        match (grey, alpha) {
            (true, true) => DynamicImage::ImageLumaA8(pixels.to_luma_alpha8()),
            (true, false) => DynamicImage::ImageLuma8(pixels.to_luma8()),
            (false, true) => pixels,
            (false, false) => DynamicImage::ImageRgb8(pixels.to_rgb8()),
        }
    }

    fn write_gif(&self, strip: RgbaImage, out: &mut Cursor<Vec<u8>>) -> Result<()> {
        let page_height = attributes::page_height(self);
        let delays = self.frame_delays().map(<[i32]>::to_vec).unwrap_or_default();
        let repeat = match self.loop_count() {
            Some(n) if n > 0 => Repeat::Finite(n.min(i32::from(u16::MAX)) as u16),
            _ => Repeat::Infinite,
        };

        let width = strip.width();
        let frames = (0..strip.height() / page_height.max(1)).map(|i| {
            let page = imageops::crop_imm(&strip, 0, i * page_height, width, page_height).to_image();
            let ms = delays
                .get(i as usize)
                .copied()
                .unwrap_or(DEFAULT_DELAY_MS)
                .max(0) as u32;
            Frame::from_parts(page, 0, 0, Delay::from_numer_denom_ms(ms, 1))
        });

        // Dropping the encoder writes the GIF trailer.
        let mut encoder = GifEncoder::new_with_speed(out, 10);
        encoder.set_repeat(repeat)?;
        encoder.encode_frames(frames)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AttributeValue;
    use image::{AnimationDecoder, ImageFormat, Rgba};

    fn solid(width: u32, height: u32) -> RasterImage {
        RasterImage::from_rgba(RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255])))
    }

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_80() {
        assert_eq!(Quality::default().value(), 80);
    }

    #[test]
    fn encodes_each_still_format() {
        let img = solid(8, 6);
        for (format, expected) in [
            (OutputFormat::Jpeg, ImageFormat::Jpeg),
            (OutputFormat::Png, ImageFormat::Png),
            (OutputFormat::Webp, ImageFormat::WebP),
            (OutputFormat::Tiff, ImageFormat::Tiff),
        ] {
            let bytes = img.write_to_buffer(format, Quality::default()).unwrap();
            assert_eq!(image::guess_format(&bytes).unwrap(), expected, "{format}");
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (8, 6), "{format}");
        }
    }

    #[test]
    fn json_has_no_encoder() {
        assert!(matches!(
            solid(2, 2).write_to_buffer(OutputFormat::Json, Quality::default()),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn gif_writes_one_frame_per_page() {
        let mut img = solid(6, 12);
        img.set_attribute(attributes::PAGE_HEIGHT, AttributeValue::Int(4));
        img.set_attribute(attributes::DELAY, AttributeValue::IntArray(vec![50, 60, 70]));
        let bytes = img.write_to_buffer(OutputFormat::Gif, Quality::default()).unwrap();

        let decoder = image::codecs::gif::GifDecoder::new(Cursor::new(bytes)).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].buffer().dimensions(), (6, 4));
        assert_eq!(frames[2].delay().numer_denom_ms(), (70, 1));
    }

    #[test]
    fn opaque_source_encodes_without_alpha() {
        let img = RasterImage::from_dynamic(DynamicImage::new_rgb8(4, 4));
        let bytes = img.write_to_buffer(OutputFormat::Png, Quality::default()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }
}
