//! End-to-end runs of the transformation pipeline on in-memory images.

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::{
    AnimationDecoder, Delay, DynamicImage, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage,
};
use imgserve::Error;
use imgserve::config::GatewayConfig;
use imgserve::engine::{ImageHandle, KillSwitch, Progress};
use imgserve::format::{OutputFormat, OutputSet};
use imgserve::geometry::Position;
use imgserve::pipeline::{self, Crop, Plan, Request, Response};
use std::io::Cursor;
use std::time::Duration;

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// Left half red, right half blue.
fn split_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([255, 0, 0])
        } else {
            Rgb([0, 0, 255])
        }
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}

/// Three solid frames (red, green, blue), 100ms each.
fn animated_gif(width: u32, height: u32) -> Vec<u8> {
    let colours = [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]];
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        let frames = colours.map(|c| {
            Frame::from_parts(
                RgbaImage::from_pixel(width, height, Rgba(c)),
                0,
                0,
                Delay::from_numer_denom_ms(100, 1),
            )
        });
        encoder.encode_frames(frames).unwrap();
    }
    buf
}

fn decode_gif_frames(bytes: &[u8]) -> Vec<Frame> {
    GifDecoder::new(Cursor::new(bytes))
        .unwrap()
        .into_frames()
        .collect_frames()
        .unwrap()
}

fn metadata(bytes: &[u8], all_pages: bool) -> String {
    let request = Request {
        output: Some(OutputFormat::Json),
        all_pages,
        ..Request::default()
    };
    match pipeline::run(bytes, &request, &GatewayConfig::default()).unwrap() {
        Response::Metadata(json) => json,
        other => panic!("expected metadata, got {other:?}"),
    }
}

// =========================================================================
// Metadata
// =========================================================================

#[test]
fn png_metadata_is_exact() {
    let json = metadata(&split_png(64, 32), false);
    assert_eq!(
        json,
        r#"{"format":"png","width":64,"height":32,"space":"srgb","channels":3,"depth":"uchar","isProgressive":false,"hasProfile":false,"hasAlpha":false,"orientation":0}"#
    );
}

#[test]
fn animated_gif_metadata_lists_frames() {
    let json = metadata(&animated_gif(20, 10), true);
    assert!(json.starts_with(r#"{"format":"gif","width":20,"height":30,"#), "{json}");
    assert!(json.contains(r#""pages":3,"pageHeight":10,"delay":[100,100,100]"#), "{json}");
}

#[test]
fn animated_gif_first_page_still_reports_frames() {
    let json = metadata(&animated_gif(20, 10), false);
    assert!(json.starts_with(r#"{"format":"gif","width":20,"height":10,"#), "{json}");
    assert!(json.contains(r#""pages":3,"pageHeight":10,"delay":[100,100,100]"#), "{json}");
}

#[test]
fn jpeg_density_is_reported() {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new(&mut jpeg);
    encoder.set_pixel_density(PixelDensity::dpi(72));
    DynamicImage::ImageRgb8(RgbImage::new(16, 16))
        .write_with_encoder(encoder)
        .unwrap();
    let json = metadata(&jpeg, false);
    assert!(json.contains(r#""depth":"uchar","density":72,"#), "{json}");
}

#[test]
fn jpeg_metadata_reports_header_facts() {
    let jpeg = encode(DynamicImage::ImageRgb8(RgbImage::new(16, 16)), ImageFormat::Jpeg);
    let json = metadata(&jpeg, false);
    assert!(json.starts_with(r#"{"format":"jpeg","width":16,"height":16,"#), "{json}");
    assert!(json.contains(r#""chromaSubsampling":""#), "{json}");
    assert!(json.contains(r#""isProgressive":false"#), "{json}");
}

// =========================================================================
// Crop
// =========================================================================

#[test]
fn anchor_crop_picks_the_requested_side() {
    let source = split_png(40, 20);
    for (position, expected) in [(Position::Left, [255, 0, 0]), (Position::Right, [0, 0, 255])] {
        let request = Request {
            width: Some(10),
            height: Some(20),
            crop: Crop::Position(position),
            ..Request::default()
        };
        let response = pipeline::run(&source, &request, &GatewayConfig::default()).unwrap();
        assert_eq!(response.format(), OutputFormat::Png);

        let out = image::load_from_memory(response.body()).unwrap().to_rgb8();
        assert_eq!(out.dimensions(), (10, 20));
        assert_eq!(out.get_pixel(5, 10).0, expected, "{position}");
    }
}

#[test]
fn width_only_keeps_aspect_ratio() {
    let request = Request {
        width: Some(20),
        ..Request::default()
    };
    let response = pipeline::run(&split_png(40, 20), &request, &GatewayConfig::default()).unwrap();
    let out = image::load_from_memory(response.body()).unwrap();
    assert_eq!((out.width(), out.height()), (20, 10));
}

#[test]
fn focal_point_selects_region() {
    let request = Request {
        width: Some(10),
        height: Some(20),
        crop: Crop::FocalPoint { x: 0.9, y: 0.5 },
        ..Request::default()
    };
    let response = pipeline::run(&split_png(40, 20), &request, &GatewayConfig::default()).unwrap();
    let out = image::load_from_memory(response.body()).unwrap().to_rgb8();
    assert_eq!(out.dimensions(), (10, 20));
    assert_eq!(out.get_pixel(5, 10).0, [0, 0, 255]);
}

#[test]
fn explicit_output_format() {
    let request = Request {
        width: Some(8),
        height: Some(8),
        output: Some(OutputFormat::Jpeg),
        ..Request::default()
    };
    let response = pipeline::run(&split_png(32, 32), &request, &GatewayConfig::default()).unwrap();
    assert_eq!(image::guess_format(response.body()).unwrap(), ImageFormat::Jpeg);
    assert_eq!(response.extension(), ".jpg");
}

// =========================================================================
// Animated input
// =========================================================================

#[test]
fn animated_gif_is_cropped_per_frame() {
    let request = Request {
        width: Some(10),
        height: Some(5),
        all_pages: true,
        ..Request::default()
    };
    let response =
        pipeline::run(&animated_gif(20, 10), &request, &GatewayConfig::default()).unwrap();
    assert_eq!(response.format(), OutputFormat::Gif);

    let frames = decode_gif_frames(response.body());
    assert_eq!(frames.len(), 3);
    for frame in &frames {
        assert_eq!(frame.buffer().dimensions(), (10, 5));
    }
    // Frames stay in order and do not bleed into each other
    assert_eq!(frames[0].buffer().get_pixel(5, 4).0[..3], [255, 0, 0]);
    assert_eq!(frames[2].buffer().get_pixel(5, 0).0[..3], [0, 0, 255]);
}

#[test]
fn animated_gif_vertical_crop_uses_general_path() {
    // 20x10 frames into 20x4: factor 1, rows cut from the middle of each frame
    let request = Request {
        width: Some(20),
        height: Some(4),
        all_pages: true,
        ..Request::default()
    };
    let response =
        pipeline::run(&animated_gif(20, 10), &request, &GatewayConfig::default()).unwrap();
    let frames = decode_gif_frames(response.body());
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1].buffer().dimensions(), (20, 4));
    assert_eq!(frames[1].buffer().get_pixel(0, 0).0[..3], [0, 255, 0]);
}

#[test]
fn still_output_keeps_only_the_first_frame() {
    let request = Request {
        output: Some(OutputFormat::Png),
        all_pages: true,
        ..Request::default()
    };
    let response =
        pipeline::run(&animated_gif(20, 10), &request, &GatewayConfig::default()).unwrap();
    let out = image::load_from_memory(response.body()).unwrap().to_rgba8();
    assert_eq!(out.dimensions(), (20, 10));
    assert_eq!(out.get_pixel(0, 0).0[..3], [255, 0, 0]);
}

// =========================================================================
// Rejections
// =========================================================================

#[test]
fn disabled_output_is_rejected() {
    let mut config = GatewayConfig::default();
    config.output.enabled = [OutputFormat::Jpeg, OutputFormat::Png]
        .into_iter()
        .collect::<OutputSet>();
    let request = Request {
        output: Some(OutputFormat::Gif),
        ..Request::default()
    };
    match pipeline::run(&split_png(4, 4), &request, &config) {
        Err(Error::UnsupportedFormat(msg)) => assert!(msg.ends_with("jpeg, png"), "{msg}"),
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
}

#[test]
fn unsupported_input_is_rejected() {
    // BMP magic is recognised, but there is no loader for it
    let mut bmp = b"BM".to_vec();
    bmp.resize(64, 0);
    assert!(matches!(
        pipeline::run(&bmp, &Request::default(), &GatewayConfig::default()),
        Err(Error::UnsupportedFormat(_))
    ));
}

// =========================================================================
// Deadline
// =========================================================================

#[test]
fn timeout_comes_back_from_the_encoder_unchanged() {
    let mut config = GatewayConfig::default();
    config.limits.process_timeout = 1;
    let request = Request {
        width: Some(20),
        ..Request::default()
    };
    let Plan::Render(render) = pipeline::plan(&split_png(40, 40), &request, &config).unwrap()
    else {
        panic!("expected an image to render");
    };

    // Hold up the first checkpoint past the one second budget; the guard
    // sees the elapsed time at the next one
    let mut stalled = false;
    render
        .image()
        .on_eval(Box::new(move |_: &Progress, _: &KillSwitch| {
            if !stalled {
                stalled = true;
                std::thread::sleep(Duration::from_millis(1100));
            }
        }));

    match render.execute() {
        Err(Error::EvaluationTimeout(t)) => {
            assert_eq!(t.deadline, 1);
            assert!(t.run >= 1, "{t}");
            assert!(t.percent < 100, "{t}");
            assert!(
                t.to_string()
                    .starts_with("Maximum image processing time of 1 second exceeded with "),
                "{t}"
            );
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[test]
fn run_without_handlers_finishes_within_budget() {
    let mut config = GatewayConfig::default();
    config.limits.process_timeout = 1;
    let request = Request {
        width: Some(20),
        ..Request::default()
    };
    assert!(pipeline::run(&split_png(40, 40), &request, &config).is_ok());
}
