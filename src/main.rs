use clap::{Parser, Subcommand};
use imgserve::config::{self, GatewayConfig};
use imgserve::engine::Quality;
use imgserve::format::OutputFormat;
use imgserve::geometry::Position;
use imgserve::pipeline::{self, Crop, Request};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "imgserve")]
#[command(about = "Resize, crop and describe images")]
#[command(long_about = "\
Resize, crop and describe images

Runs the transformation core of the image gateway on local files. Inputs
may be JPEG, PNG, WebP, TIFF or GIF; animated GIF/WebP keep every frame
when --all-pages is given and the output is GIF.

Crops use cover semantics: the image is scaled so it covers the target
box, then the box is cut out at an anchor (--position) or centred on a
focal point (--focal X,Y with coordinates between 0 and 1).

Configuration is read from imgserve.toml in the working directory, or
from --config. Run 'imgserve gen-config' for a documented example.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./imgserve.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print image metadata as JSON
    Info {
        input: PathBuf,
        /// Report every frame of animated input
        #[arg(long)]
        all_pages: bool,
    },
    /// Resize and crop an image
    Crop(CropArgs),
    /// List the enabled output formats
    Formats,
    /// Print a stock imgserve.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct CropArgs {
    input: PathBuf,

    /// Output file; its extension picks the format unless --format is given
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Crop anchor: top-left, top, top-right, left, centre, right, ... (unknown: centre)
    #[arg(long, default_value = "centre", conflicts_with = "focal")]
    position: Position,

    /// Focal point as X,Y in 0..1
    #[arg(long, value_parser = parse_focal)]
    focal: Option<(f32, f32)>,

    /// Output format (jpeg, png, webp, avif, tiff, gif, json)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Encoding quality 1-100 (default from config)
    #[arg(long)]
    quality: Option<u32>,

    /// Keep every frame of animated input
    #[arg(long)]
    all_pages: bool,
}

fn parse_focal(s: &str) -> Result<(f32, f32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f32>()
            .map_err(|e| format!("invalid coordinate '{v}': {e}"))
    };
    Ok((parse(x)?, parse(y)?))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::discover_config(Path::new("."))?,
    };

    match cli.command {
        Command::Info { input, all_pages } => {
            let bytes = std::fs::read(&input)?;
            let request = Request {
                output: Some(OutputFormat::Json),
                all_pages,
                ..Request::default()
            };
            let response = pipeline::run(&bytes, &request, &config)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(response.body())?;
            writeln!(stdout)?;
        }
        Command::Crop(args) => crop(args, &config)?,
        Command::Formats => {
            println!("{}", config.output.enabled.render());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn crop(args: CropArgs, config: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let format = match args.format {
        Some(format) => Some(format),
        None => args
            .output
            .extension()
            .and_then(|e| e.to_str())
            .map(OutputFormat::from_extension)
            .transpose()?,
    };
    let crop = match args.focal {
        Some((x, y)) => Crop::FocalPoint { x, y },
        None => Crop::Position(args.position),
    };
    let request = Request {
        width: args.width,
        height: args.height,
        crop,
        output: format,
        quality: args.quality.map(Quality::new),
        all_pages: args.all_pages,
    };

    let bytes = std::fs::read(&args.input)?;
    let response = pipeline::run(&bytes, &request, config)?;
    std::fs::write(&args.output, response.body())?;
    println!(
        "{} → {} ({}, {} bytes)",
        args.input.display(),
        args.output.display(),
        response.format(),
        response.body().len()
    );
    Ok(())
}
