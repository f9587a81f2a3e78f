//! `wsi-inspect` — a thin CLI over the `wsi-reader` library (SPEC_FULL.md
//! §10.4). Not a spec-normative component; exists only as a separately
//! buildable example of library usage, with no server/HTTP/auth surface.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_reader::config::{Cli, Command, ShowArgs, ThumbnailArgs};
use wsi_reader::Slide;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Show(args) => show(args),
        Command::Thumbnail(args) => thumbnail(args),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn show(args: ShowArgs) -> ExitCode {
    let slide = Slide::open(&args.path);
    if let Some(err) = slide.get_error() {
        error!(path = %args.path, error = %err, "failed to open slide");
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    println!("vendor: {}", slide.vendor().unwrap_or("unknown"));
    println!("level-count: {}", slide.level_count());
    for level in 0..slide.level_count() {
        let (w, h) = slide.level_dimensions(level).unwrap_or((0, 0));
        let downsample = slide.level_downsample(level).unwrap_or(0.0);
        println!("level[{level}]: {w}x{h} downsample={downsample}");
    }

    let names = slide.associated_image_names();
    if !names.is_empty() {
        println!("associated images: {}", names.join(", "));
    }

    println!("properties:");
    for name in slide.property_names() {
        if !args.all_properties && !name.starts_with("openslide.") {
            continue;
        }
        if let Some(value) = slide.property_value(&name) {
            println!("  {name} = {value}");
        }
    }

    ExitCode::SUCCESS
}

fn thumbnail(args: ThumbnailArgs) -> ExitCode {
    let slide = Slide::open(&args.path);
    if let Some(err) = slide.get_error() {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let Some((width, height)) = slide.associated_image_dimensions(&args.name) else {
        eprintln!("error: no associated image named '{}'", args.name);
        return ExitCode::FAILURE;
    };

    let mut pixels = vec![0u32; width as usize * height as usize];
    if let Err(err) = slide.read_associated_image(&args.name, &mut pixels) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let mut rgb = Vec::with_capacity(pixels.len() * 3);
    for &p in &pixels {
        let bytes = p.to_le_bytes(); // [B, G, R, A]
        rgb.push(bytes[2]);
        rgb.push(bytes[1]);
        rgb.push(bytes[0]);
    }

    if let Err(err) = image::save_buffer(&args.output, &rgb, width, height, image::ColorType::Rgb8) {
        eprintln!("error: failed to write PNG: {err}");
        return ExitCode::FAILURE;
    }

    println!("wrote {}x{} '{}' to {}", width, height, args.name, args.output);
    ExitCode::SUCCESS
}
