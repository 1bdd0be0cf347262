// ============================================================================
// ComposeFE CLI: headless rendering and batch raster edits
// ============================================================================
//
// Usage examples:
//   composefe -i poster.cfd -o poster.png              (flatten a document)
//   composefe -i poster.cfd -o thumb.jpg --scale 0.25
//   composefe -i "shots/*.jpg" --adjust contrast=20 --adjust grain=5 --output-dir out/
//   composefe -i photo.png --rotate 1 --blur 2 -o rotated.webp
//
// Every file is processed on the calling thread; compositing and filters
// still use the rayon pool internally.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::RgbaImage;

use crate::components::image_editor::ImageEditor;
use crate::io::{EditorError, SaveFormat, encode_and_write};
use crate::ops::adjustments::Adjustments;
use crate::ops::transform::{self, Interpolation};
use crate::project::DocumentSession;
use crate::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// ComposeFE headless renderer.
#[derive(Parser, Debug)]
#[command(
    name = "composefe",
    about = "ComposeFE headless document renderer and batch image processor",
    long_about = "Flatten .cfd documents to raster images, or run the image editor's\n\
                  filter pipeline over PNG, JPEG, WEBP, BMP and TGA files.\n\n\
                  Example:\n  \
                  composefe -i poster.cfd -o poster.png\n  \
                  composefe -i *.jpg --adjust contrast=20 --output-dir out/"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "docs/*.cfd").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, webp, bmp, tga. Inferred from --output when omitted.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100).
    #[arg(short, long, default_value_t = 90, value_name = "1-100")]
    pub quality: u8,

    /// Render scale applied to the final image.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f32,

    /// Raster inputs only: filter parameter, repeatable (e.g. contrast=20, band.red.hue=-10).
    #[arg(short, long = "adjust", value_name = "KEY=VALUE")]
    pub adjust: Vec<String>,

    /// Raster inputs only: gaussian blur sigma in pixels.
    #[arg(long, default_value_t = 0.0)]
    pub blur: f32,

    /// Raster inputs only: clockwise quarter turns.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub rotate: i32,

    /// Raster inputs only: mirror left-right.
    #[arg(long)]
    pub flip_h: bool,

    /// Raster inputs only: mirror top-bottom.
    #[arg(long)]
    pub flip_v: bool,

    /// Echo log lines to stderr and print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    if args.verbose {
        crate::logger::set_mirror_stderr(true);
        crate::logger::set_min_level(crate::logger::Level::Debug);
    }

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if !(args.scale > 0.0) || !args.scale.is_finite() {
        eprintln!("error: --scale must be a positive number.");
        return ExitCode::FAILURE;
    }

    let mut adjustments = Adjustments::default();
    for pair in &args.adjust {
        if let Err(e) = adjustments.set_pair(pair) {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let save_format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.output_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let settings = EditorSettings::load();
    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref(), save_format)
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        let result = render_one(input_path, &args, &adjustments, &settings)
            .and_then(|img| encode_and_write(&img, &output_path, save_format, args.quality));
        match result {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                crate::log_err!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file pipeline
// ============================================================================

fn is_document(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("cfd"))
}

fn render_one(
    input: &Path,
    args: &CliArgs,
    adjustments: &Adjustments,
    settings: &EditorSettings,
) -> Result<RgbaImage, EditorError> {
    if is_document(input) {
        let session = DocumentSession::open(input, settings.clone())?;
        return Ok(session.flatten(args.scale));
    }

    let bytes = std::fs::read(input)?;
    let mut editor = ImageEditor::from_bytes(&bytes, settings)?;
    editor.rotate(args.rotate);
    editor.flip(args.flip_h, args.flip_v);
    editor.set_adjustments(adjustments.clone(), true);
    editor.set_blur(args.blur, true);
    let img = editor.render_export();

    if args.scale == 1.0 {
        return Ok(img);
    }
    let w = ((img.width() as f32 * args.scale).round() as u32).max(1);
    let h = ((img.height() as f32 * args.scale).round() as u32).max(1);
    Ok(transform::resize(&img, w, h, Interpolation::Lanczos3))
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);
        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => eprintln!("warning: invalid glob '{}': {}", pattern, e),
        }
    }

    result
}

/// `--format` wins, then the output extension, then PNG.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<SaveFormat, EditorError> {
    if let Some(f) = format_arg {
        return SaveFormat::from_path(Path::new(&format!("x.{}", f)))
            .ok_or_else(|| EditorError::InvalidFormat(format!("unsupported output format '{}'", f)));
    }
    Ok(output.and_then(SaveFormat::from_path).unwrap_or_default())
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output`
/// 2. `--output-dir` joined with the input stem
/// 3. Next to the input, with `_out` appended if that would overwrite it
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>, format: SaveFormat) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));
    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}
