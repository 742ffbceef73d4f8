// ============================================================================
// DepthPaint CLI - headless project export via command-line arguments
// ============================================================================
//
// Usage examples:
//   DepthPaint -i scene.json                          (writes scene.gltf next to it)
//   DepthPaint -i scene.json --gltf out.gltf --png active.png
//   DepthPaint -i "projects/*.json" --gltf --png --output-dir out/
//   DepthPaint -i scene.json --info --fit 2048x2048 --ppu 2048
//
// No window is opened. Each project is loaded, optionally summarised and
// exported synchronously.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::components::layers::LayerCompositor;
use crate::io;
use crate::ops::export::{DEFAULT_HALO_RADIUS, DEFAULT_PIXELS_PER_UNIT, ExportOptions};
use crate::ops::transform::Interpolation;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// DepthPaint headless exporter.
#[derive(Parser, Debug)]
#[command(
    name = "DepthPaint",
    version,
    about = "DepthPaint headless project exporter",
    long_about = "Load DepthPaint project files and export them as a flattened glTF\n\
                  scene (one textured quad per canvas, placed by depth) and/or a PNG\n\
                  of the active canvas, without opening the editor.\n\n\
                  Example:\n  \
                  DepthPaint -i scene.json --gltf out.gltf\n  \
                  DepthPaint -i \"*.json\" --gltf --png --output-dir out/"
)]
pub struct CliArgs {
    /// Project file(s). Glob patterns accepted (e.g. "*.json", "scenes/*.json").
    #[arg(short, long, num_args = 1..)]
    pub input: Vec<String>,

    /// Write a .gltf scene. Without a value the name is derived from the input.
    /// This is the default output when neither --gltf nor --png is given.
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub gltf: Option<Option<PathBuf>>,

    /// Write a PNG of each project's active canvas. Without a value the name
    /// is derived from the input.
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub png: Option<Option<PathBuf>>,

    /// Output directory for derived file names.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Canvas pixels per scene unit.
    #[arg(long, default_value_t = DEFAULT_PIXELS_PER_UNIT, value_name = "N")]
    pub ppu: f32,

    /// Background halo radius in pixels.
    #[arg(long, default_value_t = DEFAULT_HALO_RADIUS, value_name = "N")]
    pub halo: f32,

    /// Normalise all layers to WxH using their combined painted bounds.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub fit: Option<(u32, u32)>,

    /// Resampling filter for --fit: nearest, bilinear, bicubic, lanczos3.
    #[arg(long, default_value = "bilinear", value_name = "FILTER", value_parser = parse_interpolation)]
    pub interpolation: Interpolation,

    /// Divide depth translation by --ppu as well.
    #[arg(long)]
    pub scale_depth: bool,

    /// Print a layer summary for each project.
    #[arg(long)]
    pub info: bool,

    /// Write the session log file instead of logging to stderr.
    #[arg(long)]
    pub log_file: bool,

    /// Print per-file timing and debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    fn export_options(&self) -> ExportOptions {
        ExportOptions::default()
            .pixels_per_unit(self.ppu)
            .halo_radius(self.halo)
            .fit_to(self.fit)
            .interpolation(self.interpolation)
            .scale_depth(self.scale_depth)
    }

    /// `--gltf` is implied unless another output or `--info` was asked for.
    fn wants_gltf(&self) -> bool {
        self.gltf.is_some() || (self.png.is_none() && !self.info)
    }
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{}'", s))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("invalid width in '{}'", s))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("invalid height in '{}'", s))?;
    if w == 0 || h == 0 {
        return Err(format!("size must be non-zero, got '{}'", s));
    }
    Ok((w, h))
}

fn parse_interpolation(s: &str) -> Result<Interpolation, String> {
    Interpolation::from_name(s).ok_or_else(|| format!("unknown interpolation '{}'", s))
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    let explicit = matches!(args.gltf, Some(Some(_))) || matches!(args.png, Some(Some(_)));
    if inputs.len() > 1 && explicit {
        eprintln!(
            "error: {} input files given but --gltf/--png FILE only accept a single input.\n\
             Omit the file name and use --output-dir for batch export.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let opts = args.export_options();
    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        match run_one(input_path, &args, &opts) {
            Ok(written) => {
                if args.verbose || multi {
                    for path in &written {
                        println!("  → {}", path.display());
                    }
                    if args.verbose {
                        println!("  ({:.0}ms)", file_start.elapsed().as_secs_f64() * 1000.0);
                    }
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

/// Load one project and write the requested outputs. Returns the paths written.
fn run_one(input: &Path, args: &CliArgs, opts: &ExportOptions) -> Result<Vec<PathBuf>, String> {
    let (canvases, active) = io::load_project(input).map_err(|e| format!("load failed: {}", e))?;
    let mut compositor = LayerCompositor::new();
    compositor.replace_all(canvases, active);

    if args.info {
        print_summary(input, &compositor);
    }

    let mut written = Vec::new();

    if args.wants_gltf() {
        let explicit = args.gltf.clone().flatten();
        let path = explicit
            .or_else(|| build_output_path(input, args.output_dir.as_deref(), "gltf"))
            .ok_or_else(|| format!("cannot determine .gltf output path for '{}'", input.display()))?;
        let doc = compositor
            .export_document(opts)
            .map_err(|e| format!("export failed: {}", e))?;
        io::write_document(&doc, &path).map_err(|e| format!("write failed: {}", e))?;
        written.push(path);
    }

    if let Some(png) = &args.png {
        let path = png
            .clone()
            .or_else(|| build_output_path(input, args.output_dir.as_deref(), "png"))
            .ok_or_else(|| format!("cannot determine .png output path for '{}'", input.display()))?;
        let canvas = compositor
            .active()
            .ok_or_else(|| "project has no active canvas".to_string())?;
        io::write_png(canvas.pixels().as_image(), &path).map_err(|e| format!("write failed: {}", e))?;
        written.push(path);
    }

    Ok(written)
}

fn print_summary(input: &Path, compositor: &LayerCompositor) {
    println!("{}: {} canvas(es)", input.display(), compositor.len());
    let active = compositor.active_index();
    for (i, (descriptor, canvas)) in compositor
        .descriptors()
        .iter()
        .zip(compositor.canvases())
        .enumerate()
    {
        let (w, h) = canvas.resolution();
        println!(
            "  {} {:>2}  {:<24} depth {:>8.3}  {}x{}  {} edit(s)",
            if Some(i) == active { "*" } else { " " },
            i,
            descriptor.display_name,
            descriptor.depth,
            w,
            h,
            canvas.edit_log().len()
        );
    }
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
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Derive an output path from the input stem: inside `output_dir` when
/// given, otherwise next to the input (with `_out` appended on collision).
fn build_output_path(input: &Path, output_dir: Option<&Path>, ext: &str) -> Option<PathBuf> {
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
