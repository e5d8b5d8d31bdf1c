//! RoomBundle CLI - compile a room description into a published bundle
//!
//! Logs go to stderr; `--json` prints the manifest (or the error) to stdout.
//! Exit codes: 0 ok, 2 bad input, 3 asset resolution, 70 internal, 1 other.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use roombundle_core::{
    BundleOptions, BundlePipeline, ChromiumScreenshotter, ClampMode, NoopScreenshotter,
    NormalizePolicy, PipelineError, Screenshotter, SideEffect,
};

#[derive(Parser)]
#[command(name = "roombundle")]
#[command(author, version, about = "RoomBundle - Room Bundling Compiler", long_about = None)]
struct Cli {
    /// Room description (JSON)
    input: PathBuf,

    /// Output slug (defaults to the input file name)
    #[arg(long)]
    slug: Option<String>,

    /// Output directory
    #[arg(short, long, default_value = "dist/rooms")]
    out_dir: PathBuf,

    /// Root that local asset paths resolve against
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,

    /// Prefix for published asset URLs
    #[arg(long, default_value = "")]
    url_base: String,

    /// Clamp positions into the room
    #[arg(long, value_enum, default_value = "none")]
    clamp: ClampArg,

    /// Snap positions to multiples of this step (0 disables)
    #[arg(long, default_value = "0")]
    grid: f64,

    /// Run everything, write nothing
    #[arg(long)]
    dry_run: bool,

    /// Copy referenced assets into the bundle and rewrite references
    #[arg(long)]
    bundle_assets: bool,

    /// Upsert this bundle into <out-dir>/index.json
    #[arg(long)]
    update_index: bool,

    /// Capture <out-dir>/<slug>/preview.png from this URL
    #[arg(long)]
    preview_url: Option<String>,

    /// Headless Chromium binary used for previews
    #[arg(long, default_value = "chromium")]
    chromium: PathBuf,

    /// Print the manifest as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClampArg {
    None,
    Soft,
    Hard,
}

impl From<ClampArg> for ClampMode {
    fn from(arg: ClampArg) -> Self {
        match arg {
            ClampArg::None => ClampMode::None,
            ClampArg::Soft => ClampMode::Soft,
            ClampArg::Hard => ClampMode::Hard,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialise logging: {e}");
    }

    let policy = match NormalizePolicy::new(cli.clamp.into(), cli.grid) {
        Ok(p) => p,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    let options = BundleOptions {
        slug: cli.slug,
        out_dir: cli.out_dir,
        public_dir: cli.public_dir,
        url_base: cli.url_base,
        normalize: policy,
        dry_run: cli.dry_run,
        bundle_assets: cli.bundle_assets,
        update_index: cli.update_index,
        preview_url: cli.preview_url,
    };

    let screenshotter: Box<dyn Screenshotter> = if options.preview_url.is_some() {
        Box::new(ChromiumScreenshotter::new(cli.chromium))
    } else {
        Box::new(NoopScreenshotter)
    };
    let pipeline = BundlePipeline::new(screenshotter);

    match pipeline.bundle_file(&cli.input, &options) {
        Ok(report) => {
            let manifest = &report.manifest;
            if cli.json {
                match serde_json::to_string_pretty(manifest) {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        error!("failed to render manifest: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                let verb = if report.publish.written { "wrote" } else { "would write" };
                println!("{verb} {}", report.publish.final_path.display());
                println!("{verb} {}", report.publish.manifest_path.display());
                println!(
                    "{} devices, {} decor, {} assets ({} copied), {} warnings",
                    manifest.counts.devices,
                    manifest.counts.decor,
                    manifest.assets.len(),
                    report.rewrite.copied,
                    manifest.warnings.len()
                );
                for w in &manifest.warnings {
                    println!("  warning [{}] {}", w.rule, w.message);
                }
                for (label, outcome) in [("preview", &report.publish.preview), ("index", &report.publish.index)] {
                    if let SideEffect::Failed(reason) = outcome {
                        println!("  {label} skipped: {reason}");
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_error(&e, cli.json);
            ExitCode::from(e.exit_code())
        }
    }
}

fn report_error(e: &PipelineError, json: bool) {
    match e {
        PipelineError::Invariant { .. } => error!("pipeline bug: {e}"),
        _ => error!("{e}"),
    }
    if json {
        let mut output = serde_json::json!({
            "success": false,
            "error": e.to_string(),
        });
        if let PipelineError::Schema(schema) | PipelineError::Invariant { source: schema, .. } = e {
            output["issues"] = serde_json::json!(schema.issues);
        }
        println!("{output}");
    }
}
