use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mermaid_preview::channel::{PanelViewState, webview_channel};
use mermaid_preview::config::ConfigError;
use mermaid_preview::controller::{CaptureReport, ProgressFlag};
use mermaid_preview::output::FileImageSink;
use mermaid_preview::selector::FsConfigSource;
use mermaid_preview::surface::{CommandEngine, MemoryClipboard, SurfaceScript};
use mermaid_preview::{
    CaptureTarget, ImageType, MermaidDocument, PreviewController, PreviewError, PreviewSettings,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum CliError {
    Usage(&'static str),
    Io(std::io::Error),
    Config(ConfigError),
    Preview(PreviewError),
    Capture(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Config(err) => write!(f, "{err}"),
            CliError::Preview(err) => write!(f, "{err}"),
            CliError::Capture(msg) => write!(f, "capture failed: {msg}"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<PreviewError> for CliError {
    fn from(value: PreviewError) -> Self {
        Self::Preview(value)
    }
}

#[derive(Debug, Default)]
struct Args {
    input: Option<String>,
    format: Option<ImageType>,
    scale: Option<f64>,
    quality: Option<f64>,
    target: Option<CaptureTarget>,
    background: Option<String>,
    config: Option<String>,
    settings: Option<String>,
    renderer: Option<String>,
    timeout_ms: Option<u64>,
    out: Option<String>,
}

fn usage() -> &'static str {
    "mermaid-preview\n\
\n\
USAGE:\n\
  mermaid-preview [capture] [--format svg|png|jpg|webp] [--scale <n>] [--quality <0..1>] [--target file|clipboard] [--background <css-color>] [--config <mermaid-config.json>] [--settings <settings.json>] [--renderer <command line>] [--timeout-ms <ms>] [--out <path>] [<path>|-]\n\
\n\
NOTES:\n\
  - If <path> is omitted or '-', input is read from stdin.\n\
  - The renderer reads diagram text on stdin and writes SVG to stdout (default: mmdc).\n\
  - Without --out the image goes next to the input file (or ./out.<ext> for stdin), unless\n\
    the settings file sets generate.useCurrentPath=false (then generate.outputPath is used).\n\
  - --target clipboard copies a PNG to an in-memory clipboard; --out then receives its bytes.\n\
  - Document directives (%% @backgroundColor{..}, %% @config{..}, %% @outputScale{..}) apply.\n\
  - RUST_LOG controls diagnostics on stderr (default: warn).\n\
"
}

fn next_value<'a>(it: &mut impl Iterator<Item = &'a String>) -> Result<&'a String, CliError> {
    it.next().ok_or(CliError::Usage(usage()))
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Result<T, CliError> {
    raw.trim().parse::<T>().map_err(|_| CliError::Usage(usage()))
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();

    let mut it = argv.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "capture" => {}
            "--format" => {
                let fmt = next_value(&mut it)?;
                args.format = Some(
                    fmt.parse::<ImageType>()
                        .map_err(|_| CliError::Usage(usage()))?,
                );
            }
            "--scale" => {
                let scale = parse_number::<f64>(next_value(&mut it)?)?;
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(CliError::Usage(usage()));
                }
                args.scale = Some(scale);
            }
            "--quality" => {
                let quality = parse_number::<f64>(next_value(&mut it)?)?;
                if !(0.0..=1.0).contains(&quality) {
                    return Err(CliError::Usage(usage()));
                }
                args.quality = Some(quality);
            }
            "--target" => {
                let target = next_value(&mut it)?;
                args.target = Some(
                    target
                        .parse::<CaptureTarget>()
                        .map_err(|_| CliError::Usage(usage()))?,
                );
            }
            "--background" => {
                let bg = next_value(&mut it)?;
                if !bg.trim().is_empty() {
                    args.background = Some(bg.trim().to_string());
                }
            }
            "--config" => args.config = Some(next_value(&mut it)?.clone()),
            "--settings" => args.settings = Some(next_value(&mut it)?.clone()),
            "--renderer" => args.renderer = Some(next_value(&mut it)?.clone()),
            "--timeout-ms" => args.timeout_ms = Some(parse_number::<u64>(next_value(&mut it)?)?),
            "--out" => args.out = Some(next_value(&mut it)?.clone()),
            "--" => {
                if let Some(rest) = it.next() {
                    if args.input.is_some() {
                        return Err(CliError::Usage(usage()));
                    }
                    args.input = Some(rest.clone());
                }
                if it.next().is_some() {
                    return Err(CliError::Usage(usage()));
                }
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(CliError::Usage(usage()));
            }
            path => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    Ok(args)
}

fn read_input(input: Option<&str>) -> Result<String, CliError> {
    match input {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

/// `(file_name, current_dir)` of the document; stdin input is named `out` in the working
/// directory.
fn document_location(input: Option<&str>) -> Result<(String, String), CliError> {
    match input {
        Some(path) if path != "-" => {
            let path = std::path::absolute(Path::new(path))?;
            let file_name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "out".to_string());
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok((file_name, dir.to_string_lossy().into_owned()))
        }
        _ => Ok((
            "out".to_string(),
            std::env::current_dir()?.to_string_lossy().into_owned(),
        )),
    }
}

async fn build_settings(args: &Args) -> Result<PreviewSettings, CliError> {
    let mut settings = match &args.settings {
        Some(path) => PreviewSettings::load(Path::new(path)).await?,
        None => PreviewSettings::default(),
    };
    if let Some(format) = args.format {
        settings.generate.image_type = format;
    }
    if let Some(scale) = args.scale {
        settings.generate.scale = scale;
    }
    if let Some(quality) = args.quality {
        settings.generate.quality = quality;
    }
    if let Some(target) = args.target {
        settings.generate.target = target;
    }
    if let Some(background) = &args.background {
        settings.preview.background_color = background.clone();
    }
    if let Some(config) = &args.config {
        settings.preview.default_mermaid_config = config.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        settings.capture_timeout_ms = Some(timeout_ms);
    }
    Ok(settings)
}

async fn capture(args: Args) -> Result<(), CliError> {
    let code = read_input(args.input.as_deref())?;
    let settings = build_settings(&args).await?;
    let (file_name, current_dir) = document_location(args.input.as_deref())?;

    let engine = match args.renderer.as_deref() {
        Some(line) => CommandEngine::from_command_line(line).ok_or(CliError::Usage(usage()))?,
        None => CommandEngine::mmdc(),
    };
    let workspace_root = std::env::current_dir()?;
    let sink = match &args.out {
        Some(out) => FileImageSink::to_file(out),
        None => FileImageSink::from_settings(&settings.generate, &workspace_root),
    };

    let ctrl = Arc::new(PreviewController::new(
        settings,
        Arc::new(FsConfigSource::new(workspace_root)),
        Arc::new(sink),
        Arc::new(ProgressFlag::default()),
    ));
    ctrl.change_document(MermaidDocument::from_code(code, file_name, current_dir));

    let (panel, port, inbound) = webview_channel(
        PanelViewState {
            active: true,
            visible: true,
        },
        None,
    );
    let clipboard = MemoryClipboard::default();
    let surface = SurfaceScript::spawn(port, engine, clipboard.clone())?;
    ctrl.show_preview(panel, inbound).await;

    let mut reports = ctrl.on_did_finish_capture();
    let params = ctrl.capture_image()?;
    tracing::info!(image_type = %params.image_type, scale = params.scale, "capturing");
    let report = reports.recv().await;

    let errors = ctrl.flush_errors();
    ctrl.dispose();
    if !matches!(
        tokio::task::spawn_blocking(move || surface.join()).await,
        Ok(Ok(()))
    ) {
        tracing::warn!("surface thread did not shut down cleanly");
    }

    match report {
        Ok(CaptureReport::Saved(path)) => {
            if args.out.is_none() {
                println!("{}", path.display());
            }
            Ok(())
        }
        Ok(CaptureReport::Copied) => {
            let Some((mime, bytes)) = clipboard.last() else {
                return Err(CliError::Capture("clipboard is empty".to_string()));
            };
            match &args.out {
                Some(out) => std::fs::write(out, &bytes)?,
                None => println!("copied {mime} ({} bytes)", bytes.len()),
            }
            Ok(())
        }
        Ok(CaptureReport::Failed(message)) => {
            let detail = errors.last().cloned().unwrap_or(message);
            Err(CliError::Capture(detail))
        }
        Err(_) => Err(CliError::Capture(
            "preview closed without a capture result".to_string(),
        )),
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(capture(args))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    init_tracing();

    match run(args) {
        Ok(()) => {}
        Err(err @ CliError::Capture(_)) => {
            eprintln!("{err}");
            std::process::exit(3);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
