use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use refview_core::{
    NavigationIntent, ReferenceIndex, RenderOutcome, Viewer, ViewerConfig, ViewerEvent, Viewport,
};
use refview_net::{BackendClient, BackendConfig};
use refview_render::PdfiumLibrary;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "refview",
    version,
    about = "render a page referenced by an assistant reply to a PNG"
)]
struct Args {
    /// Assistant reply JSON carrying the page references
    #[arg(long)]
    reply: PathBuf,

    /// Referenced document to open; defaults to the first one in the reply
    #[arg(long)]
    document: Option<String>,

    /// Page to open; defaults to the first referenced page of the document
    #[arg(short, long)]
    page: Option<u32>,

    /// Backend base URL; defaults to $REFVIEW_BACKEND_URL
    #[arg(long)]
    backend: Option<String>,

    /// Initial zoom level
    #[arg(long, default_value_t = refview_core::DEFAULT_ZOOM)]
    zoom: f32,

    /// Logical viewport as WIDTHxHEIGHT
    #[arg(long, default_value = "800x1000")]
    viewport: String,

    /// Device pixel ratio for the painted surface
    #[arg(long, default_value_t = 1.0)]
    dpr: f32,

    /// Output PNG path
    #[arg(short, long, default_value = "page.png")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("dev", "refview", "refview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let backend_config = match &args.backend {
        Some(base_url) => BackendConfig::new(base_url.clone()),
        None => BackendConfig::from_env(),
    };
    let client = Arc::new(BackendClient::new(backend_config)?);

    // Purge leftover server-side render artifacts from earlier sessions;
    // the preview works fine without it.
    if let Err(err) = client.cleanup_artifacts().await {
        warn!(error = %err, "startup cleanup of render artifacts failed");
    }

    let reply = fs::read_to_string(&args.reply)
        .with_context(|| format!("failed to read reply file {:?}", args.reply))?;
    let index = ReferenceIndex::from_reply(&reply)?;
    let intent = select_intent(&index, args.document.as_deref(), args.page)
        .ok_or_else(|| anyhow!("the reply references no matching page"))?;

    let config = ViewerConfig {
        viewport: parse_viewport(&args.viewport)?,
        device_pixel_ratio: args.dpr,
        ..ViewerConfig::default()
    };
    let viewer = Viewer::new(client, Arc::new(PdfiumLibrary::new()), config);
    viewer.coordinator().set_zoom(args.zoom);

    let document_name = intent.document_name.clone();
    let outcome = viewer
        .navigate(intent)
        .await
        .with_context(|| format!("failed to open {document_name:?}"))?;

    for event in viewer.take_events() {
        if let ViewerEvent::PageChanged { page_number } = event {
            debug!(page_number, "page changed");
        }
    }

    match outcome {
        RenderOutcome::Painted { page_number, scale } => {
            let snapshot = viewer
                .coordinator()
                .snapshot()
                .ok_or_else(|| anyhow!("no painted surface to export"))?;
            let image = image::RgbaImage::from_raw(
                snapshot.image.width,
                snapshot.image.height,
                snapshot.image.pixels,
            )
            .ok_or_else(|| anyhow!("painted surface buffer has inconsistent dimensions"))?;
            image
                .save(&args.out)
                .with_context(|| format!("failed to write {:?}", args.out))?;

            let page_count = viewer.page_count().unwrap_or(page_number);
            println!(
                "{} — page {}/{} at {:.0}% — wrote {}",
                document_name,
                page_number,
                page_count,
                scale * 100.0,
                args.out.display()
            );
        }
        other => bail!("page was not painted: {other:?}"),
    }

    viewer.close();
    Ok(())
}

/// Pick the intent matching the requested document and page, falling back to
/// the first referenced page.
fn select_intent(
    index: &ReferenceIndex,
    document: Option<&str>,
    page: Option<u32>,
) -> Option<NavigationIntent> {
    let reference = match document {
        Some(name) => index
            .references()
            .iter()
            .find(|r| r.document_name == name)?,
        None => index.references().iter().find(|r| !r.pages.is_empty())?,
    };

    match page {
        Some(page_number) => {
            let highlights = reference
                .pages
                .iter()
                .find(|p| p.page_number == page_number)
                .map(|p| p.highlights.clone())
                .unwrap_or_default();
            Some(NavigationIntent {
                document_name: reference.document_name.clone(),
                page_number,
                highlights,
            })
        }
        None => reference.pages.first().map(|entry| NavigationIntent {
            document_name: reference.document_name.clone(),
            page_number: entry.page_number,
            highlights: entry.highlights.clone(),
        }),
    }
}

fn parse_viewport(raw: &str) -> Result<Viewport> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("viewport must look like 800x1000, got {raw:?}"))?;
    let width: f32 = width.trim().parse().context("invalid viewport width")?;
    let height: f32 = height.trim().parse().context("invalid viewport height")?;
    if width <= 0.0 || height <= 0.0 {
        bail!("viewport dimensions must be positive");
    }
    Ok(Viewport::new(width, height))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "refview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
