use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use folio_core::{
    document_key_for_path, AnnotationStore, EventQueue, FileAnnotationStore, ViewerConfig,
};
use folio_render::{PdfiumSource, ViewportController};
use folio_tty::{
    write_status_line, CellGeometry, DrawParams, EventMapper, KittyRenderer, UiEvent,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod app;

use app::{App, LoopAction, Palette};

/// Input poll timeout; also the frame cadence while renders are landing.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Read and annotate PDFs in a kitty-compatible terminal"
)]
struct Args {
    /// Page to open the document on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Viewer configuration file; defaults to config.toml in the platform config directory
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Colour for new highlights
    #[arg(long, default_value = "#ffeb3b")]
    highlight_color: String,

    /// Colour for new underlines
    #[arg(long, default_value = "#e53935")]
    underline_color: String,

    /// PDF file to open
    file: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ViewerConfig::load(&config_path)?;

    let store: Arc<dyn AnnotationStore> = Arc::new(FileAnnotationStore::new(
        project_dirs.data_local_dir().join("annotations"),
    )?);
    let document = document_key_for_path(&args.file);
    let bytes =
        fs::read(&args.file).with_context(|| format!("failed to read {:?}", args.file))?;

    let source = PdfiumSource::new()?;
    let controller = ViewportController::open(&source, bytes, config, EventQueue::new())
        .await
        .with_context(|| format!("failed to open {:?}", args.file))?;
    info!(path = %args.file.display(), %document, "opened document");

    let geometry = CellGeometry::from_window(&terminal::window_size()?);
    let palette = Palette {
        highlight: args.highlight_color.clone(),
        underline: args.underline_color.clone(),
    };
    let mut app = App::new(controller, store, document, geometry, palette)?;
    if let Some(page) = args.page {
        app.goto_page(page);
    }

    let _raw = RawModeGuard::new()?;
    // Keyed by pid so two viewers in one terminal never replace each other's frame.
    let mut renderer = KittyRenderer::new(io::stdout(), std::process::id());
    renderer.clear_all()?;
    let mut mapper = EventMapper::new();

    loop {
        app.tick(Instant::now())?;
        if app.needs_redraw() {
            redraw(&mut renderer, &mut app, mapper.pending_input().as_deref())?;
        }

        if event::poll(FRAME_INTERVAL)? {
            let ui_event = mapper.map_event(event::read()?);
            if let UiEvent::Resize { .. } = ui_event {
                app.resize(CellGeometry::from_window(&terminal::window_size()?));
                renderer.clear_all()?;
            }
            if app.handle(ui_event)? == LoopAction::Quit {
                break;
            }
        }
    }

    renderer.clear_all()?;
    Ok(())
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    app: &mut App,
    pending_input: Option<&str>,
) -> Result<()> {
    let geometry = app.geometry();
    let image = app.render();

    renderer.begin_sync_update()?;
    {
        let writer = renderer.writer();
        crossterm::execute!(writer, cursor::MoveTo(0, 0))?;
    }
    renderer.draw(
        &image,
        DrawParams::clamped(u32::from(geometry.columns), u32::from(geometry.image_rows())),
    )?;

    let mut status = app.status();
    if let Some(pending) = pending_input.filter(|pending| !pending.is_empty()) {
        status.push_str(" | ");
        status.push_str(pending);
    }
    draw_status_line(renderer, geometry, &status)?;
    renderer.end_sync_update()?;
    Ok(())
}

fn draw_status_line(
    renderer: &mut KittyRenderer<io::Stdout>,
    geometry: CellGeometry,
    status: &str,
) -> Result<()> {
    let writer = renderer.writer();
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, geometry.rows.saturating_sub(1)),
        Clear(ClearType::CurrentLine)
    )?;
    let visible: String = status.chars().take(usize::from(geometry.columns)).collect();
    write_status_line(writer, &visible)?;
    Ok(())
}

/// File-only subscriber: console output would corrupt the raw-mode screen.
fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
