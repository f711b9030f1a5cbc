use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};

use qrdoc::export::ProgressHost;
use qrdoc::notification::{Notification, NotificationLevel};
use qrdoc::panic_handler;
use qrdoc::{
    CancelToken, DocumentSource, PageSource, PixelPoint, PointerEvent, Session, Settings,
    ThumbnailEvent, ThumbnailPlan, ViewCommand,
};

#[derive(Parser)]
#[command(name = "qrdoc")]
#[command(version, about = "Stamp a per-page QR code into every page of a PDF", long_about = None)]
#[command(after_help = "EXAMPLES:
    qrdoc info doc.pdf
    qrdoc thumbnails doc.pdf --out-dir thumbs
    qrdoc stamp doc.pdf --links links.txt --output out.pdf --select 40,40,140,140")]
struct Cli {
    /// Write the log to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show page count and page sizes
    Info {
        #[arg(value_name = "PDF")]
        input: PathBuf,
    },

    /// Render one thumbnail per page as PNG files
    Thumbnails {
        #[arg(value_name = "PDF")]
        input: PathBuf,

        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,

        /// Thumbnail height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Don't ask before thumbnailing large documents
        #[arg(short, long)]
        yes: bool,
    },

    /// Stamp one QR code per page into the selected region
    Stamp {
        #[arg(value_name = "PDF")]
        input: PathBuf,

        /// Text file with one link per line
        #[arg(long, value_name = "FILE")]
        links: PathBuf,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Rectangle drawn on the preview, in preview pixels
        #[arg(long, value_name = "X1,Y1,X2,Y2", value_parser = parse_selection)]
        select: [i32; 4],

        /// Page the rectangle was drawn on (0-based)
        #[arg(long, default_value_t = 0)]
        page: usize,

        /// Preview zoom the rectangle was drawn at
        #[arg(long)]
        zoom: Option<f32>,

        /// Accept a link/page count mismatch without asking
        #[arg(short, long)]
        yes: bool,
    },
}

fn parse_selection(value: &str) -> Result<[i32; 4], String> {
    let parts: Vec<i32> = value
        .split(',')
        .map(|part| part.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("expected four integers: {e}"))?;
    <[i32; 4]>::try_from(parts).map_err(|_| "expected exactly four integers".to_string())
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    match &cli.log_file {
        Some(path) => WriteLogger::init(
            LevelFilter::Debug.max(level),
            Config::default(),
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )?,
        None => TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        )?,
    }
    Ok(())
}

fn ask(question: &str) -> bool {
    eprint!("{question} [y/N] ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn report(notification: &Notification) {
    match notification.level {
        NotificationLevel::Info | NotificationLevel::Cancelled => {
            eprintln!("{}", notification.message);
        }
        NotificationLevel::Error => eprintln!("error: {}", notification.message),
    }
}

fn show_info(input: &Path, settings: Settings) -> Result<()> {
    let session = Session::open(DocumentSource::path(input), settings)?;
    let pages = session.pages();

    println!("File: {}", input.display());
    println!("Pages: {}", session.page_count());
    for index in 0..session.page_count() {
        let rect = PageSource::page_rect(pages, index)?;
        println!("  {index:>4}: {:.1} x {:.1}", rect.width, rect.height);
    }
    Ok(())
}

fn thumbnails(
    input: &Path,
    out_dir: &Path,
    height: Option<u32>,
    yes: bool,
    mut settings: Settings,
) -> Result<()> {
    if let Some(height) = height {
        settings.thumbnail_height = height.max(1);
    }
    let session = Session::open(DocumentSource::path(input), settings)?;

    if let ThumbnailPlan::AskToSkip { pages } = session.thumbnail_plan() {
        let question = format!("The document has {pages} pages. Generate thumbnails anyway?");
        if !yes && !ask(&question) {
            report(&Notification::cancelled("Thumbnail generation skipped"));
            return Ok(());
        }
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;

    let pipeline = session.start_thumbnails()?;
    let mut written = 0;
    while let Some(event) = pipeline.recv() {
        match event {
            ThumbnailEvent::Produced { page, bitmap } => {
                let path = out_dir.join(format!("page-{page:04}.png"));
                if let Err(e) = bitmap.save(&path) {
                    pipeline.cancel();
                    bail!("cannot write {}: {e}", path.display());
                }
                written += 1;
            }
            ThumbnailEvent::Progress { completed, total } => {
                eprint!("\rThumbnails: {completed}/{total}");
            }
            ThumbnailEvent::Finished => break,
        }
    }
    eprintln!();
    report(&Notification::info(format!(
        "Wrote {written} thumbnails to {}",
        out_dir.display()
    )));
    Ok(())
}

struct StampArgs {
    input: PathBuf,
    links: PathBuf,
    output: PathBuf,
    select: [i32; 4],
    page: usize,
    zoom: Option<f32>,
    yes: bool,
}

fn stamp(args: StampArgs, settings: Settings) -> Result<bool> {
    let text = fs::read_to_string(&args.links)
        .with_context(|| format!("cannot read {}", args.links.display()))?;

    let mut session = Session::open(DocumentSource::path(&args.input), settings)?;
    let _ = session.apply_view(ViewCommand::GoToPage(args.page));
    if let Some(zoom) = args.zoom {
        let _ = session.apply_view(ViewCommand::SetZoom(zoom));
    }
    let preview = session.layout_preview()?;
    info!(
        "Replaying selection on page {} ({}x{} px)",
        session.current_page(),
        preview.width,
        preview.height
    );

    let yes = args.yes;
    let created = session.bulk_create(&text, |links, pages| {
        yes || ask(&format!(
            "{links} links for {pages} pages. Only the first {} pages will be stamped. Continue?",
            links.min(pages)
        ))
    });
    if let Err(e) = created {
        let notification = Notification::from_error(&e);
        report(&notification);
        return Ok(notification.level != NotificationLevel::Error);
    }

    let [x1, y1, x2, y2] = args.select;
    for event in [
        PointerEvent::Press(PixelPoint::new(x1, y1)),
        PointerEvent::Move(PixelPoint::new(x2, y2)),
        PointerEvent::Release(PixelPoint::new(x2, y2)),
    ] {
        let _ = session.pointer(event);
    }
    if !session.is_export_ready() {
        bail!("selection {x1},{y1},{x2},{y2} is too small or outside the page");
    }

    let mut host = ProgressHost::new(CancelToken::new(), |completed, total| {
        eprint!("\rStamping: {completed}/{total}");
    });
    let result = session
        .export(&args.output, &mut host)
        .map(|(outcome, _)| outcome);
    eprintln!();

    let notification = Notification::from_export(&result);
    report(&notification);
    Ok(notification.level != NotificationLevel::Error)
}

fn run(cli: Cli) -> Result<bool> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };

    match cli.command {
        Command::Info { input } => show_info(&input, settings).map(|()| true),
        Command::Thumbnails {
            input,
            out_dir,
            height,
            yes,
        } => thumbnails(&input, &out_dir, height, yes, settings).map(|()| true),
        Command::Stamp {
            input,
            links,
            output,
            select,
            page,
            zoom,
            yes,
        } => stamp(
            StampArgs {
                input,
                links,
                output,
                select,
                page,
                zoom,
                yes,
            },
            settings,
        ),
    }
}

fn main() -> ExitCode {
    panic_handler::initialize_panic_handler();
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("warning: logging disabled: {e}");
    }
    info!("Starting qrdoc");

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:?}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
