use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tour_anchors::anchor::describe_element;
use tour_anchors::config::store_root;
use tour_anchors::integrity::{archive, validate};
use tour_anchors::pick::{replay, SessionEvent};
use tour_anchors::recovery::recover_anchor;
use tour_anchors::reindex::{marked_elements, ReindexProgress, Reindexer};
use tour_anchors::scheduler::{Pacer, Scheduler, ThreadPacer};
use tour_anchors::spotlight::{SpotlightEngine, SpotlightTarget};
use tour_anchors::store::SearchQuery;
use tour_anchors::thumbnail::{cleanup_duplicate_thumbnails, ScreenshotRenderer, ThumbnailRenderer};
use tour_anchors::tour::{TourController, TourStep};
use tour_anchors::{Anchor, AnchorKind, AnchorStore, FileStore, Page, TourConfig};

#[derive(Parser, Debug)]
#[command(
    name = "tour-anchors",
    version,
    about = "Anchor indexing, recovery, and spotlight positioning for guided product tours"
)]
struct Cli {
    /// Anchor store directory (default: TOUR_ANCHORS_STORE_DIR / .tour-anchors)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Config JSON path (default: TOUR_ANCHORS_CONFIG, else built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Describe page elements the way the indexer sees them
    Inspect(InspectArgs),
    /// Sync the store with the marked elements of a page snapshot
    Reindex(ReindexArgs),
    /// Rank replacement candidates for an anchor whose selector broke
    Recover(AnchorPageArgs),
    /// Check selector, thumbnail, and verification age of an anchor
    Validate(AnchorPageArgs),
    /// Tag an anchor as archived (idempotent)
    Archive(ArchiveArgs),
    /// Search stored anchors
    Search(SearchArgs),
    /// Drop thumbnails of duplicate anchor records
    #[command(name = "cleanup-thumbnails")]
    CleanupThumbnails,
    /// Position the spotlight for one anchor on a page snapshot
    Spotlight(SpotlightArgs),
    /// Drive a tour over a page snapshot with a key sequence
    Tour(TourArgs),
    /// Replay a recorded pick session and print outbound messages
    Pick(PickArgs),
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Page snapshot JSON
    page: PathBuf,
    /// Selector of the element to describe (default: every marked element)
    #[arg(long)]
    selector: Option<String>,
}

#[derive(Args, Debug)]
struct ReindexArgs {
    /// Page snapshot JSON
    page: PathBuf,
    /// Route override (default: snapshot route, else URL path)
    #[arg(long)]
    route: Option<String>,
    /// Print each progress update as a JSON line before the summary
    #[arg(long, action = ArgAction::SetTrue)]
    progress: bool,
    /// Skip the real-time pause between elements
    #[arg(long, action = ArgAction::SetTrue)]
    no_throttle: bool,
    /// Do not capture thumbnails even when the snapshot has a screenshot
    #[arg(long, action = ArgAction::SetTrue)]
    no_thumbnails: bool,
}

#[derive(Args, Debug)]
struct AnchorPageArgs {
    /// Stored anchor id
    anchor_id: String,
    /// Page snapshot JSON
    page: PathBuf,
}

#[derive(Args, Debug)]
struct ArchiveArgs {
    /// Stored anchor id
    anchor_id: String,
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[arg(long)]
    route: Option<String>,
    /// Case-insensitive match on name, anchor id, or selector
    #[arg(long)]
    query: Option<String>,
    /// Anchor kind (button, input, select, table, card, tabs, list, chart, other)
    #[arg(long)]
    kind: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    /// Include archived anchors
    #[arg(long, action = ArgAction::SetTrue)]
    archived: bool,
}

#[derive(Args, Debug)]
struct SpotlightArgs {
    /// Page snapshot JSON
    page: PathBuf,
    #[arg(long)]
    anchor_id: String,
    /// Selector override (default: the stored anchor's selector)
    #[arg(long)]
    selector: Option<String>,
    /// Viewport override, e.g. 1024x768
    #[arg(long)]
    viewport: Option<String>,
}

#[derive(Args, Debug)]
struct TourArgs {
    /// Page snapshot JSON
    page: PathBuf,
    /// JSON array of steps ({anchorId, selector?, title, body?})
    #[arg(long)]
    steps: PathBuf,
    /// Comma-separated key presses, e.g. ArrowRight,ArrowRight,Escape
    #[arg(long, default_value = "")]
    keys: String,
}

#[derive(Args, Debug)]
struct PickArgs {
    /// Page snapshot JSON
    page: PathBuf,
    /// JSON array of session events
    #[arg(long)]
    messages: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = TourConfig::load(cli.config.as_deref()).context("failed to load config")?;
    let store = cli.store.clone();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Inspect(args) => command_inspect(args, &config),
        Commands::Reindex(args) => command_reindex(args, &config, open_store(store.as_deref())?),
        Commands::Recover(args) => command_recover(args, &config, open_store(store.as_deref())?),
        Commands::Validate(args) => command_validate(args, &config, open_store(store.as_deref())?),
        Commands::Archive(args) => command_archive(args, open_store(store.as_deref())?),
        Commands::Search(args) => command_search(args, open_store(store.as_deref())?),
        Commands::CleanupThumbnails => command_cleanup(open_store(store.as_deref())?),
        Commands::Spotlight(args) => command_spotlight(args, &config, open_store(store.as_deref())?),
        Commands::Tour(args) => command_tour(args, &config),
        Commands::Pick(args) => command_pick(args, &config),
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({"name": "inspect", "description": "Describe page elements: metadata, kind, selector, anchor id, name."}),
        json!({"name": "reindex", "description": "Create, refresh, and verify anchors for a route; count orphans."}),
        json!({"name": "recover", "description": "Suggest replacement elements for an anchor whose selector broke."}),
        json!({"name": "validate", "description": "Check an anchor's selector, thumbnail, and verification age."}),
        json!({"name": "archive", "description": "Tag an anchor as archived."}),
        json!({"name": "search", "description": "Search stored anchors by route, text, and kind."}),
        json!({"name": "cleanup-thumbnails", "description": "Keep one thumbnail per anchor id, delete the rest."}),
        json!({"name": "spotlight", "description": "Run spotlight positioning for an anchor on a snapshot."}),
        json!({"name": "tour", "description": "Step through a tour with keyboard input."}),
        json!({"name": "pick", "description": "Replay a cross-frame pick session."}),
    ];
    print_json(&json!({ "commands": rows }))
}

fn command_inspect(args: InspectArgs, config: &TourConfig) -> Result<()> {
    let page = load_page(&args.page)?;
    let doc = &page.document;
    let nodes = match args.selector.as_deref() {
        Some(selector) => {
            let found = doc.query_selector(selector)?;
            match found {
                Some(node) => vec![node],
                None => bail!("no element matches {selector}"),
            }
        }
        None => marked_elements(&page, &config.marker_attribute),
    };
    let candidates: Vec<Value> = nodes
        .into_iter()
        .map(|node| serde_json::to_value(describe_element(doc, node, &page.route, config)))
        .collect::<std::result::Result<_, _>>()?;
    print_json(&json!({
        "url": page.url,
        "route": page.route,
        "count": candidates.len(),
        "elements": candidates,
    }))
}

fn command_reindex(args: ReindexArgs, config: &TourConfig, mut store: FileStore) -> Result<()> {
    let mut page = load_page(&args.page)?;
    if let Some(route) = args.route.filter(|r| !r.trim().is_empty()) {
        page.route = route;
    }

    let renderer = if args.no_thumbnails {
        None
    } else {
        screenshot_renderer(&page, config)
    };
    let mut reindexer = Reindexer::new(config, Utc::now());
    if let Some(renderer) = renderer.as_ref() {
        reindexer = reindexer.with_renderer(renderer as &dyn ThumbnailRenderer);
    }

    let mut thread_pacer = ThreadPacer;
    let mut virtual_pacer: Scheduler<()> = Scheduler::new();
    let pacer: &mut dyn Pacer = if args.no_throttle {
        &mut virtual_pacer
    } else {
        &mut thread_pacer
    };

    let show_progress = args.progress;
    let mut on_progress = |progress: &ReindexProgress| {
        if show_progress {
            match serde_json::to_string(progress) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "failed to encode progress"),
            }
        }
    };
    let route = page.route.clone();
    let summary = reindexer.run(&page, &route, &mut store, pacer, &mut on_progress);
    print_json(&json!({
        "route": route,
        "store": store.root(),
        "summary": summary,
    }))
}

fn command_recover(args: AnchorPageArgs, config: &TourConfig, store: FileStore) -> Result<()> {
    let anchor = find_anchor(&store, &args.anchor_id)?;
    let page = load_page(&args.page)?;
    let outcome = recover_anchor(&page.document, &anchor.route, &anchor, config);
    print_json(&json!({
        "anchorId": anchor.anchor_id,
        "selector": anchor.selector,
        "recovery": outcome,
    }))
}

fn command_validate(args: AnchorPageArgs, config: &TourConfig, store: FileStore) -> Result<()> {
    let anchor = find_anchor(&store, &args.anchor_id)?;
    let page = load_page(&args.page)?;
    let report = validate(&anchor, &page.document, Utc::now(), &config.validation);
    print_json(&json!({
        "anchorId": anchor.anchor_id,
        "validation": report,
    }))
}

fn command_archive(args: ArchiveArgs, mut store: FileStore) -> Result<()> {
    let result = archive(&mut store, &args.anchor_id)
        .with_context(|| format!("failed to archive {}", args.anchor_id))?;
    print_json(&serde_json::to_value(result)?)
}

fn command_search(args: SearchArgs, store: FileStore) -> Result<()> {
    let kind = match args.kind.as_deref() {
        Some(raw) => Some(raw.parse::<AnchorKind>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let mut page = store.search(&SearchQuery {
        route: args.route,
        query: args.query,
        kind,
        limit: args.limit,
        offset: args.offset,
    })?;
    if !args.archived {
        page.anchors.retain(|a| !a.is_archived());
    }
    print_json(&serde_json::to_value(page)?)
}

fn command_cleanup(mut store: FileStore) -> Result<()> {
    let report = cleanup_duplicate_thumbnails(&mut store)?;
    info!(
        groups = report.groups,
        duplicates = report.duplicates,
        errors = report.errors.len(),
        "thumbnail cleanup finished"
    );
    print_json(&serde_json::to_value(report)?)
}

fn command_spotlight(args: SpotlightArgs, config: &TourConfig, store: FileStore) -> Result<()> {
    let mut page = load_page(&args.page)?;
    if let Some(raw) = args.viewport.as_deref() {
        let (width, height) = parse_viewport(raw)?;
        page.set_viewport_size(width, height);
    }
    let selector = match args.selector {
        Some(selector) => Some(selector),
        None => store
            .get_by_anchor_id(&args.anchor_id)?
            .map(|anchor| anchor.selector),
    };
    let mut engine = SpotlightEngine::new(
        SpotlightTarget {
            anchor_id: args.anchor_id,
            selector,
        },
        config,
    );
    engine.start(&mut page);
    let state = engine.run_until_idle(&mut page).clone();
    print_json(&json!({
        "target": engine.target(),
        "state": state,
        "position": engine.position(),
        "failedLookups": engine.lookups(),
        "elapsedMs": engine.elapsed_ms(),
        "viewport": page.viewport,
    }))
}

fn command_tour(args: TourArgs, config: &TourConfig) -> Result<()> {
    let mut page = load_page(&args.page)?;
    let steps: Vec<TourStep> = load_json(&args.steps)?;
    let mut tour = TourController::new(steps, config.clone())?;

    let mut events = vec![json!({"key": null, "event": tour.start(&mut page)})];
    tour.run_until_idle(&mut page);
    for key in args.keys.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        let event = tour.handle_key(key, &mut page);
        tour.run_until_idle(&mut page);
        events.push(json!({
            "key": key,
            "event": event,
            "position": tour.engine().map(|e| e.position()),
        }));
    }
    print_json(&json!({
        "status": tour.status(),
        "totalSteps": tour.steps().len(),
        "step": tour.current_step(),
        "spotlight": tour.engine().map(|e| e.state()),
        "events": events,
    }))
}

fn command_pick(args: PickArgs, config: &TourConfig) -> Result<()> {
    let page = load_page(&args.page)?;
    let events: Vec<SessionEvent> = load_json(&args.messages)?;
    let report = replay(&page, config, &events)?;
    print_json(&serde_json::to_value(report)?)
}

fn open_store(explicit: Option<&Path>) -> Result<FileStore> {
    let root = store_root(explicit);
    FileStore::open(&root).with_context(|| format!("failed to open store: {}", root.display()))
}

fn find_anchor(store: &FileStore, anchor_id: &str) -> Result<Anchor> {
    store
        .get_by_anchor_id(anchor_id)?
        .with_context(|| format!("anchor not found: {anchor_id}"))
}

fn load_page(path: &Path) -> Result<Page> {
    Page::load(path).with_context(|| format!("failed to load page snapshot: {}", path.display()))
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read JSON: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON: {}", path.display()))
}

fn screenshot_renderer(page: &Page, config: &TourConfig) -> Option<ScreenshotRenderer> {
    if page.screenshot.is_none() {
        return None;
    }
    match ScreenshotRenderer::for_page(page, config.thumbnail.clone()) {
        Ok(renderer) => Some(renderer),
        Err(err) => {
            warn!(error = %err, "screenshot unusable, continuing without thumbnails");
            None
        }
    }
}

fn parse_viewport(raw: &str) -> Result<(f64, f64)> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .with_context(|| format!("viewport must look like 1280x720, got {raw}"))?;
    let width: f64 = w.trim().parse().with_context(|| format!("invalid viewport width: {w}"))?;
    let height: f64 = h.trim().parse().with_context(|| format!("invalid viewport height: {h}"))?;
    if width <= 0.0 || height <= 0.0 {
        bail!("viewport must be positive, got {raw}");
    }
    Ok((width, height))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
