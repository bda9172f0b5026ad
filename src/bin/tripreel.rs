use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tripreel::{
    Clock, Config, Coordinate, FfmpegSink, FfmpegSinkOpts, GeocodingGateway, HttpTileSource,
    LocationId, ManualClock, NominatimGeocoder, Notifier, OsrmRouter, PlayerOptions,
    PlayerServices, RenderBackend, RouteResolver, RouteSource, SvgBackend, SystemClock,
    TransportMode, TripPlayer,
    project::load_project_file,
};

#[derive(Parser, Debug)]
#[command(name = "tripreel", version, about = "Animated multi-stop trip maps")]
struct Cli {
    /// JSON config file; `TRIPREEL_*` variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (repeat for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Skip basemap tiles (fully offline when all legs are flights).
    #[arg(long, global = true)]
    no_tiles: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up a place name.
    Geocode {
        query: String,
    },
    /// Look up the place at a coordinate.
    Reverse {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
    },
    /// Resolve one leg and print its source and length.
    Route {
        /// Origin as `lat,lng`.
        #[arg(long, allow_hyphen_values = true)]
        from: Coordinate,
        /// Destination as `lat,lng`.
        #[arg(long, allow_hyphen_values = true)]
        to: Coordinate,
        #[arg(long, default_value = "car")]
        mode: TransportMode,
        /// Print every polyline sample.
        #[arg(long)]
        points: bool,
    },
    /// Render a still of a saved project as PNG.
    Frame(FrameArgs),
    /// Play a saved project headlessly and record it (requires `ffmpeg` on PATH).
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct FrameArgs {
    /// Saved project JSON.
    #[arg(long)]
    project: PathBuf,

    /// Playback time in seconds.
    #[arg(long, default_value_t = 0.0)]
    at: f64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Saved project JSON.
    #[arg(long)]
    project: PathBuf,

    /// Directory for the recording; defaults to the configured output dir.
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = load_config(cli.config.as_deref())?;
    match cli.cmd {
        Command::Geocode { ref query } => cmd_geocode(&cfg, query).await,
        Command::Reverse { lat, lng } => cmd_reverse(&cfg, lat, lng).await,
        Command::Route {
            from,
            to,
            mode,
            points,
        } => cmd_route(&cfg, from, to, mode, points).await,
        Command::Frame(ref args) => cmd_frame(&cfg, cli.no_tiles, args).await,
        Command::Render(ref args) => cmd_render(&cfg, cli.no_tiles, args).await,
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::WARN,
        (false, 1) => tracing::Level::INFO,
        (false, 2) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut cfg = match path {
        Some(p) => Config::from_path(p).with_context(|| format!("load config '{}'", p.display()))?,
        None => Config::default(),
    };
    cfg.apply_env().context("apply TRIPREEL_* overrides")?;
    cfg.validate().context("validate config")?;
    Ok(cfg)
}

/// Print notices to stderr as they arrive.
fn notice_printer() -> Notifier {
    let (notifier, mut rx) = Notifier::channel();
    tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            eprintln!("{notice}");
        }
    });
    notifier
}

fn gateway(cfg: &Config) -> anyhow::Result<GeocodingGateway> {
    let geocoder = NominatimGeocoder::new(&cfg.geocoder_url, &cfg.user_agent, cfg.http_timeout())
        .context("create geocoder")?;
    Ok(GeocodingGateway::new(Arc::new(geocoder)))
}

fn resolver(cfg: &Config, notifier: Notifier) -> anyhow::Result<RouteResolver> {
    let router = OsrmRouter::new(&cfg.router_url, &cfg.user_agent, cfg.http_timeout())
        .context("create router")?;
    Ok(RouteResolver::new(Arc::new(router), notifier))
}

async fn cmd_geocode(cfg: &Config, query: &str) -> anyhow::Result<()> {
    let place = gateway(cfg)?
        .resolve(query)
        .await
        .with_context(|| format!("geocode '{query}'"))?;
    println!("{}\t{}", place.coordinate, place.display_name);
    Ok(())
}

async fn cmd_reverse(cfg: &Config, lat: f64, lng: f64) -> anyhow::Result<()> {
    let place = gateway(cfg)?
        .resolve_from_coordinate(lat, lng)
        .await
        .with_context(|| format!("reverse geocode {lat},{lng}"))?;
    println!("{}\t{}", place.coordinate, place.display_name);
    Ok(())
}

async fn cmd_route(
    cfg: &Config,
    from: Coordinate,
    to: Coordinate,
    mode: TransportMode,
    points: bool,
) -> anyhow::Result<()> {
    let resolver = resolver(cfg, notice_printer())?;
    let path = resolver.resolve_leg(from, to, mode).await;
    let source = match &path.source {
        RouteSource::Direct => "direct".to_string(),
        RouteSource::Routed => "routed".to_string(),
        RouteSource::Fallback(e) => format!("fallback ({e})"),
    };
    println!(
        "{mode}\t{source}\t{} points\t{:.1} km",
        path.polyline.len(),
        path.polyline.length_km()
    );
    if points {
        for p in path.polyline.points() {
            println!("{p}");
        }
    }
    Ok(())
}

/// Load a project, resolve any named-but-unplaced points, and apply routes.
async fn open_project(
    cfg: &Config,
    no_tiles: bool,
    project: &Path,
    clock: Arc<dyn Clock>,
    output_dir: Option<&Path>,
) -> anyhow::Result<TripPlayer> {
    let project = load_project_file(project)
        .with_context(|| format!("load project '{}'", project.display()))?;
    let trip = project.trip()?;

    let notifier = notice_printer();
    let tiles = if no_tiles {
        None
    } else {
        let source = HttpTileSource::new(&cfg.user_agent, cfg.http_timeout())
            .context("create tile client")?;
        Some(Arc::new(source) as Arc<dyn tripreel::TileSource>)
    };
    let services = PlayerServices {
        geocoder: gateway(cfg)?,
        resolver: resolver(cfg, notifier.clone())?,
        tiles,
    };

    let mut options = PlayerOptions::from_config(cfg)?;
    options.timing = project.timing()?;
    if let Some(dir) = output_dir {
        options.output_dir = dir.to_path_buf();
    }

    let unresolved: Vec<LocationId> = trip
        .points()
        .iter()
        .filter(|p| !p.is_valid() && !p.name.trim().is_empty())
        .map(|p| p.id)
        .collect();

    let mut player = TripPlayer::new(trip, services, options, clock, notifier)?;
    for id in unresolved {
        player.geocode(id).await?;
    }
    player.refresh_routes().await;

    let legs = player.routes().map_or(0, |r| r.legs.len());
    anyhow::ensure!(
        legs > 0,
        "project needs at least two resolved locations to animate"
    );
    tracing::info!(legs, "project ready");
    Ok(player)
}

async fn cmd_frame(cfg: &Config, no_tiles: bool, args: &FrameArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.at.is_finite() && args.at >= 0.0,
        "--at must be a non-negative number of seconds"
    );
    let mut player = open_project(
        cfg,
        no_tiles,
        &args.project,
        Arc::new(SystemClock::new()),
        None,
    )
    .await?;

    let (leg, at) = player
        .seek_preview(Duration::from_secs_f64(args.at))
        .context("nothing to draw")?;
    tracing::debug!(leg, %at, "marker placed");

    let mut backend = SvgBackend::new(player.map().viewport().canvas);
    let frame = backend.render(player.map())?;
    frame
        .save_png(&args.out)
        .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

async fn cmd_render(cfg: &Config, no_tiles: bool, args: &RenderArgs) -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::new());
    let mut player = open_project(
        cfg,
        no_tiles,
        &args.project,
        clock.clone(),
        args.out_dir.as_deref(),
    )
    .await?;

    let step = cfg.fps()?.frame_duration();
    let total = player.engine().total_duration();

    player.play()?;
    let sink = FfmpegSink::new(FfmpegSinkOpts::default());
    let codec = player.start_capture(Box::new(sink))?;
    eprintln!("recording {codec}, {:.1}s of animation", total.as_secs_f64());

    // Bounded by the animation length plus one frame per leg for the completion ticks.
    let max_ticks = total.as_nanos() / step.as_nanos().max(1)
        + player.engine().legs().len() as u128
        + 2;
    for _ in 0..max_ticks {
        clock.advance(step);
        player.tick();
        // Follow-recenters reveal new ground.
        player.sync_tiles().await;
        if player.state().is_stopped() {
            break;
        }
    }
    player.stop();

    let path = player
        .last_recording()
        .context("recording failed; see the messages above")?;
    eprintln!("wrote {}", path.display());
    Ok(())
}
