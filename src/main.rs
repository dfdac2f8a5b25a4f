use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use genflow_lib::bridge::boundary::{run_event_pump, BoundarySender};
use genflow_lib::config::{load_config, GenflowConfig, PartialConfig, PartialLoggingConfig};
use genflow_lib::events::{BridgeEvent, EventName, IdentityFilter};
use genflow_lib::executor::{report_channel, SimulatedExecutor, SimulationScript};
use genflow_lib::rate_limit::{RateLimitDetector, RateLimitOrigin};
use genflow_lib::{
    truncate_message, EventBridge, EventSink, GenerationConfig, GenerationViewState,
    HandlerError, InMemoryProjectResolver, JobController, JobIdentity, JobKind, ListenerSet,
    Project, RateLimitInterceptor, SubscriberAggregator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// genflow - generation lifecycle coordinator
#[derive(Parser, Debug)]
#[command(name = "genflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (overrides config files; RUST_LOG overrides this)
    #[arg(long, env = "GENFLOW_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one generation through a simulated executor and print every bridge event as JSON
    Simulate(SimulateArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Roadmap,
    Ideation,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Roadmap => JobKind::Roadmap,
            KindArg::Ideation => JobKind::Ideation,
        }
    }
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long, value_enum, default_value = "roadmap")]
    kind: KindArg,

    /// Project ID
    #[arg(long)]
    project: String,

    /// Project directory (defaults to the current directory)
    #[arg(long)]
    project_path: Option<String>,

    /// Issue a refresh instead of a start
    #[arg(long)]
    refresh: bool,

    /// Stop the job after this many progress events
    #[arg(long)]
    stop_after: Option<usize>,

    #[arg(long)]
    competitor_analysis: bool,

    /// Make the run fail with this error
    #[arg(long)]
    fail: Option<String>,

    /// Report an SDK rate limit after this step
    #[arg(long)]
    rate_limit_after: Option<usize>,

    /// Terminal output line to scan for rate limits (repeatable)
    #[arg(long = "terminal-line")]
    terminal_lines: Vec<String>,

    #[arg(long, default_value = "200")]
    step_delay_ms: u64,

    /// Give up after this many seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate(args) => {
            let project_path = match &args.project_path {
                Some(path) => path.clone(),
                None => std::env::current_dir()
                    .context("Failed to resolve current directory")?
                    .to_string_lossy()
                    .to_string(),
            };

            let cli_layer = cli.log_level.map(|level| PartialConfig {
                logging: Some(PartialLoggingConfig { level: Some(level) }),
                ..Default::default()
            });
            let config = load_config(Some(&project_path), cli_layer)?;
            genflow_lib::logging::init(&config.logging.level);

            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            rt.block_on(simulate(args, project_path, config))
        }
    }
}

async fn simulate(
    args: SimulateArgs,
    project_path: String,
    config: GenflowConfig,
) -> anyhow::Result<()> {
    let identity = JobIdentity::new(args.project.clone(), args.kind.into());

    // Consumer side
    let bridge = EventBridge::new();
    let view = Arc::new(GenerationViewState::new());
    let interceptor = Arc::new(RateLimitInterceptor::new(view.clone()));
    let mut listeners = SubscriberAggregator::new(view.clone())
        .for_kind(identity.kind)
        .with_rate_limits(interceptor)
        .attach(&bridge);
    let (names_tx, mut names_rx) = mpsc::unbounded_channel::<EventName>();
    listeners.extend(attach_printer(&bridge, &identity, names_tx));

    // Producer side
    let boundary = BoundarySender::new(config.bridge.boundary_capacity);
    let pump = tokio::spawn(run_event_pump(boundary.subscribe(), bridge.clone()));

    let (reports_tx, reports_rx) = report_channel();
    let script = SimulationScript {
        step_delay: Duration::from_millis(args.step_delay_ms),
        failure: args.fail.clone(),
        rate_limit_after: args.rate_limit_after,
        report_after_cancel: true,
    };
    let executor = Arc::new(
        SimulatedExecutor::new(reports_tx)
            .with_script(script)
            .with_rate_limit_sink(Arc::new(boundary.clone())),
    );
    let resolver = InMemoryProjectResolver::new().with_project(Project {
        id: args.project.clone(),
        name: args.project.clone(),
        path: project_path,
    });
    let controller = Arc::new(
        JobController::new(Arc::new(resolver), executor, Arc::new(boundary.clone()))
            .with_initial_progress(config.generation.initial_progress),
    );
    tokio::spawn(controller.clone().run_report_loop(reports_rx));

    let detector = RateLimitDetector::new();
    for (index, line) in args.terminal_lines.iter().enumerate() {
        let source_id = format!("terminal-{}", index);
        if let Some(payload) = detector.detect_payload(line, &source_id, Some(&args.project)) {
            boundary.emit(BridgeEvent::RateLimit {
                origin: RateLimitOrigin::Terminal,
                payload,
            });
        } else {
            log::debug!("No rate limit in {:?}", truncate_message(line, 60));
        }
    }

    let generation = GenerationConfig::default().with_competitor_analysis(
        args.competitor_analysis || config.generation.competitor_analysis_default,
    );
    if args.refresh {
        controller.refresh(identity.clone(), generation).await?;
    } else {
        controller.start(identity.clone(), generation).await?;
    }

    let wait = async {
        let mut progress_seen = 0;
        while let Some(name) = names_rx.recv().await {
            match name {
                EventName::Progress(_) => {
                    progress_seen += 1;
                    if args.stop_after == Some(progress_seen) {
                        let stopped = controller.stop(&identity).await?;
                        log::info!("Stop requested for {}: {}", identity, stopped);
                    }
                }
                EventName::Complete(_) | EventName::Error(_) | EventName::Stopped(_) => break,
                EventName::RateLimit(_) => {}
            }
        }
        anyhow::Ok(())
    };
    match tokio::time::timeout(Duration::from_secs(args.timeout_secs), wait).await {
        Ok(result) => result?,
        Err(_) => bail!("{} did not finish within {}s", identity, args.timeout_secs),
    }

    // Let a late report from a cancelled run reach the controller and get discarded
    tokio::time::sleep(Duration::from_millis(args.step_delay_ms)).await;

    let status = view.status(&identity);
    println!("{}", serde_json::to_string(&serde_json::json!({ "finalStatus": status }))?);
    if let Some(rate_limit) = view.last_rate_limit() {
        log::info!(
            "{} rate limit notification(s), last from {}",
            view.rate_limit_count(),
            rate_limit.source_id
        );
    }

    listeners.dispose_all();
    pump.abort();
    Ok(())
}

/// Print every event for `identity` (and every rate limit of its project) as a JSON line
fn attach_printer(
    bridge: &EventBridge,
    identity: &JobIdentity,
    names: mpsc::UnboundedSender<EventName>,
) -> ListenerSet {
    let mut listeners = ListenerSet::new();
    let names_iter = EventName::job_events(identity.kind).into_iter().chain([
        EventName::RateLimit(RateLimitOrigin::Terminal),
        EventName::RateLimit(RateLimitOrigin::Sdk),
    ]);

    for name in names_iter {
        let names = names.clone();
        listeners.push(bridge.register(
            name,
            IdentityFilter::Job(identity.clone()),
            move |event| {
                let envelope = event
                    .to_server_event()
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                let line =
                    serde_json::to_string(&envelope).map_err(|e| HandlerError::new(e.to_string()))?;
                println!("{}", line);
                let _ = names.send(event.name());
                Ok(())
            },
        ));
    }
    listeners
}
