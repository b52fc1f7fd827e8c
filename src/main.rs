use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lampi_looper::bus::TcpBroker;
use lampi_looper::connection::LinkStatus;
use lampi_looper::messaging::{
    NotificationConsumer, NotificationLevel, SharedNotifier, create_notification_channel,
};
use lampi_looper::output::{BusLightDriver, LightService, TracingLed, TracingSound};
use lampi_looper::{
    BusError, DurableStore, LampConfig, LampController, MixerSink, MonotonicClock, OriginId,
    OutputSink, Pattern, PersistenceDaemon, PlaybackScheduler, PlaybackState, StepValue, SyncBus, TcpTransport,
    Tempo, TimeSignature,
};
use ringbuf::traits::Consumer;
use tracing_subscriber::EnvFilter;

const NOTIFICATION_RINGBUFFER_CAPACITY: usize = 64;

// Time allowed for retained state to arrive before editing or playing
const RETAINED_WAIT: Duration = Duration::from_millis(500);

fn main() -> lampi_looper::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => LampConfig::load(path)?,
        None => LampConfig::default(),
    };
    if let Some(broker) = cli.broker {
        config.bus.broker_addr = broker;
    }

    match cli.command {
        Commands::Broker { listen } => run_broker(listen.as_deref().unwrap_or(&config.bus.broker_addr)),
        Commands::Db { path } => run_db(config, path),
        Commands::Driver {
            remote_light,
            serve_light,
        } => run_driver(config, remote_light, serve_light),
        Commands::Play { seconds } => run_play(config, seconds),
        Commands::Set(edit) => run_set(config, edit),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

fn run_broker(addr: &str) -> lampi_looper::Result<()> {
    TcpBroker::bind(addr)?.serve()?;
    Ok(())
}

fn run_db(config: LampConfig, path: Option<PathBuf>) -> lampi_looper::Result<()> {
    let (notifier, mut notifications) = notifier();
    let bus = connect(&config, "lampi_db", Some(notifier.clone()));
    let durable = DurableStore::new(path.unwrap_or_else(|| config.storage.path.clone()));

    tracing::info!(path = %durable.path().display(), "persistence daemon starting");
    let daemon = PersistenceDaemon::start(&bus, durable, &config.storage, Some(notifier));
    tracing::info!(tempo = %daemon.current().tempo(), "durable state loaded");

    supervise(&bus, &mut notifications)
}

fn run_driver(config: LampConfig, remote_light: bool, serve_light: bool) -> lampi_looper::Result<()> {
    let (notifier, mut notifications) = notifier();
    let bus = Arc::new(connect(&config, "lampi_driver", Some(notifier.clone())));

    let _light_service = serve_light.then(|| LightService::start(&bus, TracingLed));

    let sink: Arc<dyn OutputSink> = if remote_light {
        Arc::new(MixerSink::new(BusLightDriver::new(Arc::clone(&bus)), TracingSound))
    } else {
        Arc::new(MixerSink::new(TracingLed, TracingSound))
    };
    let controller = Arc::new(build_controller(&config, Arc::clone(&bus), sink, Some(notifier)));

    // Playback samples the pattern once, so each change restarts it
    let weak = Arc::downgrade(&controller);
    controller.store().on_change(move |pattern| {
        let Some(controller) = weak.upgrade() else {
            return;
        };
        controller.stop_playback();
        if pattern.tempo().is_paused() || pattern.is_silent() {
            return;
        }
        if let Err(e) = controller.start_playback() {
            tracing::warn!(error = %e, "playback not restarted");
        }
    });

    if bus.wait_for_snapshot(RETAINED_WAIT).is_none() {
        tracing::info!("no retained pattern, playing the local default");
    }
    if controller.playback_state() == PlaybackState::Stopped {
        if let Err(e) = controller.start_playback() {
            tracing::warn!(error = %e, "nothing to play yet");
        }
    }

    supervise(&bus, &mut notifications)
}

fn run_play(config: LampConfig, seconds: u64) -> lampi_looper::Result<()> {
    let bus = Arc::new(connect(&config, "lampi_play", None));
    let sink: Arc<dyn OutputSink> = Arc::new(MixerSink::new(TracingLed, TracingSound));
    let controller = build_controller(&config, Arc::clone(&bus), sink, None);

    if bus.wait_for_snapshot(RETAINED_WAIT).is_none() {
        tracing::warn!("no shared pattern on the bus, playing the local default");
    }

    controller.start_playback()?;
    thread::sleep(Duration::from_secs(seconds));
    controller.stop_playback();
    Ok(())
}

fn run_set(config: LampConfig, edit: EditArgs) -> lampi_looper::Result<()> {
    let bus = Arc::new(connect(&config, "lampi_cli", None));
    if !bus.wait_connected(Duration::from_millis(config.bus.reconnect.max_elapsed_ms)) {
        return Err(bus
            .fatal_error()
            .unwrap_or(BusError::TransportUnavailable(config.bus.broker_addr.clone()))
            .into());
    }

    let sink: Arc<dyn OutputSink> = Arc::new(MixerSink::new(TracingLed, TracingSound));
    let controller = build_controller(&config, Arc::clone(&bus), sink, None);
    // Edit on top of the shared state, not the local default
    bus.wait_for_snapshot(RETAINED_WAIT);

    if let Some(signature) = edit.signature {
        controller.set_time_signature(signature)?;
    }
    if edit.clear {
        controller.clear_pattern()?;
    }
    for (index, value) in edit.steps {
        controller.set_step(index, value)?;
    }
    for index in edit.toggle {
        let value = controller.toggle_step(index)?;
        tracing::info!(index, %value, "step toggled");
    }
    if let Some(bpm) = edit.tempo {
        controller.set_tempo(bpm)?;
    }
    if let Some(swing) = edit.swing {
        controller.set_swing(swing)?;
    }

    let pattern = controller.pattern();
    println!(
        "{} @ {} bpm{}: {}",
        pattern.time_signature(),
        pattern.tempo(),
        if pattern.swing_enabled() { " (swing)" } else { "" },
        pattern
            .steps()
            .iter()
            .map(|s| s.as_u8().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    );

    // Shutdown flushes queued frames while the link is up
    bus.shutdown();
    Ok(())
}

fn connect(config: &LampConfig, role: &str, notifier: Option<SharedNotifier>) -> SyncBus {
    let transport = Arc::new(TcpTransport::new(config.bus.broker_addr.clone()));
    SyncBus::start_with_notifier(
        transport,
        OriginId::generate(role),
        config.bus.clone(),
        Arc::new(MonotonicClock::new()),
        notifier,
    )
}

fn build_controller(
    config: &LampConfig,
    bus: Arc<SyncBus>,
    sink: Arc<dyn OutputSink>,
    notifier: Option<SharedNotifier>,
) -> LampController {
    let tempo = Tempo::new(config.playback.default_bpm).unwrap_or_default();
    let mut scheduler = PlaybackScheduler::new(sink, Arc::new(MonotonicClock::new()));
    if let Some(notifier) = notifier {
        scheduler = scheduler.with_notifier(notifier);
    }
    LampController::new(bus, Pattern::new(TimeSignature::default(), tempo), scheduler)
}

fn notifier() -> (SharedNotifier, NotificationConsumer) {
    let (tx, rx) = create_notification_channel(NOTIFICATION_RINGBUFFER_CAPACITY);
    (Arc::new(Mutex::new(tx)), rx)
}

/// Log notifications until the bus gives up on the broker
fn supervise(bus: &SyncBus, notifications: &mut NotificationConsumer) -> lampi_looper::Result<()> {
    loop {
        while let Some(notification) = notifications.try_pop() {
            match notification.level {
                NotificationLevel::Error => {
                    tracing::error!(category = ?notification.category, "{}", notification.message)
                }
                NotificationLevel::Warning => {
                    tracing::warn!(category = ?notification.category, "{}", notification.message)
                }
            }
        }

        if bus.status() == LinkStatus::Failed {
            return Err(bus
                .fatal_error()
                .unwrap_or(BusError::Disconnected)
                .into());
        }
        thread::sleep(Duration::from_millis(200));
    }
}

fn parse_step(raw: &str) -> Result<(usize, StepValue), String> {
    let (index, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=VALUE, got '{}'", raw))?;
    let index = index.trim().parse::<usize>().map_err(|e| e.to_string())?;
    let value = value.trim().parse::<u8>().map_err(|e| e.to_string())?;
    let value = StepValue::try_from(value).map_err(|e| e.to_string())?;
    Ok((index, value))
}

fn parse_signature(raw: &str) -> Result<TimeSignature, String> {
    TimeSignature::from_label(raw).ok_or_else(|| format!("unknown time signature '{}'", raw))
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Networked step-sequencer lamp", long_about = None)]
struct Cli {
    /// RON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Broker address, overriding the configuration
    #[arg(short, long, global = true)]
    broker: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the TCP broker that every other process connects to.
    Broker {
        /// Listen address (defaults to the configured broker address).
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Run the persistence daemon.
    Db {
        /// Durable record path (defaults to the configured one).
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Run the playback driver, following the shared pattern.
    Driver {
        /// Publish LED colors on the lighting topic instead of driving one locally.
        #[arg(long)]
        remote_light: bool,
        /// Also own the LED: apply colors received on the lighting topic.
        #[arg(long)]
        serve_light: bool,
    },
    /// Play the shared pattern for a while, then stop.
    Play {
        #[arg(short, long, default_value_t = 8)]
        seconds: u64,
    },
    /// Edit the shared pattern and publish it.
    Set(EditArgs),
}

#[derive(clap::Args, Debug)]
struct EditArgs {
    /// Set steps, as INDEX=VALUE with VALUE in 0-3 (repeatable).
    #[arg(long = "step", value_parser = parse_step)]
    steps: Vec<(usize, StepValue)>,
    /// Cycle a step to its next value (repeatable).
    #[arg(long)]
    toggle: Vec<usize>,
    /// Tempo in BPM (0-200, 0 pauses).
    #[arg(long)]
    tempo: Option<u16>,
    /// Time signature: 3/4, 4/4 or 5/4. Resets the grid.
    #[arg(long, value_parser = parse_signature)]
    signature: Option<TimeSignature>,
    #[arg(long)]
    swing: Option<bool>,
    /// Silence every step first.
    #[arg(long)]
    clear: bool,
}
