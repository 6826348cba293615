mod bus;
mod emulator;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use draw_display::{draw_battery_screen, draw_splash, GraphicsTextDisplay};
use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};
use embedded_graphics_simulator::{
    OutputSettingsBuilder, SimulatorDisplay, SimulatorEvent, Window,
};
use mhb_can_protocol::poller::{PollError, Poller, PollerConfig};
use mhb_can_protocol::timer::{Granularity, TickSource, TimerBank, TICK_CEILING};
use mhb_can_protocol::transport::{Disposition, ReceiveQueue, Receiver, TransportConfig};
use mhb_can_protocol::{BatteryReading, CanFrame, ProductionDateDecoding};
use tokio::sync::{mpsc, Notify};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

use crate::bus::{from_socketcan, ChannelBus, TRANSMIT_QUEUE_DEPTH};
use crate::emulator::BatteryEmulator;

const TIMER_SLOTS: usize = 10;

static TICKS: TickSource = TickSource::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DateDecoding {
    /// OR of the four date bytes
    BitwiseOr,
    /// Four date bytes as one big endian word
    BigEndian,
}

impl From<DateDecoding> for ProductionDateDecoding {
    fn from(decoding: DateDecoding) -> Self {
        match decoding {
            DateDecoding::BitwiseOr => ProductionDateDecoding::BitwiseOr,
            DateDecoding::BigEndian => ProductionDateDecoding::BigEndian,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// CAN interface
    #[arg(short, long, default_value_t = String::from("vcan0"))]
    can_interface: String,

    /// Time between two requests
    #[arg(short, long, default_value_t = 1000,
          value_parser = clap::value_parser!(u32).range(1..=1_000_000))]
    send_period_ms: u32,

    /// How the production date bytes are combined
    #[arg(long, value_enum, default_value_t = DateDecoding::BitwiseOr)]
    production_date: DateDecoding,

    /// Answer the requests with an emulated battery controller on the same interface
    #[arg(short, long)]
    emulate_battery: bool,

    /// Pixel scale of the simulator window
    #[arg(long, default_value_t = 4)]
    scale: u32,
}

/// Millisecond timers up to the tick ceiling, decisecond timers above
fn poller_config(send_period_ms: u32) -> PollerConfig {
    let (granularity, send_period) = if send_period_ms <= TICK_CEILING as u32 {
        (Granularity::Millisecond, send_period_ms)
    } else {
        (
            Granularity::Decisecond,
            send_period_ms.div_ceil(Granularity::Decisecond.tick_millis()),
        )
    };
    PollerConfig {
        granularity,
        send_period: send_period.min(TICK_CEILING as u32) as u16,
        ..PollerConfig::default()
    }
}

fn register_tracing_subscriber(level_filter: LevelFilter) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(level_filter.into())
                .from_env_lossy(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    info!(
        "Environment override for debug level to: {:?}",
        level_filter
    );
}

/// Flip the tick flag of one granularity forever, waking the poll loop each time
async fn tick(granularity: Granularity, wake: Arc<Notify>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(granularity.tick_millis() as u64));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        TICKS.toggle(granularity);
        wake.notify_one();
    }
}

/// Run one frame through the receive path and log the outcome
fn dispatch(
    receiver: &Receiver<'_, BatteryReading>,
    queue: ReceiveQueue,
    frame: &CanFrame,
) -> Disposition {
    let disposition = receiver.on_receive(queue, frame);
    match disposition {
        Disposition::Decoded(data) => debug!("Decoded {:?}", data),
        Disposition::Discarded(reason) => {
            warn!("Discarded {:?} frame ({:?}): {:?}", queue, reason, frame)
        }
        Disposition::Unrecognized => debug!("Unrecognized response: {:?}", frame),
        Disposition::Ignored => trace!("Ignored {:?} frame", queue),
    }
    disposition
}

type CanSocket = socketcan::tokio::AsyncCanSocket<socketcan::CanSocket>;

fn open_socket(interface: &str) -> std::io::Result<Arc<CanSocket>> {
    let socket = CanSocket::open(interface)?;
    info!("Connected to CAN interface: {}", interface);
    Ok(Arc::new(socket))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    register_tracing_subscriber(LevelFilter::DEBUG);
    let args = Args::parse();
    info!("CAN interface: {}", args.can_interface);

    let transport = TransportConfig::default();
    match transport.bit_timing() {
        Ok(timing) => debug!("Bit timing on the target: {:?}", timing),
        Err(e) => warn!("No exact bit timing for the target: {:?}", e),
    }

    // the receive task outlives main's stack frame
    let battery: &'static BatteryReading =
        Box::leak(Box::new(BatteryReading::new(args.production_date.into())));
    let receiver = Arc::new(Receiver::new(transport.filter, battery));

    let socket = open_socket(&args.can_interface)?;

    if args.emulate_battery {
        let emulator_socket = open_socket(&args.can_interface)?;
        tokio::spawn(emulator::run(emulator_socket, BatteryEmulator::default()));
    }

    let receive_socket = socket.clone();
    let frame_receiver = receiver.clone();
    tokio::spawn(async move {
        loop {
            let frame = match receive_socket.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Failed to read CAN frame: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            trace!("Received CAN frame: {:?}", frame);

            let Some((queue, frame)) = from_socketcan(&frame) else {
                continue;
            };
            dispatch(&frame_receiver, queue, &frame);
        }
    });

    let (tx, rx) = mpsc::channel(TRANSMIT_QUEUE_DEPTH);
    tokio::spawn(bus::write_frames(socket, rx));
    let mut bus = ChannelBus::new(tx);

    let wake = Arc::new(Notify::new());
    tokio::spawn(tick(Granularity::Millisecond, wake.clone()));
    tokio::spawn(tick(Granularity::Decisecond, wake.clone()));

    let output_settings = OutputSettingsBuilder::new()
        .scale(args.scale)
        .max_fps(30)
        .build();
    let mut window = Window::new("MHB Battery Monitor Simulator", &output_settings);
    let mut display = GraphicsTextDisplay::new(SimulatorDisplay::<BinaryColor>::new(Size::new(
        128, 64,
    )));

    if let Err(e) = draw_splash(&mut display) {
        warn!("Failed to draw splash screen: {:?}", e);
    }
    window.update(display.inner());
    tokio::time::sleep(Duration::from_millis(1000)).await;

    let config = poller_config(args.send_period_ms);
    info!("Polling with {:?}", config);
    let mut timers = TimerBank::<TIMER_SLOTS>::new(&TICKS);
    let mut poller = Poller::new(config);
    let mut last_discarded = 0;

    'running: loop {
        timers.observe(&TICKS);

        match poller.poll(&mut timers, &mut bus) {
            Ok(Some(parameter)) => debug!("Requested parameter {:#04X}", parameter.as_raw()),
            Ok(None) => {}
            Err(PollError::Transmit { parameter, error }) => {
                warn!(
                    "Request for {:#04X} not sent: {}",
                    parameter.as_raw(),
                    error
                );
            }
            Err(PollError::Timer(e)) => {
                error!("Poller misconfigured: {:?}", e);
                break 'running;
            }
        }

        if poller.take_redraw() {
            let snapshot = battery.snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => debug!("Battery: {}", json),
                Err(e) => warn!("Failed to serialize battery snapshot: {}", e),
            }
            if let Err(e) = draw_battery_screen(&mut display, &snapshot) {
                warn!("Failed to draw battery screen: {:?}", e);
            }
            window.update(display.inner());

            let discarded = receiver.discarded_frames();
            if discarded != last_discarded {
                debug!("Discarded frames: {}", discarded);
                last_discarded = discarded;
            }
        }

        for event in window.events() {
            if let SimulatorEvent::Quit = event {
                warn!("Received quit event, exiting...");
                break 'running;
            } else {
                trace!("Event: {:?}", event);
            }
        }

        // the window is serviced even when no tick arrives
        let _ = tokio::time::timeout(Duration::from_millis(10), wake.notified()).await;
    }

    Ok(())
}
