#![no_std]
#![no_main]

mod can;

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn, Debug2Format};
use draw_display::{draw_battery_screen, draw_splash, GraphicsTextDisplay};
use embassy_executor::Spawner;
use embassy_futures::yield_now;
use embassy_stm32::can::{
    Can, Rx0InterruptHandler, Rx1InterruptHandler, SceInterruptHandler, TxInterruptHandler,
};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::CAN;
use embassy_stm32::time::Hertz;
use embassy_stm32::{bind_interrupts, Peripherals};
use embassy_time::{Duration, Ticker, Timer};
use mhb_can_protocol::poller::{PollError, Poller, PollerConfig};
use mhb_can_protocol::timer::{Granularity, TickSource, TimerBank};
use mhb_can_protocol::transport::{AcceptanceFilter, Receiver, TransportConfig};
use mhb_can_protocol::{BatteryReading, ProductionDateDecoding, RESPONSE_ID};
use ssd1306::{prelude::*, I2CDisplayInterface, Ssd1306};
use {defmt_rtt as _, panic_probe as _};

use crate::can::MailboxTransmitter;

bind_interrupts!(struct CanInterrupts {
    USB_LP_CAN1_RX0 => Rx0InterruptHandler<CAN>;
    CAN1_RX1 => Rx1InterruptHandler<CAN>;
    CAN1_SCE => SceInterruptHandler<CAN>;
    USB_HP_CAN1_TX => TxInterruptHandler<CAN>;
});

const TIMER_SLOTS: usize = 10;

static TICKS: TickSource = TickSource::new();
static BATTERY: BatteryReading = BatteryReading::new(ProductionDateDecoding::BitwiseOr);
static RECEIVER: Receiver<'static, BatteryReading> =
    Receiver::new(AcceptanceFilter::exact(RESPONSE_ID), &BATTERY);

pub fn embassy_init() -> Peripherals {
    use embassy_stm32::rcc::{
        ADCPrescaler, AHBPrescaler, APBPrescaler, Hse, HseMode, Pll, PllMul, PllPreDiv,
        PllSource, Sysclk,
    };

    let mut config = embassy_stm32::Config::default();
    config.rcc.hse = Some(Hse {
        freq: Hertz::mhz(8),
        mode: HseMode::Oscillator,
    });
    // 72 MHz core, APB1 and with it the CAN controller on 36 MHz
    config.rcc.pll = Some(Pll {
        src: PllSource::HSE,
        prediv: PllPreDiv::DIV1,
        mul: PllMul::MUL9,
    });
    config.rcc.sys = Sysclk::PLL1_P;
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV2;
    config.rcc.apb2_pre = APBPrescaler::DIV1;
    config.rcc.adc_pre = ADCPrescaler::DIV6;

    embassy_stm32::init(config)
}

/// Flip the tick flag of one granularity, the poll loop counts the edges
#[embassy_executor::task(pool_size = 2)]
async fn tick_source(granularity: Granularity) {
    let mut ticker = Ticker::every(Duration::from_millis(granularity.tick_millis() as u64));
    loop {
        ticker.next().await;
        TICKS.toggle(granularity);
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_init();
    info!("Hello Rust!");

    // led is low active
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);

    let i2c = I2c::new_blocking(p.I2C1, p.PB6, p.PB7, Hertz::khz(400), Default::default());
    let oled = Ssd1306::new(
        I2CDisplayInterface::new(i2c),
        DisplaySize128x64,
        DisplayRotation::Rotate0,
    )
    .into_buffered_graphics_mode();
    let mut display = GraphicsTextDisplay::with_flush(oled, |oled| oled.flush());
    if let Err(e) = display.inner_mut().init() {
        error!("Display init failed: {}", Debug2Format(&e));
    }

    if let Err(e) = draw_splash(&mut display) {
        warn!("Failed to draw splash screen: {}", Debug2Format(&e));
    }
    led.set_low();
    Timer::after_millis(500).await;
    led.set_high();

    let transport = TransportConfig::default();
    let mut can = Can::new(p.CAN, p.PA11, p.PA12, CanInterrupts);
    can::configure(&mut can, &transport).await;
    let (can_tx, can_rx) = can.split();
    let mut bus = MailboxTransmitter(can_tx);

    spawner.must_spawn(can::receiver(can_rx));
    spawner.must_spawn(tick_source(Granularity::Millisecond));
    spawner.must_spawn(tick_source(Granularity::Decisecond));

    let mut timers = TimerBank::<TIMER_SLOTS>::new(&TICKS);
    let mut poller = Poller::new(PollerConfig::default());
    info!("Starting poll loop with {}", poller.config());

    loop {
        timers.observe(&TICKS);

        match poller.poll(&mut timers, &mut bus) {
            Ok(_) => {}
            Err(PollError::Transmit { parameter, error }) => {
                warn!("Request for {} not sent: {}", parameter, error);
            }
            Err(PollError::Timer(e)) => {
                error!("Poller misconfigured: {}", e);
                return;
            }
        }

        if poller.take_redraw() {
            let snapshot = BATTERY.snapshot();
            trace!("Redraw {}", snapshot);
            if let Err(e) = draw_battery_screen(&mut display, &snapshot) {
                warn!("Failed to draw battery screen: {}", Debug2Format(&e));
            }
            let discarded = RECEIVER.discarded_frames();
            if discarded > 0 {
                debug!("Discarded frames: {}", discarded);
            }
        }

        yield_now().await;
    }
}
