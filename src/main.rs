#![no_std]
#![no_main]

mod board;
mod drivers;
mod state;
mod tasks;

use core::cell::RefCell;

use embassy_executor::Spawner;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use {defmt_rtt as _, panic_probe as _};

use crate::board::Board;
use crate::drivers::bno055::{Bno055Reading, RequestSlot, BNO055_BAUD_RATE};
use crate::state::{SecondaryAttitude, SecondaryImuConfig};

// ── Shared request slot ───────────────────────────────────────────────────────
//  The BNO055 protocol allows one command in flight; the issuer parks its
//  read request here and the RX pump takes it back on frame completion.
static REQUEST_SLOT: Mutex<CriticalSectionRawMutex, RefCell<RequestSlot>> =
    Mutex::new(RefCell::new(RequestSlot::new()));

// ── Inter-task channels ───────────────────────────────────────────────────────
//  Cap=1: consumers always want the LATEST value; older values are dropped.
static READING_CHAN: Channel<CriticalSectionRawMutex, Bno055Reading, 1> = Channel::new();
static ATTITUDE_CHAN: Channel<CriticalSectionRawMutex, SecondaryAttitude, 1> = Channel::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    USART3 => embassy_stm32::usart::InterruptHandler<peripherals::USART3>;
});

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;

    // 2. BNO055 link on USART3 @ 115200 (TX=PB10, RX=PB11)
    let mut imu_config = UsartConfig::default();
    imu_config.baudrate = BNO055_BAUD_RATE;
    let imu_uart = Uart::new(
        p.USART3, p.PB11, p.PB10,
        Irqs,
        p.DMA1_CH3, p.DMA1_CH1,
        imu_config,
    ).unwrap();
    let (imu_uart_tx, imu_uart_rx) = imu_uart.split();

    // 3. Mount configuration: module sits flat, connector aft.
    //    Offsets in tenths of a degree.
    let imu2_config = SecondaryImuConfig {
        enabled: true,
        roll_decidegrees: 0,
        pitch_decidegrees: 0,
        yaw_decidegrees: 1800,
        use_for_osd_heading: true,
        use_for_osd_ahi: false,
    };

    // 4. Heartbeat LED (PC13)
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);

    // 5. Let the module finish its power-on reset (~650 ms) before probing.
    Timer::after(Duration::from_millis(650)).await;

    // 6. Spawn all tasks
    spawner.spawn(tasks::bno055_rx::bno055_rx_task(
        imu_uart_rx,
        &REQUEST_SLOT,
        READING_CHAN.sender(),
    )).unwrap();

    spawner.spawn(tasks::secondary_imu::secondary_imu_task(
        imu_uart_tx,
        imu2_config,
        &REQUEST_SLOT,
        READING_CHAN.receiver(),
        ATTITUDE_CHAN.sender(),
    )).unwrap();

    spawner.spawn(tasks::telemetry_task::telemetry_task(
        ATTITUDE_CHAN.receiver(),
    )).unwrap();

    // 7. Main task: LED heartbeat @ 1 Hz
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}
