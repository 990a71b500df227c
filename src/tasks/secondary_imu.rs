use core::cell::RefCell;

use embassy_executor::task;
use embassy_futures::select::{select, Either};
use embassy_stm32::peripherals::{DMA1_CH3, USART3};
use embassy_stm32::usart::UartTx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{Duration, Instant, Ticker, Timer};

use crate::drivers::bno055::{
    self, Bno055Reading, CalibrationProfile, EulerDecidegrees, InitError, ReadKind, RequestSlot,
};
use crate::drivers::rotation::{decidegrees_to_radians, wrap_yaw_decidegrees, Mat3, Vec3};
use crate::state::{CalibrationStatus, SecondaryAttitude, SecondaryImuConfig};

// ── Timing constants ──────────────────────────────────────────────────────────

/// Task cadence.
const TICK_HZ: u64 = 10;
/// How long one tick waits for the Euler reply before carrying stale values.
const REPLY_WAIT_MS: u64 = 50;
/// Identity probe turnaround.
const IDENT_WAIT_MS: u64 = 5;
/// Mode-switch settle time mandated by the module.
const MODE_SWITCH_WAIT_MS: u64 = 25;
/// Calibration confidence refresh: once every this many ticks.
const CALIB_DECIMATION: u8 = 10;

type RequestSlotRef = &'static Mutex<CriticalSectionRawMutex, RefCell<RequestSlot>>;
type ReadingReceiver = Receiver<'static, CriticalSectionRawMutex, Bno055Reading, 1>;
type AttitudeSender = Sender<'static, CriticalSectionRawMutex, SecondaryAttitude, 1>;
type Bno055Tx = UartTx<'static, USART3, DMA1_CH3>;

// ── Request helpers ───────────────────────────────────────────────────────────

/// Park the correlation tag for `kind`. Refused while an earlier request is
/// still pending and fresh — at most one command is ever in flight.
fn prime(request_slot: RequestSlotRef, kind: ReadKind) -> bool {
    let now_ms = Instant::now().as_millis() as u32;
    request_slot.lock(|slot| slot.borrow_mut().try_issue(kind, now_ms))
}

async fn request_euler_angles(imu_tx: &mut Bno055Tx, request_slot: RequestSlotRef) -> bool {
    if !prime(request_slot, ReadKind::EulerAngles) {
        return false;
    }
    let cmd = bno055::encode_register_read(bno055::REG_EUL_YAW_LSB, bno055::EUL_READ_LEN);
    let _ = imu_tx.write(&cmd).await;
    true
}

async fn request_calibration_status(imu_tx: &mut Bno055Tx, request_slot: RequestSlotRef) -> bool {
    if !prime(request_slot, ReadKind::CalibrationStatus) {
        return false;
    }
    let cmd = bno055::encode_register_read(bno055::REG_CALIB_STAT, 1);
    let _ = imu_tx.write(&cmd).await;
    true
}

// ── Initialization ────────────────────────────────────────────────────────────

/// One-shot module bring-up: identity probe, power mode, operating mode.
/// The fixed waits are the settle times the module mandates after each step.
async fn init_module(
    imu_tx: &mut Bno055Tx,
    request_slot: RequestSlotRef,
    reading_rx: &ReadingReceiver,
    profile: Option<&CalibrationProfile>,
) -> Result<(), InitError> {
    // Identity probe: one-byte read of the chip-id register.
    prime(request_slot, ReadKind::ChipId);
    let _ = imu_tx
        .write(&bno055::encode_register_read(bno055::REG_CHIP_ID, 1))
        .await;
    Timer::after(Duration::from_millis(IDENT_WAIT_MS)).await;

    match reading_rx.try_receive() {
        Ok(Bno055Reading::ChipId(bno055::CHIP_ID)) => {}
        Ok(Bno055Reading::ChipId(other)) => return Err(InitError::IdentMismatch(other)),
        Ok(_) | Err(_) => return Err(InitError::NoResponse),
    }

    let _ = imu_tx
        .write(&bno055::encode_register_write(
            bno055::REG_PWR_MODE,
            bno055::PWR_MODE_NORMAL,
        ))
        .await;
    Timer::after(Duration::from_millis(MODE_SWITCH_WAIT_MS)).await;

    if let Some(profile) = profile {
        // Restore is a stub until the CONFIG-mode burst write exists.
        if bno055::restore_calibration_profile(profile).is_err() {
            defmt::warn!("bno055: stored calibration profile ignored (restore unsupported)");
        }
    }

    let _ = imu_tx
        .write(&bno055::encode_register_write(
            bno055::REG_OPR_MODE,
            bno055::OPR_MODE_NDOF,
        ))
        .await;
    Timer::after(Duration::from_millis(MODE_SWITCH_WAIT_MS)).await;

    Ok(())
}

// ── Task ─────────────────────────────────────────────────────────────────────

/// Secondary IMU task — 10 Hz. First entry brings the module up; when active,
/// every tick requests fresh Euler angles, rotates them onto the board mount
/// and publishes the result. Calibration confidence refreshes every 10th tick.
#[task]
pub async fn secondary_imu_task(
    mut imu_tx: Bno055Tx,
    config: SecondaryImuConfig,
    request_slot: RequestSlotRef,
    reading_rx: ReadingReceiver,
    attitude_tx: AttitudeSender,
) {
    if !config.enabled {
        // Feature switched off; inactive for the rest of the run.
        return;
    }

    match init_module(&mut imu_tx, request_slot, &reading_rx, None).await {
        Ok(()) => defmt::info!("bno055: online, NDOF mode"),
        Err(e) => {
            defmt::warn!("bno055: init failed: {}", e);
            return;
        }
    }

    // The mount offset is fixed, so the matrix is built once.
    let mount_rotation = Mat3::from_euler(
        decidegrees_to_radians(config.roll_decidegrees as f32),
        decidegrees_to_radians(config.pitch_decidegrees as f32),
        decidegrees_to_radians(config.yaw_decidegrees as f32),
    );

    let mut raw = EulerDecidegrees::default();
    let mut calibration = CalibrationStatus::default();
    let mut missed_replies: u32 = 0;
    let mut tick: u8 = 0;

    let mut ticker = Ticker::every(Duration::from_hz(TICK_HZ));
    loop {
        ticker.next().await;

        // ── A. Request fresh Euler angles and wait (bounded) for the reply ──
        if request_euler_angles(&mut imu_tx, request_slot).await {
            let deadline = Instant::now() + Duration::from_millis(REPLY_WAIT_MS);
            loop {
                match select(reading_rx.receive(), Timer::at(deadline)).await {
                    Either::First(Bno055Reading::Euler(angles)) => {
                        raw = angles;
                        break;
                    }
                    Either::First(Bno055Reading::Calibration(scores)) => {
                        // Reply to the previous tick's decimated request.
                        calibration = CalibrationStatus {
                            mag: scores.mag,
                            acc: scores.acc,
                            gyr: scores.gyr,
                            sys: scores.sys,
                        };
                    }
                    Either::First(Bno055Reading::ChipId(_)) => {}
                    Either::Second(()) => {
                        // No reply this tick; the published state goes stale
                        // rather than the loop stalling.
                        missed_replies += 1;
                        break;
                    }
                }
            }
        } else {
            // The previous request has not completed yet. Once it ages past
            // the staleness bound the slot accepts a replacement, so a dead
            // link costs a few stale ticks, never the loop.
            missed_replies += 1;
        }

        // ── B. Rotate the sensor frame onto the board mount, wrap yaw ───────
        let rotated = mount_rotation.rotate(Vec3 {
            x: raw.roll,
            y: raw.pitch,
            z: raw.yaw,
        });
        let yaw_dd = wrap_yaw_decidegrees(rotated.z + config.yaw_decidegrees as f32);

        // ── C. Publish ───────────────────────────────────────────────────────
        let state = SecondaryAttitude {
            roll_dd: rotated.x as i16,
            pitch_dd: rotated.y as i16,
            yaw_dd,
            calibration,
            active: true,
        };
        let _ = attitude_tx.try_send(state);

        // ── D. Decimated calibration confidence refresh ──────────────────────
        tick = tick.wrapping_add(1);
        if tick >= CALIB_DECIMATION {
            tick = 0;
            request_calibration_status(&mut imu_tx, request_slot).await;
        }

        if missed_replies != 0 && missed_replies % 50 == 0 {
            defmt::debug!("bno055: {=u32} ticks without a reply so far", missed_replies);
        }
    }
}
