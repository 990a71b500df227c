use embassy_executor::task;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{Duration, Ticker};

use crate::state::SecondaryAttitude;

/// Telemetry task — 10 Hz.
/// Mirrors the published secondary attitude to the debug channel: the three
/// rotated angles plus the magnetometer/gyro/accelerometer calibration scores.
#[task]
pub async fn telemetry_task(
    attitude_rx: Receiver<'static, CriticalSectionRawMutex, SecondaryAttitude, 1>,
) {
    // Local cached data
    let mut attitude = SecondaryAttitude::default();

    let mut ticker = Ticker::every(Duration::from_hz(10));

    loop {
        ticker.next().await;

        // Refresh from the channel (non-blocking)
        if let Ok(a) = attitude_rx.try_receive() {
            attitude = a;
        }
        if !attitude.active {
            continue;
        }

        defmt::debug!(
            "imu2 roll={=i16} pitch={=i16} yaw={=i16} | cal mag={=u8} gyr={=u8} acc={=u8}",
            attitude.roll_dd,
            attitude.pitch_dd,
            attitude.yaw_dd,
            attitude.calibration.mag,
            attitude.calibration.gyr,
            attitude.calibration.acc,
        );
    }
}
