/// Shared state types for inter-task communication via Embassy channels.
///
/// All types are `Copy` to minimise overhead when sent through channels.

// ── Data types ────────────────────────────────────────────────────────────────

/// Per-sensor calibration confidence, 0 (uncalibrated) to 3 (fully calibrated).
#[derive(Clone, Copy, Default, defmt::Format)]
pub struct CalibrationStatus {
    pub mag: u8,
    pub acc: u8,
    pub gyr: u8,
    pub sys: u8,
}

/// Published secondary attitude (written only by secondary_imu_task).
/// Consumers such as the telemetry task, OSD heading or failsafe logic read
/// the latest value from the channel; a torn read cannot happen because the
/// whole struct travels as one message.
#[derive(Clone, Copy, Default, defmt::Format)]
pub struct SecondaryAttitude {
    /// Board-frame angles in tenths of a degree; yaw is wrapped into [0, 3600).
    pub roll_dd: i16,
    pub pitch_dd: i16,
    pub yaw_dd: i16,
    pub calibration: CalibrationStatus,
    /// Set once initialization succeeded; never cleared for the rest of the run.
    pub active: bool,
}

/// Read-only mount/feature configuration. The parameter system lives outside
/// this firmware; values are fixed at build time in main.
#[derive(Clone, Copy, Default)]
pub struct SecondaryImuConfig {
    pub enabled: bool,
    /// Physical mounting offset of the module relative to the airframe.
    pub roll_decidegrees: i16,
    pub pitch_decidegrees: i16,
    pub yaw_decidegrees: i16,
    /// Consumed by the OSD, not by this firmware.
    #[allow(dead_code)]
    pub use_for_osd_heading: bool,
    #[allow(dead_code)]
    pub use_for_osd_ahi: bool,
}
