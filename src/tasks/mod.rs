pub mod bno055_rx;
pub mod secondary_imu;
pub mod telemetry_task;
