//! Small fixed-point-free rotation helpers for the board-mount correction.

use micromath::F32Ext;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Row-major 3x3 rotation matrix built from intrinsic roll/pitch/yaw angles.
pub struct Mat3 {
    m: [[f32; 3]; 3],
}

impl Mat3 {
    pub fn from_euler(roll_rad: f32, pitch_rad: f32, yaw_rad: f32) -> Self {
        let (sx, cx) = (roll_rad.sin(), roll_rad.cos());
        let (sy, cy) = (pitch_rad.sin(), pitch_rad.cos());
        let (sz, cz) = (yaw_rad.sin(), yaw_rad.cos());

        Self {
            m: [
                [cz * cy, -cy * sz, sy],
                [sz * cx + cz * sx * sy, cz * cx - sz * sx * sy, -sx * cy],
                [sz * sx - cz * cx * sy, cz * sx + sz * cx * sy, cy * cx],
            ],
        }
    }

    /// Apply the inverse rotation (transpose multiply), mapping a vector from
    /// the mount frame back into the body frame.
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        Vec3 {
            x: self.m[0][0] * v.x + self.m[1][0] * v.y + self.m[2][0] * v.z,
            y: self.m[0][1] * v.x + self.m[1][1] * v.y + self.m[2][1] * v.z,
            z: self.m[0][2] * v.x + self.m[1][2] * v.y + self.m[2][2] * v.z,
        }
    }
}

pub fn decidegrees_to_radians(dd: f32) -> f32 {
    dd * (core::f32::consts::PI / 1800.0)
}

/// Wrap a yaw angle in tenths of a degree into [0, 3600).
pub fn wrap_yaw_decidegrees(yaw_dd: f32) -> i16 {
    (yaw_dd as i32).rem_euclid(3600) as i16
}
