use glam::Vec3;

/// Stepping parameters for [`PhysicsBridge`](super::PhysicsBridge).
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    /// Reference step length in seconds.
    pub reference_step: f32,
    /// Reference steps in one update at which stepping turns coarse.
    pub spike_threshold: u32,
    /// Sub-steps taken by a coarse update, each `spike_sub_steps` reference steps long.
    pub spike_sub_steps: u32,
    /// Delta passed to each update during warm-up.
    pub warmup_delta: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -100.0, 0.0),
            reference_step: 1.0 / 60.0,
            spike_threshold: 3,
            spike_sub_steps: 2,
            warmup_delta: 1.0 / 60.0,
        }
    }
}
