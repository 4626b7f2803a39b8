//! Interface to the rigid-body engine that actually runs the simulation.

use crate::math::Transform;
use crate::model::Shape;
use glam::Vec3;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BodyHandle(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConstraintHandle(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub struct RigidBodyDesc {
    pub shape: Shape,
    /// Zero for kinematic bodies.
    pub mass: f32,
    pub local_inertia: Vec3,
    pub transform: Transform,
    pub friction: f32,
    pub restitution: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Single collision-group bit.
    pub group: u16,
    pub mask: u16,
    /// Moved by the caller, never by the solver. Such bodies must not sleep.
    pub kinematic: bool,
}

/// Six-degree-of-freedom spring joint between two bodies.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintDesc {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// Joint frame in body A's local space.
    pub frame_a: Transform,
    pub frame_b: Transform,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    /// Spring stiffness per axis: 0..3 linear, 3..6 angular. `None` leaves the
    /// spring disabled.
    pub springs: [Option<f32>; 6],
}

/// Minimal rigid-body world surface the bridge drives.
pub trait PhysicsWorld {
    fn gravity(&self) -> Vec3;

    fn set_gravity(&mut self, gravity: Vec3);

    fn add_rigid_body(&mut self, desc: &RigidBodyDesc) -> BodyHandle;

    fn add_constraint(&mut self, desc: &ConstraintDesc) -> ConstraintHandle;

    /// Advances by `time_step` seconds in at most `max_sub_steps` fixed steps of
    /// `fixed_time_step`.
    fn step_simulation(&mut self, time_step: f32, max_sub_steps: u32, fixed_time_step: f32);

    fn world_transform(&self, body: BodyHandle) -> Transform;

    fn set_world_transform(&mut self, body: BodyHandle, transform: Transform);
}

impl Shape {
    /// Principal moments of inertia about the centre of mass.
    pub fn local_inertia(&self, mass: f32) -> Vec3 {
        let boxed = |half: Vec3| {
            let l = half * 2.0;
            let (x2, y2, z2) = (l.x * l.x, l.y * l.y, l.z * l.z);
            Vec3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 12.0)
        };
        match *self {
            Shape::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
            Shape::Box { half_extents } => boxed(half_extents),
            // Bounding-box approximation around the Y-aligned capsule.
            Shape::Capsule { radius, height } => {
                boxed(Vec3::new(radius, radius + height * 0.5, radius))
            }
        }
    }
}
