//! Rigid transforms and the scratch arena used by the physics bridge.
//!
//! Rotation products go through explicit 3x3 matrices and come back through
//! [`mat3_to_quat`], matching how a Bullet-style engine stores transform bases.

use glam::{Mat3, Quat, Vec3};

/// Rotation plus translation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub rotation: Quat,
    pub origin: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        origin: Vec3::ZERO,
    };

    pub fn new(rotation: Quat, origin: Vec3) -> Self {
        Self { rotation, origin }
    }

    pub fn from_origin(origin: Vec3) -> Self {
        Self {
            rotation: Quat::IDENTITY,
            origin,
        }
    }

    /// Basis from Euler angles applied as `Rz * Ry * Rx`.
    pub fn from_euler_zyx(euler: Vec3, origin: Vec3) -> Self {
        Self {
            rotation: Quat::from_euler(glam::EulerRot::ZYX, euler.z, euler.y, euler.x),
            origin,
        }
    }

    pub fn basis(&self) -> Mat3 {
        quat_to_mat3(self.rotation)
    }

    /// `self * other`: rotation `R1 R2`, origin `R1 t2 + t1`.
    pub fn compose(&self, other: &Self) -> Self {
        let m1 = self.basis();
        let m2 = other.basis();
        Self {
            rotation: mat3_to_quat(m1 * m2),
            origin: m1 * other.origin + self.origin,
        }
    }

    /// Rotation `Rᵀ`, origin `-Rᵀ t`.
    pub fn inverse(&self) -> Self {
        let m = self.basis().transpose();
        Self {
            rotation: mat3_to_quat(m),
            origin: m * -self.origin,
        }
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.basis() * p + self.origin
    }
}

pub fn quat_to_mat3(q: Quat) -> Mat3 {
    let (x, y, z, w) = (q.x, q.y, q.z, q.w);
    let (xx, yy, zz) = (x * x, y * y, z * z);
    let (xy, yz, zx) = (x * y, y * z, z * x);
    let (xw, yw, zw) = (x * w, y * w, z * w);
    Mat3::from_cols(
        Vec3::new(1.0 - 2.0 * (yy + zz), 2.0 * (xy + zw), 2.0 * (zx - yw)),
        Vec3::new(2.0 * (xy - zw), 1.0 - 2.0 * (zz + xx), 2.0 * (yz + xw)),
        Vec3::new(2.0 * (zx + yw), 2.0 * (yz - xw), 1.0 - 2.0 * (xx + yy)),
    )
}

/// Which pivot [`mat3_to_quat`] extracts the quaternion around.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum QuatBranch {
    Trace,
    X,
    Y,
    Z,
}

/// Row-major view `[m00, m01, m02, m10, ..., m22]`.
fn rows(m: &Mat3) -> [f32; 9] {
    m.transpose().to_cols_array()
}

pub fn quat_branch(m: &Mat3) -> QuatBranch {
    let m = rows(m);
    if m[0] + m[4] + m[8] > 0.0 {
        QuatBranch::Trace
    } else if m[0] > m[4] && m[0] > m[8] {
        QuatBranch::X
    } else if m[4] > m[8] {
        QuatBranch::Y
    } else {
        QuatBranch::Z
    }
}

/// Converts a rotation matrix to a quaternion, pivoting on the largest of the
/// trace and the three diagonal entries.
pub fn mat3_to_quat(m: Mat3) -> Quat {
    let branch = quat_branch(&m);
    let m = rows(&m);
    match branch {
        QuatBranch::Trace => {
            let s = (m[0] + m[4] + m[8] + 1.0).sqrt() * 2.0;
            Quat::from_xyzw(
                (m[7] - m[5]) / s,
                (m[2] - m[6]) / s,
                (m[3] - m[1]) / s,
                0.25 * s,
            )
        }
        QuatBranch::X => {
            let s = (1.0 + m[0] - m[4] - m[8]).sqrt() * 2.0;
            Quat::from_xyzw(
                0.25 * s,
                (m[1] + m[3]) / s,
                (m[2] + m[6]) / s,
                (m[7] - m[5]) / s,
            )
        }
        QuatBranch::Y => {
            let s = (1.0 + m[4] - m[0] - m[8]).sqrt() * 2.0;
            Quat::from_xyzw(
                (m[1] + m[3]) / s,
                0.25 * s,
                (m[5] + m[7]) / s,
                (m[2] - m[6]) / s,
            )
        }
        QuatBranch::Z => {
            let s = (1.0 + m[8] - m[0] - m[4]).sqrt() * 2.0;
            Quat::from_xyzw(
                (m[2] + m[6]) / s,
                (m[5] + m[7]) / s,
                0.25 * s,
                (m[3] - m[1]) / s,
            )
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransformHandle(usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QuatHandle(usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VecHandle(usize);

#[derive(Clone, Debug, Default)]
struct Pool<T> {
    slots: Vec<T>,
    free: Vec<usize>,
}

impl<T: Copy + Default> Pool<T> {
    fn acquire(&mut self) -> usize {
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = T::default();
                i
            }
            None => {
                self.slots.push(T::default());
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, i: usize) {
        debug_assert!(i < self.slots.len(), "scratch handle {i} was never acquired");
        debug_assert!(!self.free.contains(&i), "scratch handle {i} released twice");
        self.free.push(i);
    }

    fn outstanding(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Reusable scratch storage handed out by handle.
///
/// Values stay allocated across calls; callers release every handle they
/// acquire before returning so [`ScratchArena::outstanding`] drops back to zero.
#[derive(Clone, Debug, Default)]
pub struct ScratchArena {
    transforms: Pool<Transform>,
    quats: Pool<Quat>,
    vectors: Pool<Vec3>,
}

impl ScratchArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_transform(&mut self) -> TransformHandle {
        TransformHandle(self.transforms.acquire())
    }

    pub fn release_transform(&mut self, h: TransformHandle) {
        self.transforms.release(h.0);
    }

    pub fn acquire_quat(&mut self) -> QuatHandle {
        QuatHandle(self.quats.acquire())
    }

    pub fn release_quat(&mut self, h: QuatHandle) {
        self.quats.release(h.0);
    }

    pub fn acquire_vec(&mut self) -> VecHandle {
        VecHandle(self.vectors.acquire())
    }

    pub fn release_vec(&mut self, h: VecHandle) {
        self.vectors.release(h.0);
    }

    pub fn transform(&self, h: TransformHandle) -> &Transform {
        &self.transforms.slots[h.0]
    }

    pub fn transform_mut(&mut self, h: TransformHandle) -> &mut Transform {
        &mut self.transforms.slots[h.0]
    }

    pub fn quat(&self, h: QuatHandle) -> Quat {
        self.quats.slots[h.0]
    }

    pub fn quat_mut(&mut self, h: QuatHandle) -> &mut Quat {
        &mut self.quats.slots[h.0]
    }

    pub fn vec(&self, h: VecHandle) -> Vec3 {
        self.vectors.slots[h.0]
    }

    pub fn vec_mut(&mut self, h: VecHandle) -> &mut Vec3 {
        &mut self.vectors.slots[h.0]
    }

    /// Acquires a transform holding `a * b`.
    pub fn compose(&mut self, a: TransformHandle, b: TransformHandle) -> TransformHandle {
        let value = self.transform(a).compose(self.transform(b));
        let out = self.acquire_transform();
        *self.transform_mut(out) = value;
        out
    }

    /// Acquires a transform holding the inverse of `t`.
    pub fn invert(&mut self, t: TransformHandle) -> TransformHandle {
        let value = self.transform(t).inverse();
        let out = self.acquire_transform();
        *self.transform_mut(out) = value;
        out
    }

    /// Scratch values acquired and not yet released, across all kinds.
    pub fn outstanding(&self) -> usize {
        self.transforms.outstanding() + self.quats.outstanding() + self.vectors.outstanding()
    }
}
