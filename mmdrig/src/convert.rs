//! Left-handed to right-handed conversion.
//!
//! Both entry points check the document's coordinate-system tag and do nothing
//! once it reads right-handed, so converting twice is the same as converting once.

use crate::model::{CoordinateSystem, Document, MorphData};
use crate::vmd::MotionDocument;
use glam::{Quat, Vec3};

fn flip_vector(v: &mut Vec3) {
    v.z = -v.z;
}

fn flip_quaternion(q: &mut Quat) {
    q.x = -q.x;
    q.y = -q.y;
}

fn flip_euler(r: &mut Vec3) {
    r.x = -r.x;
    r.y = -r.y;
}

/// Mirrors a `[lower, upper]` translation range along Z, keeping `lower <= upper`.
fn flip_vector_range(lower: &mut Vec3, upper: &mut Vec3) {
    let tmp = -upper.z;
    upper.z = -lower.z;
    lower.z = tmp;
}

fn flip_euler_range(lower: &mut Vec3, upper: &mut Vec3) {
    let (tx, ty) = (-upper.x, -upper.y);
    upper.x = -lower.x;
    upper.y = -lower.y;
    lower.x = tx;
    lower.y = ty;
}

/// Converts a model to the right-handed system in place.
///
/// PMX morphs other than vertex morphs are left untouched.
pub fn convert_model(doc: &mut Document) {
    if doc.header.coordinate_system == CoordinateSystem::RightHanded {
        return;
    }
    doc.header.coordinate_system = CoordinateSystem::RightHanded;
    let format = doc.format();

    for v in &mut doc.vertices {
        flip_vector(&mut v.position);
        flip_vector(&mut v.normal);
    }
    for face in &mut doc.faces {
        face.swap(0, 2);
    }
    for bone in &mut doc.bones {
        flip_vector(&mut bone.position);
    }
    for morph in &mut doc.morphs {
        let MorphData::Vertex(offsets) = &mut morph.data else {
            continue;
        };
        for o in offsets {
            flip_vector(&mut o.displacement);
        }
    }
    for body in &mut doc.rigid_bodies {
        flip_vector(&mut body.position);
        flip_euler(&mut body.rotation);
    }
    for c in &mut doc.constraints {
        flip_vector(&mut c.position);
        flip_euler(&mut c.rotation);
        flip_vector_range(&mut c.linear_lower, &mut c.linear_upper);
        flip_euler_range(&mut c.angular_lower, &mut c.angular_upper);
    }
    log::debug!("converted {format:?} model to right-handed coordinates");
}

/// Converts bone keyframes in place: position Z and quaternion X/Y are negated.
pub fn convert_motion(doc: &mut MotionDocument) {
    if doc.coordinate_system == CoordinateSystem::RightHanded {
        return;
    }
    doc.coordinate_system = CoordinateSystem::RightHanded;
    for key in &mut doc.bone_keys {
        flip_vector(&mut key.position);
        flip_quaternion(&mut key.rotation);
    }
}
