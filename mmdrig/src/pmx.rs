//! `.pmx` (2.0 / 2.1) model decoder and encoder.
//!
//! The header declares the text encoding, the number of additional UV channels and
//! the byte width of every index family; all later reads are parameterized by those
//! globals. Vertex indices are unsigned at widths 1 and 2, every other index family
//! is signed with `-1` meaning "none".

use crate::model::{
    AngleLimit, BodyKind, Bone, BoneExt, BoneOffset, BoneTail, Constraint, CoordinateSystem,
    Display, DisplayElement, DisplayFrame, Document, FormatInfo, GroupOffset, Header, IkChain,
    IkLink, ImpulseOffset, InheritTransform, LocalAxes, Material, MaterialExt, MaterialOffset,
    Morph, MorphData, PmxBone, PmxGlobals, RigidBody, ShapeKind, Skin, Toon, UvOffset, Vertex,
    VertexEdge, VertexOffset,
};
use crate::reader::{ByteReader, IndexWidth, optional_index, required_index};
use crate::text::{Text, TextEncoding};
use crate::writer::{ByteWriter, index_value};
use crate::Error;
use glam::Quat;

pub(crate) const MAGIC: &[u8; 4] = b"PMX ";

const GLOBALS_LEN: u8 = 8;
const MAX_ADDITIONAL_UVS: u8 = 4;

const SKIN_BDEF1: u8 = 0;
const SKIN_BDEF2: u8 = 1;
const SKIN_BDEF4: u8 = 2;
const SKIN_SDEF: u8 = 3;
const SKIN_QDEF: u8 = 4;

const MORPH_GROUP: u8 = 0;
const MORPH_VERTEX: u8 = 1;
const MORPH_BONE: u8 = 2;
const MORPH_UV: u8 = 3;
const MORPH_UV4: u8 = 7;
const MORPH_MATERIAL: u8 = 8;
const MORPH_FLIP: u8 = 9;
const MORPH_IMPULSE: u8 = 10;

const TOON_TEXTURE: u8 = 0;
const TOON_SHARED: u8 = 1;

const FRAME_BONE: u8 = 0;
const FRAME_MORPH: u8 = 1;

fn supported_version(version: f32) -> bool {
    version == 2.0 || version == 2.1
}

struct Decoder<'a> {
    r: ByteReader<'a>,
    globals: PmxGlobals,
}

impl Decoder<'_> {
    fn text(&mut self) -> Result<Text, Error> {
        self.r.read_prefixed_text(self.globals.encoding)
    }

    fn vertex(&mut self, field: &'static str) -> Result<usize, Error> {
        let raw = self.r.read_unsigned_index(self.globals.vertex_index)?;
        required_index(raw, field)
    }

    fn bone(&mut self, field: &'static str) -> Result<Option<usize>, Error> {
        let raw = self.r.read_index(self.globals.bone_index)?;
        optional_index(raw, field)
    }

    fn required_bone(&mut self, field: &'static str) -> Result<usize, Error> {
        let raw = self.r.read_index(self.globals.bone_index)?;
        required_index(raw, field)
    }

    fn texture(&mut self, field: &'static str) -> Result<Option<usize>, Error> {
        let raw = self.r.read_index(self.globals.texture_index)?;
        optional_index(raw, field)
    }

    fn morph(&mut self, field: &'static str) -> Result<usize, Error> {
        let raw = self.r.read_index(self.globals.morph_index)?;
        required_index(raw, field)
    }

    fn rigid_body(&mut self, field: &'static str) -> Result<usize, Error> {
        let raw = self.r.read_index(self.globals.rigid_body_index)?;
        required_index(raw, field)
    }

    fn count(&mut self, what: &str) -> Result<usize, Error> {
        let offset = self.r.offset();
        let raw = self.r.read_i32()?;
        usize::try_from(raw).map_err(|_| {
            Error::unsupported(format!("negative {what} count {raw} at offset {offset}"))
        })
    }

    fn vertices(&mut self) -> Result<Vec<Vertex>, Error> {
        let extra = self.globals.additional_uv_count as usize;
        let count = self.r.read_count(37 + extra * 16)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let position = self.r.read_vec3()?;
            let normal = self.r.read_vec3()?;
            let uv = self.r.read_vec2()?;
            let mut additional_uvs = Vec::with_capacity(extra);
            for _ in 0..extra {
                additional_uvs.push(self.r.read_vec4()?);
            }
            let skin = self.skin()?;
            let edge = VertexEdge::Scale(self.r.read_f32()?);
            out.push(Vertex {
                position,
                normal,
                uv,
                additional_uvs,
                skin,
                edge,
            });
        }
        Ok(out)
    }

    fn skin(&mut self) -> Result<Skin, Error> {
        let kind = self.r.read_u8()?;
        Ok(match kind {
            SKIN_BDEF1 => Skin::Bdef1 {
                bone: self.bone("skin bone")?,
            },
            SKIN_BDEF2 => Skin::Bdef2 {
                bones: [self.bone("skin bone")?, self.bone("skin bone")?],
                weight: self.r.read_f32()?,
            },
            SKIN_BDEF4 | SKIN_QDEF => {
                let bones = [
                    self.bone("skin bone")?,
                    self.bone("skin bone")?,
                    self.bone("skin bone")?,
                    self.bone("skin bone")?,
                ];
                let weights = self.r.read_f32_array::<4>()?;
                if kind == SKIN_BDEF4 {
                    Skin::Bdef4 { bones, weights }
                } else {
                    Skin::Qdef { bones, weights }
                }
            }
            SKIN_SDEF => Skin::Sdef {
                bones: [self.bone("skin bone")?, self.bone("skin bone")?],
                weight: self.r.read_f32()?,
                c: self.r.read_vec3()?,
                r0: self.r.read_vec3()?,
                r1: self.r.read_vec3()?,
            },
            other => return Err(Error::unsupported(format!("skin type {other}"))),
        })
    }

    fn faces(&mut self) -> Result<Vec<[usize; 3]>, Error> {
        let index_count = self.r.read_count(self.globals.vertex_index.bytes())?;
        if index_count % 3 != 0 {
            return Err(Error::unsupported(format!(
                "face index count {index_count} is not a multiple of 3"
            )));
        }
        let mut out = Vec::with_capacity(index_count / 3);
        for _ in 0..index_count / 3 {
            out.push([
                self.vertex("face vertex")?,
                self.vertex("face vertex")?,
                self.vertex("face vertex")?,
            ]);
        }
        Ok(out)
    }

    fn textures(&mut self) -> Result<Vec<Text>, Error> {
        let count = self.r.read_count(4)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.text()?);
        }
        Ok(out)
    }

    fn materials(&mut self) -> Result<Vec<Material>, Error> {
        let count = self.r.read_count(8)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.text()?;
            let english_name = self.text()?;
            let diffuse = self.r.read_vec4()?;
            let specular = self.r.read_vec3()?;
            let shininess = self.r.read_f32()?;
            let ambient = self.r.read_vec3()?;
            let flags = self.r.read_u8()?;
            let edge_color = self.r.read_vec4()?;
            let edge_size = self.r.read_f32()?;
            let texture = self.texture("material texture")?;
            let sphere_texture = self.texture("material sphere texture")?;
            let sphere_mode = self.r.read_u8()?;
            let toon = match self.r.read_u8()? {
                TOON_TEXTURE => Toon::Texture(self.texture("material toon texture")?),
                TOON_SHARED => Toon::Shared(self.r.read_u8()?),
                other => return Err(Error::unsupported(format!("toon flag {other}"))),
            };
            let comment = self.text()?;
            let index_count = self.r.read_u32()?;
            out.push(Material {
                diffuse,
                specular,
                shininess,
                ambient,
                index_count,
                ext: MaterialExt::Pmx {
                    name,
                    english_name,
                    flags,
                    edge_color,
                    edge_size,
                    texture,
                    sphere_texture,
                    sphere_mode,
                    toon,
                    comment,
                },
            });
        }
        Ok(out)
    }

    fn bones(&mut self) -> Result<Vec<Bone>, Error> {
        let count = self.r.read_count(8)?;
        let mut out = Vec::with_capacity(count);
        for index in 0..count {
            let name = self.text()?;
            let english_name = self.text()?;
            let position = self.r.read_vec3()?;
            let parent = self.bone("bone parent")?;
            let deform_layer = self.r.read_i32()?;
            let flags = self.r.read_u16()?;
            let has = |flag: u16| flags & flag != 0;

            let tail = if has(PmxBone::CONNECTED) {
                BoneTail::Connect(self.bone("bone tail")?)
            } else {
                BoneTail::Offset(self.r.read_vec3()?)
            };
            let inherit = if has(PmxBone::INHERIT_ROTATION) || has(PmxBone::INHERIT_TRANSLATION) {
                Some(InheritTransform {
                    parent: self.bone("bone inherit parent")?,
                    ratio: self.r.read_f32()?,
                })
            } else {
                None
            };
            let fixed_axis = if has(PmxBone::FIXED_AXIS) {
                Some(self.r.read_vec3()?)
            } else {
                None
            };
            let local_axes = if has(PmxBone::LOCAL_AXES) {
                Some(LocalAxes {
                    x: self.r.read_vec3()?,
                    z: self.r.read_vec3()?,
                })
            } else {
                None
            };
            let external_key = if has(PmxBone::EXTERNAL_PARENT) {
                Some(self.r.read_i32()?)
            } else {
                None
            };
            let ik = if has(PmxBone::IK) {
                Some(self.ik(index)?)
            } else {
                None
            };
            log::trace!("bone {index} {:?} flags {flags:#06x}", name.as_str());
            out.push(Bone {
                name,
                english_name: Some(english_name),
                position,
                parent,
                ext: BoneExt::Pmx(PmxBone {
                    deform_layer,
                    flags,
                    tail,
                    inherit,
                    fixed_axis,
                    local_axes,
                    external_key,
                    ik,
                }),
            });
        }
        Ok(out)
    }

    fn ik(&mut self, owner: usize) -> Result<IkChain, Error> {
        let effector = self.required_bone("IK effector")?;
        let iterations = self.r.read_i32()? as u32;
        let max_angle = self.r.read_f32()?;
        let link_count = self.count("IK link")?;
        let mut links = Vec::with_capacity(link_count.min(self.r.remaining()));
        for _ in 0..link_count {
            let bone = self.required_bone("IK link")?;
            let limit = match self.r.read_u8()? {
                0 => None,
                1 => Some(AngleLimit {
                    lower: self.r.read_vec3()?,
                    upper: self.r.read_vec3()?,
                }),
                other => return Err(Error::unsupported(format!("IK limit flag {other}"))),
            };
            links.push(IkLink { bone, limit });
        }
        Ok(IkChain {
            target: owner,
            effector,
            iterations,
            max_angle,
            links,
        })
    }

    fn morphs(&mut self) -> Result<Vec<Morph>, Error> {
        let count = self.r.read_count(14)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.text()?;
            let english_name = self.text()?;
            let panel = self.r.read_u8()?;
            let kind = self.r.read_u8()?;
            let n = self.count("morph element")?;
            let cap = n.min(self.r.remaining());
            let data = match kind {
                MORPH_GROUP | MORPH_FLIP => {
                    let mut v = Vec::with_capacity(cap);
                    for _ in 0..n {
                        v.push(GroupOffset {
                            morph: self.morph("group morph element")?,
                            ratio: self.r.read_f32()?,
                        });
                    }
                    if kind == MORPH_GROUP {
                        MorphData::Group(v)
                    } else {
                        MorphData::Flip(v)
                    }
                }
                MORPH_VERTEX => {
                    let mut v = Vec::with_capacity(cap);
                    for _ in 0..n {
                        v.push(VertexOffset {
                            vertex: self.vertex("vertex morph element")?,
                            displacement: self.r.read_vec3()?,
                        });
                    }
                    MorphData::Vertex(v)
                }
                MORPH_BONE => {
                    let mut v = Vec::with_capacity(cap);
                    for _ in 0..n {
                        let bone = self.required_bone("bone morph element")?;
                        let translation = self.r.read_vec3()?;
                        let rotation = Quat::from_array(self.r.read_f32_array::<4>()?);
                        v.push(BoneOffset {
                            bone,
                            translation,
                            rotation,
                        });
                    }
                    MorphData::Bone(v)
                }
                MORPH_UV..=MORPH_UV4 => {
                    let mut offsets = Vec::with_capacity(cap);
                    for _ in 0..n {
                        offsets.push(UvOffset {
                            vertex: self.vertex("uv morph element")?,
                            offset: self.r.read_vec4()?,
                        });
                    }
                    MorphData::Uv {
                        channel: kind - MORPH_UV,
                        offsets,
                    }
                }
                MORPH_MATERIAL => {
                    let mut v = Vec::with_capacity(cap);
                    for _ in 0..n {
                        let raw = self.r.read_index(self.globals.material_index)?;
                        v.push(MaterialOffset {
                            material: optional_index(raw, "material morph element")?,
                            operation: self.r.read_u8()?,
                            diffuse: self.r.read_vec4()?,
                            specular: self.r.read_vec3()?,
                            shininess: self.r.read_f32()?,
                            ambient: self.r.read_vec3()?,
                            edge_color: self.r.read_vec4()?,
                            edge_size: self.r.read_f32()?,
                            texture_tint: self.r.read_vec4()?,
                            sphere_tint: self.r.read_vec4()?,
                            toon_tint: self.r.read_vec4()?,
                        });
                    }
                    MorphData::Material(v)
                }
                MORPH_IMPULSE => {
                    let mut v = Vec::with_capacity(cap);
                    for _ in 0..n {
                        v.push(ImpulseOffset {
                            rigid_body: self.rigid_body("impulse morph element")?,
                            local: self.r.read_u8()?,
                            velocity: self.r.read_vec3()?,
                            torque: self.r.read_vec3()?,
                        });
                    }
                    MorphData::Impulse(v)
                }
                other => return Err(Error::unsupported(format!("morph type {other}"))),
            };
            out.push(Morph {
                name,
                english_name: Some(english_name),
                panel,
                data,
            });
        }
        Ok(out)
    }

    fn frames(&mut self) -> Result<Vec<DisplayFrame>, Error> {
        let count = self.r.read_count(13)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.text()?;
            let english_name = self.text()?;
            let special = self.r.read_u8()?;
            let n = self.count("display element")?;
            let mut elements = Vec::with_capacity(n.min(self.r.remaining()));
            for _ in 0..n {
                elements.push(match self.r.read_u8()? {
                    FRAME_BONE => DisplayElement::Bone(self.required_bone("display bone")?),
                    FRAME_MORPH => DisplayElement::Morph(self.morph("display morph")?),
                    other => {
                        return Err(Error::unsupported(format!("display element type {other}")));
                    }
                });
            }
            out.push(DisplayFrame {
                name,
                english_name,
                special,
                elements,
            });
        }
        Ok(out)
    }

    fn rigid_bodies(&mut self) -> Result<Vec<RigidBody>, Error> {
        let count = self.r.read_count(70)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.text()?;
            let english_name = self.text()?;
            let bone = self.bone("rigid body bone")?;
            let group = self.r.read_u8()?;
            let mask = self.r.read_u16()?;
            let shape_byte = self.r.read_u8()?;
            let shape = ShapeKind::from_byte(shape_byte)
                .ok_or_else(|| Error::unsupported(format!("rigid body shape {shape_byte}")))?;
            let size = self.r.read_vec3()?;
            let position = self.r.read_vec3()?;
            let rotation = self.r.read_vec3()?;
            let mass = self.r.read_f32()?;
            let linear_damping = self.r.read_f32()?;
            let angular_damping = self.r.read_f32()?;
            let restitution = self.r.read_f32()?;
            let friction = self.r.read_f32()?;
            let kind_byte = self.r.read_u8()?;
            let kind = BodyKind::from_byte(kind_byte)
                .ok_or_else(|| Error::unsupported(format!("rigid body type {kind_byte}")))?;
            out.push(RigidBody {
                name,
                english_name: Some(english_name),
                bone,
                group,
                mask,
                shape,
                size,
                position,
                rotation,
                mass,
                linear_damping,
                angular_damping,
                restitution,
                friction,
                kind,
            });
        }
        Ok(out)
    }

    fn constraints(&mut self) -> Result<Vec<Constraint>, Error> {
        let count = self.r.read_count(105)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.text()?;
            let english_name = self.text()?;
            let kind = self.r.read_u8()?;
            let a = self.rigid_body("joint body")?;
            let b = self.rigid_body("joint body")?;
            out.push(Constraint {
                name,
                english_name: Some(english_name),
                kind,
                bodies: [a, b],
                position: self.r.read_vec3()?,
                rotation: self.r.read_vec3()?,
                linear_lower: self.r.read_vec3()?,
                linear_upper: self.r.read_vec3()?,
                angular_lower: self.r.read_vec3()?,
                angular_upper: self.r.read_vec3()?,
                linear_spring: self.r.read_vec3()?,
                angular_spring: self.r.read_vec3()?,
            });
        }
        Ok(out)
    }
}

fn read_globals(r: &mut ByteReader<'_>) -> Result<PmxGlobals, Error> {
    let len = r.read_u8()?;
    if len < GLOBALS_LEN {
        return Err(Error::unsupported(format!("PMX header declares {len} globals")));
    }
    let encoding = TextEncoding::from_pmx_byte(r.read_u8()?)?;
    let additional_uv_count = r.read_u8()?;
    if additional_uv_count > MAX_ADDITIONAL_UVS {
        return Err(Error::unsupported(format!(
            "{additional_uv_count} additional UV channels"
        )));
    }
    let vertex_index = IndexWidth::from_byte(r.read_u8()?)?;
    let texture_index = IndexWidth::from_byte(r.read_u8()?)?;
    let material_index = IndexWidth::from_byte(r.read_u8()?)?;
    let bone_index = IndexWidth::from_byte(r.read_u8()?)?;
    let morph_index = IndexWidth::from_byte(r.read_u8()?)?;
    let rigid_body_index = IndexWidth::from_byte(r.read_u8()?)?;
    let extra = r.take((len - GLOBALS_LEN) as usize)?.to_vec();
    if !extra.is_empty() {
        log::warn!("PMX header carries {} undocumented globals", extra.len());
    }
    Ok(PmxGlobals {
        encoding,
        additional_uv_count,
        vertex_index,
        texture_index,
        material_index,
        bone_index,
        morph_index,
        rigid_body_index,
        extra,
    })
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Document, Error> {
    let mut r = ByteReader::new(bytes);
    let magic = r.read_byte_array::<4>()?;
    if &magic != MAGIC {
        return Err(Error::unsupported(format!("bad PMX magic {magic:02x?}")));
    }
    let version = r.read_f32()?;
    if !supported_version(version) {
        return Err(Error::unsupported(format!("PMX version {version}")));
    }
    let globals = read_globals(&mut r)?;
    log::debug!("PMX {version}: {globals:?}");

    let mut d = Decoder { r, globals };
    let name = d.text()?;
    let english_name = d.text()?;
    let comment = d.text()?;
    let english_comment = d.text()?;

    let vertices = d.vertices()?;
    let faces = d.faces()?;
    let textures = d.textures()?;
    let materials = d.materials()?;
    let bones = d.bones()?;
    let morphs = d.morphs()?;
    let frames = d.frames()?;
    let rigid_bodies = d.rigid_bodies()?;
    let constraints = d.constraints()?;

    let trailing = d.r.take_rest().to_vec();
    if !trailing.is_empty() {
        if version == 2.1 {
            log::debug!("keeping {} bytes of PMX 2.1 soft body data", trailing.len());
        } else {
            log::warn!("{} unknown bytes after the PMX joints", trailing.len());
        }
    }

    log::debug!(
        "PMX sections: {} vertices, {} faces, {} textures, {} materials, {} bones, {} morphs, {} frames, {} bodies, {} joints",
        vertices.len(),
        faces.len(),
        textures.len(),
        materials.len(),
        bones.len(),
        morphs.len(),
        frames.len(),
        rigid_bodies.len(),
        constraints.len()
    );

    Ok(Document {
        header: Header {
            format: FormatInfo::Pmx(d.globals),
            version,
            coordinate_system: CoordinateSystem::LeftHanded,
            name,
            english_name: Some(english_name),
            comment,
            english_comment: Some(english_comment),
        },
        vertices,
        faces,
        textures,
        materials,
        bones,
        iks: Vec::new(),
        morphs,
        display: Display::Pmx(frames),
        rigid_bodies,
        constraints,
        trailing,
    })
}

struct Encoder<'a> {
    w: ByteWriter,
    globals: &'a PmxGlobals,
}

impl Encoder<'_> {
    fn text(&mut self, text: &Text) -> Result<(), Error> {
        self.w.write_prefixed_text(text)
    }

    fn optional_text(&mut self, text: Option<&Text>) -> Result<(), Error> {
        match text {
            Some(text) => self.text(text),
            None => self.w.write_count(0),
        }
    }

    fn count(&mut self, count: usize) -> Result<(), Error> {
        let v = i32::try_from(count)
            .map_err(|_| Error::invalid(format!("count {count} does not fit in i32")))?;
        self.w.write_i32(v);
        Ok(())
    }

    fn vertex(&mut self, index: usize) -> Result<(), Error> {
        self.w
            .write_unsigned_index(self.globals.vertex_index, index as i64)
    }

    fn bone(&mut self, index: Option<usize>) -> Result<(), Error> {
        self.w
            .write_index(self.globals.bone_index, index_value(index))
    }

    fn texture(&mut self, index: Option<usize>) -> Result<(), Error> {
        self.w
            .write_index(self.globals.texture_index, index_value(index))
    }

    fn morph(&mut self, index: usize) -> Result<(), Error> {
        self.w.write_index(self.globals.morph_index, index as i64)
    }

    fn rigid_body(&mut self, index: usize) -> Result<(), Error> {
        self.w
            .write_index(self.globals.rigid_body_index, index as i64)
    }

    fn vertex_record(&mut self, v: &Vertex) -> Result<(), Error> {
        if v.additional_uvs.len() != self.globals.additional_uv_count as usize {
            return Err(Error::invalid(format!(
                "vertex has {} additional UVs, header declares {}",
                v.additional_uvs.len(),
                self.globals.additional_uv_count
            )));
        }
        self.w.write_vec3(v.position);
        self.w.write_vec3(v.normal);
        self.w.write_vec2(v.uv);
        for &uv in &v.additional_uvs {
            self.w.write_vec4(uv);
        }
        match v.skin {
            Skin::Bdef1 { bone } => {
                self.w.write_u8(SKIN_BDEF1);
                self.bone(bone)?;
            }
            Skin::Bdef2 { bones, weight } => {
                self.w.write_u8(SKIN_BDEF2);
                for b in bones {
                    self.bone(b)?;
                }
                self.w.write_f32(weight);
            }
            Skin::Bdef4 { bones, weights } | Skin::Qdef { bones, weights } => {
                let tag = if matches!(v.skin, Skin::Bdef4 { .. }) {
                    SKIN_BDEF4
                } else {
                    SKIN_QDEF
                };
                self.w.write_u8(tag);
                for b in bones {
                    self.bone(b)?;
                }
                self.w.write_f32_slice(&weights);
            }
            Skin::Sdef {
                bones,
                weight,
                c,
                r0,
                r1,
            } => {
                self.w.write_u8(SKIN_SDEF);
                for b in bones {
                    self.bone(b)?;
                }
                self.w.write_f32(weight);
                self.w.write_vec3(c);
                self.w.write_vec3(r0);
                self.w.write_vec3(r1);
            }
        }
        let VertexEdge::Scale(edge) = v.edge else {
            return Err(Error::invalid("PMX vertices carry an edge scale"));
        };
        self.w.write_f32(edge);
        Ok(())
    }

    fn material(&mut self, m: &Material) -> Result<(), Error> {
        let MaterialExt::Pmx {
            name,
            english_name,
            flags,
            edge_color,
            edge_size,
            texture,
            sphere_texture,
            sphere_mode,
            toon,
            comment,
        } = &m.ext
        else {
            return Err(Error::invalid("PMX materials need the PMX payload"));
        };
        self.text(name)?;
        self.text(english_name)?;
        self.w.write_vec4(m.diffuse);
        self.w.write_vec3(m.specular);
        self.w.write_f32(m.shininess);
        self.w.write_vec3(m.ambient);
        self.w.write_u8(*flags);
        self.w.write_vec4(*edge_color);
        self.w.write_f32(*edge_size);
        self.texture(*texture)?;
        self.texture(*sphere_texture)?;
        self.w.write_u8(*sphere_mode);
        match *toon {
            Toon::Texture(index) => {
                self.w.write_u8(TOON_TEXTURE);
                self.texture(index)?;
            }
            Toon::Shared(index) => {
                self.w.write_u8(TOON_SHARED);
                self.w.write_u8(index);
            }
        }
        self.text(comment)?;
        self.w.write_u32(m.index_count);
        Ok(())
    }

    fn bone_record(&mut self, bone: &Bone) -> Result<(), Error> {
        let BoneExt::Pmx(pmx) = &bone.ext else {
            return Err(Error::invalid("PMX bones need the PMX payload"));
        };
        let name = bone.name.as_str();
        self.text(&bone.name)?;
        self.optional_text(bone.english_name.as_ref())?;
        self.w.write_vec3(bone.position);
        self.bone(bone.parent)?;
        self.w.write_i32(pmx.deform_layer);
        self.w.write_u16(pmx.flags);

        match (pmx.has(PmxBone::CONNECTED), pmx.tail) {
            (true, BoneTail::Connect(index)) => self.bone(index)?,
            (false, BoneTail::Offset(offset)) => self.w.write_vec3(offset),
            _ => {
                return Err(Error::invalid(format!(
                    "bone {name:?}: tail does not match the connect flag"
                )));
            }
        }
        let inherits =
            pmx.has(PmxBone::INHERIT_ROTATION) || pmx.has(PmxBone::INHERIT_TRANSLATION);
        if let Some(inherit) = flagged(inherits, pmx.inherit.as_ref(), name, "inherit")? {
            self.bone(inherit.parent)?;
            self.w.write_f32(inherit.ratio);
        }
        if let Some(axis) = flagged(
            pmx.has(PmxBone::FIXED_AXIS),
            pmx.fixed_axis.as_ref(),
            name,
            "fixed axis",
        )? {
            self.w.write_vec3(*axis);
        }
        if let Some(axes) = flagged(
            pmx.has(PmxBone::LOCAL_AXES),
            pmx.local_axes.as_ref(),
            name,
            "local axes",
        )? {
            self.w.write_vec3(axes.x);
            self.w.write_vec3(axes.z);
        }
        if let Some(key) = flagged(
            pmx.has(PmxBone::EXTERNAL_PARENT),
            pmx.external_key.as_ref(),
            name,
            "external parent",
        )? {
            self.w.write_i32(*key);
        }
        if let Some(ik) = flagged(pmx.has(PmxBone::IK), pmx.ik.as_ref(), name, "IK")? {
            self.bone(Some(ik.effector))?;
            self.w.write_i32(ik.iterations as i32);
            self.w.write_f32(ik.max_angle);
            self.count(ik.links.len())?;
            for link in &ik.links {
                self.bone(Some(link.bone))?;
                match link.limit {
                    Some(limit) => {
                        self.w.write_u8(1);
                        self.w.write_vec3(limit.lower);
                        self.w.write_vec3(limit.upper);
                    }
                    None => self.w.write_u8(0),
                }
            }
        }
        Ok(())
    }

    fn morph_record(&mut self, morph: &Morph) -> Result<(), Error> {
        self.text(&morph.name)?;
        self.optional_text(morph.english_name.as_ref())?;
        self.w.write_u8(morph.panel);
        let kind = match &morph.data {
            MorphData::Group(_) => MORPH_GROUP,
            MorphData::Vertex(_) => MORPH_VERTEX,
            MorphData::Bone(_) => MORPH_BONE,
            MorphData::Uv { channel, .. } => {
                if *channel > MORPH_UV4 - MORPH_UV {
                    return Err(Error::invalid(format!("UV morph channel {channel}")));
                }
                MORPH_UV + channel
            }
            MorphData::Material(_) => MORPH_MATERIAL,
            MorphData::Flip(_) => MORPH_FLIP,
            MorphData::Impulse(_) => MORPH_IMPULSE,
        };
        self.w.write_u8(kind);
        self.count(morph.data.len())?;
        match &morph.data {
            MorphData::Group(v) | MorphData::Flip(v) => {
                for e in v {
                    self.morph(e.morph)?;
                    self.w.write_f32(e.ratio);
                }
            }
            MorphData::Vertex(v) => {
                for e in v {
                    self.vertex(e.vertex)?;
                    self.w.write_vec3(e.displacement);
                }
            }
            MorphData::Bone(v) => {
                for e in v {
                    self.bone(Some(e.bone))?;
                    self.w.write_vec3(e.translation);
                    self.w.write_f32_slice(&e.rotation.to_array());
                }
            }
            MorphData::Uv { offsets, .. } => {
                for e in offsets {
                    self.vertex(e.vertex)?;
                    self.w.write_vec4(e.offset);
                }
            }
            MorphData::Material(v) => {
                for e in v {
                    self.w
                        .write_index(self.globals.material_index, index_value(e.material))?;
                    self.w.write_u8(e.operation);
                    self.w.write_vec4(e.diffuse);
                    self.w.write_vec3(e.specular);
                    self.w.write_f32(e.shininess);
                    self.w.write_vec3(e.ambient);
                    self.w.write_vec4(e.edge_color);
                    self.w.write_f32(e.edge_size);
                    self.w.write_vec4(e.texture_tint);
                    self.w.write_vec4(e.sphere_tint);
                    self.w.write_vec4(e.toon_tint);
                }
            }
            MorphData::Impulse(v) => {
                for e in v {
                    self.rigid_body(e.rigid_body)?;
                    self.w.write_u8(e.local);
                    self.w.write_vec3(e.velocity);
                    self.w.write_vec3(e.torque);
                }
            }
        }
        Ok(())
    }
}

fn flagged<'a, T>(
    flag: bool,
    value: Option<&'a T>,
    bone: &str,
    what: &str,
) -> Result<Option<&'a T>, Error> {
    match (flag, value) {
        (true, Some(v)) => Ok(Some(v)),
        (false, None) => Ok(None),
        (true, None) => Err(Error::invalid(format!(
            "bone {bone:?}: {what} flag set but payload missing"
        ))),
        (false, Some(_)) => Err(Error::invalid(format!(
            "bone {bone:?}: {what} payload present but flag clear"
        ))),
    }
}

pub(crate) fn encode(doc: &Document) -> Result<Vec<u8>, Error> {
    let FormatInfo::Pmx(globals) = &doc.header.format else {
        return Err(Error::invalid("document is not a PMX model"));
    };
    if !supported_version(doc.header.version) {
        return Err(Error::invalid(format!("PMX version {}", doc.header.version)));
    }
    let extra_len = u8::try_from(globals.extra.len())
        .ok()
        .and_then(|n| n.checked_add(GLOBALS_LEN))
        .ok_or_else(|| Error::invalid("too many PMX header globals"))?;

    let mut e = Encoder {
        w: ByteWriter::new(),
        globals,
    };
    e.w.write_bytes(MAGIC);
    e.w.write_f32(doc.header.version);
    e.w.write_u8(extra_len);
    e.w.write_u8(globals.encoding.pmx_byte()?);
    e.w.write_u8(globals.additional_uv_count);
    for width in [
        globals.vertex_index,
        globals.texture_index,
        globals.material_index,
        globals.bone_index,
        globals.morph_index,
        globals.rigid_body_index,
    ] {
        e.w.write_u8(width.bytes() as u8);
    }
    e.w.write_bytes(&globals.extra);

    e.text(&doc.header.name)?;
    e.optional_text(doc.header.english_name.as_ref())?;
    e.text(&doc.header.comment)?;
    e.optional_text(doc.header.english_comment.as_ref())?;

    e.count(doc.vertices.len())?;
    for v in &doc.vertices {
        e.vertex_record(v)?;
    }

    e.count(doc.faces.len() * 3)?;
    for face in &doc.faces {
        for &i in face {
            e.vertex(i)?;
        }
    }

    e.count(doc.textures.len())?;
    for t in &doc.textures {
        e.text(t)?;
    }

    e.count(doc.materials.len())?;
    for m in &doc.materials {
        e.material(m)?;
    }

    e.count(doc.bones.len())?;
    for bone in &doc.bones {
        e.bone_record(bone)?;
    }

    e.count(doc.morphs.len())?;
    for morph in &doc.morphs {
        e.morph_record(morph)?;
    }

    let Display::Pmx(frames) = &doc.display else {
        return Err(Error::invalid("PMX models need display frames"));
    };
    e.count(frames.len())?;
    for frame in frames {
        e.text(&frame.name)?;
        e.text(&frame.english_name)?;
        e.w.write_u8(frame.special);
        e.count(frame.elements.len())?;
        for element in &frame.elements {
            match *element {
                DisplayElement::Bone(bone) => {
                    e.w.write_u8(FRAME_BONE);
                    e.bone(Some(bone))?;
                }
                DisplayElement::Morph(morph) => {
                    e.w.write_u8(FRAME_MORPH);
                    e.morph(morph)?;
                }
            }
        }
    }

    e.count(doc.rigid_bodies.len())?;
    for body in &doc.rigid_bodies {
        e.text(&body.name)?;
        e.optional_text(body.english_name.as_ref())?;
        e.bone(body.bone)?;
        e.w.write_u8(body.group);
        e.w.write_u16(body.mask);
        e.w.write_u8(body.shape.byte());
        e.w.write_vec3(body.size);
        e.w.write_vec3(body.position);
        e.w.write_vec3(body.rotation);
        e.w.write_f32(body.mass);
        e.w.write_f32(body.linear_damping);
        e.w.write_f32(body.angular_damping);
        e.w.write_f32(body.restitution);
        e.w.write_f32(body.friction);
        e.w.write_u8(body.kind.byte());
    }

    e.count(doc.constraints.len())?;
    for c in &doc.constraints {
        e.text(&c.name)?;
        e.optional_text(c.english_name.as_ref())?;
        e.w.write_u8(c.kind);
        e.rigid_body(c.bodies[0])?;
        e.rigid_body(c.bodies[1])?;
        for v in [
            c.position,
            c.rotation,
            c.linear_lower,
            c.linear_upper,
            c.angular_lower,
            c.angular_upper,
            c.linear_spring,
            c.angular_spring,
        ] {
            e.w.write_vec3(v);
        }
    }

    e.w.write_bytes(&doc.trailing);
    Ok(e.w.into_bytes())
}
