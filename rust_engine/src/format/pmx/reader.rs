//! PMX 二进制解析

use super::types::*;
use crate::util::BinaryReader;
use crate::{ModelError, Result};

pub const PMX_SIGNATURE: &[u8; 4] = b"PMX ";

struct PmxReader<'a> {
    reader: BinaryReader<'a>,
    globals: PmxGlobals,
}

fn index_size(value: u8, what: &str) -> Result<u8> {
    match value {
        1 | 2 | 4 => Ok(value),
        _ => Err(ModelError::SchemaViolation(format!("bad {} index size: {}", what, value))),
    }
}

fn read_globals(reader: &mut BinaryReader) -> Result<PmxGlobals> {
    let count = reader.read_u8("globals count")? as usize;
    if count < 8 {
        return Err(ModelError::SchemaViolation(format!("bad globals count: {}, at least 8", count)));
    }
    let bytes = reader.read_bytes(count, "globals")?;
    let text_encoding = PmxTextEncoding::from_u8(bytes[0])
        .ok_or_else(|| ModelError::SchemaViolation(format!("bad text encoding: {}", bytes[0])))?;
    if bytes[1] > 4 {
        return Err(ModelError::SchemaViolation(format!("bad additional vec4 count: {}", bytes[1])));
    }
    Ok(PmxGlobals {
        text_encoding,
        additional_vec4_count: bytes[1],
        vertex_index_size: index_size(bytes[2], "vertex")?,
        texture_index_size: index_size(bytes[3], "texture")?,
        material_index_size: index_size(bytes[4], "material")?,
        bone_index_size: index_size(bytes[5], "bone")?,
        morph_index_size: index_size(bytes[6], "morph")?,
        rigid_body_index_size: index_size(bytes[7], "rigid body")?,
    })
}

impl<'a> PmxReader<'a> {
    fn text(&mut self, what: &str) -> Result<String> {
        self.reader.read_prefixed_string(self.globals.text_encoding.encoding(), what)
    }

    /// -1 为 None，其他负数报错
    fn optional_index(&mut self, size: u8, what: &str) -> Result<Option<usize>> {
        match self.reader.read_index(size, what)? {
            -1 => Ok(None),
            index if index < 0 => Err(ModelError::SchemaViolation(format!("{}: bad index {}", what, index))),
            index => Ok(Some(index as usize)),
        }
    }

    fn required_index(&mut self, size: u8, what: &str) -> Result<usize> {
        self.optional_index(size, what)?
            .ok_or_else(|| ModelError::UnresolvedReference(format!("{}: missing index", what)))
    }

    fn bone_index(&mut self, what: &str) -> Result<Option<usize>> {
        self.optional_index(self.globals.bone_index_size, what)
    }

    fn texture_index(&mut self, what: &str) -> Result<Option<usize>> {
        self.optional_index(self.globals.texture_index_size, what)
    }

    fn morph_index(&mut self, what: &str) -> Result<Option<usize>> {
        self.optional_index(self.globals.morph_index_size, what)
    }

    fn rigid_body_index(&mut self, what: &str) -> Result<Option<usize>> {
        self.optional_index(self.globals.rigid_body_index_size, what)
    }

    fn vertex_index(&mut self, what: &str) -> Result<u32> {
        self.reader.read_unsigned_index(self.globals.vertex_index_size, what)
    }

    fn weight(&mut self) -> Result<PmxWeight> {
        let kind = self.reader.read_u8("weight deform type")?;
        let weight = match kind {
            0 => PmxWeight::Bdef1 {
                bone: self.bone_index("BDEF1 bone")?,
            },
            1 => PmxWeight::Bdef2 {
                bones: [self.bone_index("BDEF2 bone")?, self.bone_index("BDEF2 bone")?],
                weight: self.reader.read_f32("BDEF2 weight")?,
            },
            2 | 4 => {
                let bones = [
                    self.bone_index("BDEF4 bone")?,
                    self.bone_index("BDEF4 bone")?,
                    self.bone_index("BDEF4 bone")?,
                    self.bone_index("BDEF4 bone")?,
                ];
                let weights = self.reader.read_vec4("BDEF4 weights")?.to_array();
                if kind == 2 {
                    PmxWeight::Bdef4 { bones, weights }
                } else {
                    PmxWeight::Qdef { bones, weights }
                }
            }
            3 => PmxWeight::Sdef {
                bones: [self.bone_index("SDEF bone")?, self.bone_index("SDEF bone")?],
                weight: self.reader.read_f32("SDEF weight")?,
                c: self.reader.read_vec3("SDEF C")?,
                r0: self.reader.read_vec3("SDEF R0")?,
                r1: self.reader.read_vec3("SDEF R1")?,
            },
            _ => {
                return Err(ModelError::SchemaViolation(format!("bad weight deform type: {}", kind)));
            }
        };
        Ok(weight)
    }

    fn vertices(&mut self) -> Result<Vec<PmxVertex>> {
        let count = self.reader.read_count("vertex count")?;
        if count == 0 {
            return Err(ModelError::SchemaViolation("vertex count should be greater than 0".to_string()));
        }
        let additional = self.globals.additional_vec4_count as usize * 16;
        let mut vertices = Vec::with_capacity(count.min(self.reader.remaining() / 32 + 1));
        for _ in 0..count {
            let position = self.reader.read_vec3("vertex position")?;
            let normal = self.reader.read_vec3("vertex normal")?;
            let uv = self.reader.read_vec2("vertex uv")?;
            self.reader.skip(additional, "additional vec4")?;
            let weight = self.weight()?;
            let edge_scale = self.reader.read_f32("edge scale")?;
            vertices.push(PmxVertex {
                position,
                normal,
                uv,
                weight,
                edge_scale,
            });
        }
        Ok(vertices)
    }

    fn surfaces(&mut self) -> Result<Vec<u32>> {
        let count = self.reader.read_count("surface count")?;
        if count % 3 != 0 {
            return Err(ModelError::SchemaViolation(format!(
                "surface count should be a multiple of 3: {}",
                count
            )));
        }
        let size = self.globals.vertex_index_size as usize;
        if self.reader.remaining() < count * size {
            return Err(ModelError::UnexpectedEof(format!(
                "surfaces: want {} bytes, but only {} bytes available",
                count * size,
                self.reader.remaining()
            )));
        }
        (0..count).map(|_| self.vertex_index("surface index")).collect()
    }

    fn textures(&mut self) -> Result<Vec<String>> {
        let count = self.reader.read_count("texture count")?;
        (0..count).map(|_| self.text("texture path")).collect()
    }

    fn material(&mut self) -> Result<PmxMaterial> {
        let name_local = self.text("material name")?;
        let name_universal = self.text("material universal name")?;
        let diffuse_color = self.reader.read_vec4("diffuse color")?;
        let specular_color = self.reader.read_vec3("specular color")?;
        let specular_strength = self.reader.read_f32("specular strength")?;
        let ambient_color = self.reader.read_vec3("ambient color")?;
        let flags = PmxMaterialFlags::from_bits_retain(self.reader.read_u8("drawing flags")?);
        let edge_color = self.reader.read_vec4("edge color")?;
        let edge_scale = self.reader.read_f32("edge scale")?;
        let texture_index = self.texture_index("texture index")?;
        let environment_index = self.texture_index("environment index")?;
        let blend = self.reader.read_u8("environment blend mode")?;
        let environment_blend_mode = PmxEnvironmentBlendMode::from_u8(blend)
            .ok_or_else(|| ModelError::SchemaViolation(format!("bad environment blend mode: {}", blend)))?;
        let toon_reference = match self.reader.read_u8("toon reference type")? {
            0 => PmxToonReference::Texture(self.texture_index("toon texture index")?),
            1 => PmxToonReference::Internal(self.reader.read_u8("internal toon index")?),
            other => return Err(ModelError::SchemaViolation(format!("bad toon reference type: {}", other))),
        };
        let memo = self.text("material memo")?;
        let surface_count = self.reader.read_count("material surface count")?;
        if surface_count % 3 != 0 {
            return Err(ModelError::SchemaViolation(format!(
                "material {}: surface count should be a multiple of 3: {}",
                name_local, surface_count
            )));
        }
        Ok(PmxMaterial {
            name_local,
            name_universal,
            diffuse_color,
            specular_color,
            specular_strength,
            ambient_color,
            flags,
            edge_color,
            edge_scale,
            texture_index,
            environment_index,
            environment_blend_mode,
            toon_reference,
            memo,
            surface_count,
        })
    }

    fn ik(&mut self) -> Result<PmxIk> {
        let target_index = self.required_index(self.globals.bone_index_size, "IK target")?;
        let loop_count = self.reader.read_i32("IK loop count")?;
        let limit_radian = self.reader.read_f32("IK limit radian")?;
        let link_count = self.reader.read_count("IK link count")?;
        let mut links = Vec::with_capacity(link_count.min(self.reader.remaining()));
        for _ in 0..link_count {
            let bone_index = self.required_index(self.globals.bone_index_size, "IK link bone")?;
            let limits = if self.reader.read_u8("IK link has limits")? != 0 {
                Some(PmxIkLimits {
                    min: self.reader.read_vec3("IK limit min")?,
                    max: self.reader.read_vec3("IK limit max")?,
                })
            } else {
                None
            };
            links.push(PmxIkLink { bone_index, limits });
        }
        Ok(PmxIk {
            target_index,
            loop_count,
            limit_radian,
            links,
        })
    }

    /// 只读取标志位声明存在的字段
    fn bone(&mut self) -> Result<PmxBone> {
        let mut desc = PmxBoneDesc {
            name_local: self.text("bone name")?,
            name_universal: self.text("bone universal name")?,
            position: self.reader.read_vec3("bone position")?,
            parent_index: self.bone_index("parent bone")?,
            layer: self.reader.read_i32("bone layer")?,
            flags: PmxBoneFlags::from_bits_retain(self.reader.read_u16("bone flags")?),
            ..Default::default()
        };
        let flags = desc.flags;
        desc.tail = if flags.contains(PmxBoneFlags::INDEXED_TAIL) {
            PmxBoneTail::Index(self.bone_index("tail bone")?)
        } else {
            PmxBoneTail::Offset(self.reader.read_vec3("tail offset")?)
        };
        if flags.intersects(PmxBoneFlags::INHERIT_ROTATION | PmxBoneFlags::INHERIT_TRANSLATION) {
            desc.inherit_parent = Some(PmxInheritParent {
                index: self.bone_index("inherit parent")?,
                influence: self.reader.read_f32("inherit influence")?,
            });
        }
        if flags.contains(PmxBoneFlags::FIXED_AXIS) {
            desc.fixed_axis = Some(self.reader.read_vec3("fixed axis")?);
        }
        if flags.contains(PmxBoneFlags::LOCAL_COORDINATE) {
            desc.local_coordinate = Some(PmxLocalCoordinate {
                x: self.reader.read_vec3("local x axis")?,
                z: self.reader.read_vec3("local z axis")?,
            });
        }
        if flags.contains(PmxBoneFlags::EXTERNAL_PARENT) {
            desc.external_parent_index = Some(self.reader.read_i32("external parent")?);
        }
        if flags.contains(PmxBoneFlags::IK) {
            desc.ik = Some(self.ik()?);
        }
        PmxBone::new(desc)
    }

    fn morph(&mut self) -> Result<PmxMorph> {
        let name_local = self.text("morph name")?;
        let name_universal = self.text("morph universal name")?;
        let panel = self.reader.read_u8("morph panel")?;
        let panel =
            PmxMorphPanel::from_u8(panel).ok_or_else(|| ModelError::SchemaViolation(format!("bad morph panel: {}", panel)))?;
        let morph_type = self.reader.read_u8("morph type")?;
        let morph_type = PmxMorphType::from_u8(morph_type)
            .ok_or_else(|| ModelError::SchemaViolation(format!("bad morph type: {}", morph_type)))?;
        let count = self.reader.read_count("morph offset count")?;

        let kind = match morph_type.skipped_item_size(&self.globals) {
            Some(item_size) => {
                let length = count
                    .checked_mul(item_size)
                    .ok_or_else(|| ModelError::SchemaViolation(format!("morph {}: too many offsets", name_local)))?;
                self.reader.skip(length, "morph offsets")?;
                PmxMorphKind::Skipped { morph_type, count }
            }
            None if morph_type == PmxMorphType::Group => {
                let mut items = Vec::with_capacity(count.min(self.reader.remaining()));
                for _ in 0..count {
                    let morph_index = self.morph_index("group morph item")?;
                    let influence = self.reader.read_f32("group morph influence")?;
                    if let Some(morph_index) = morph_index {
                        items.push(PmxGroupItem { morph_index, influence });
                    }
                }
                PmxMorphKind::Group(items)
            }
            None => {
                let mut offsets = Vec::with_capacity(count.min(self.reader.remaining()));
                for _ in 0..count {
                    offsets.push(PmxVertexOffset {
                        vertex_index: self.vertex_index("vertex morph index")?,
                        offset: self.reader.read_vec3("vertex morph offset")?,
                    });
                }
                PmxMorphKind::Vertex(offsets)
            }
        };
        Ok(PmxMorph {
            name_local,
            name_universal,
            panel,
            kind,
        })
    }

    fn display_frame(&mut self) -> Result<PmxDisplayFrame> {
        let name_local = self.text("display frame name")?;
        let name_universal = self.text("display frame universal name")?;
        let is_special = self.reader.read_u8("display frame flag")? != 0;
        let count = self.reader.read_count("display frame element count")?;
        let mut elements = Vec::with_capacity(count.min(self.reader.remaining()));
        for _ in 0..count {
            let element = match self.reader.read_u8("display element type")? {
                0 => PmxDisplayElement::Bone(self.bone_index("display bone")?),
                1 => PmxDisplayElement::Morph(self.morph_index("display morph")?),
                other => return Err(ModelError::SchemaViolation(format!("bad display element type: {}", other))),
            };
            elements.push(element);
        }
        Ok(PmxDisplayFrame {
            name_local,
            name_universal,
            is_special,
            elements,
        })
    }

    fn rigid_body(&mut self) -> Result<PmxRigidBody> {
        let name_local = self.text("rigid body name")?;
        let name_universal = self.text("rigid body universal name")?;
        let bone_index = self.bone_index("rigid body bone")?;
        let group = self.reader.read_u8("rigid body group")?;
        let non_collision_mask = self.reader.read_u16("rigid body collision mask")?;
        let shape = match self.reader.read_u8("rigid body shape")? {
            0 => PmxRigidBodyShape::Sphere,
            1 => PmxRigidBodyShape::Box,
            2 => PmxRigidBodyShape::Capsule,
            other => return Err(ModelError::SchemaViolation(format!("bad rigid body shape: {}", other))),
        };
        let size = self.reader.read_vec3("rigid body size")?;
        let position = self.reader.read_vec3("rigid body position")?;
        let rotation = self.reader.read_vec3("rigid body rotation")?;
        let mass = self.reader.read_f32("rigid body mass")?;
        let linear_damping = self.reader.read_f32("rigid body linear damping")?;
        let angular_damping = self.reader.read_f32("rigid body angular damping")?;
        let restitution = self.reader.read_f32("rigid body restitution")?;
        let friction = self.reader.read_f32("rigid body friction")?;
        let mode = match self.reader.read_u8("rigid body mode")? {
            0 => PmxRigidBodyMode::Static,
            1 => PmxRigidBodyMode::Dynamic,
            2 => PmxRigidBodyMode::DynamicWithBonePosition,
            other => return Err(ModelError::SchemaViolation(format!("bad rigid body mode: {}", other))),
        };
        Ok(PmxRigidBody {
            name_local,
            name_universal,
            bone_index,
            group,
            non_collision_mask,
            shape,
            size,
            position,
            rotation,
            mass,
            linear_damping,
            angular_damping,
            restitution,
            friction,
            mode,
        })
    }

    fn joint(&mut self) -> Result<PmxJoint> {
        Ok(PmxJoint {
            name_local: self.text("joint name")?,
            name_universal: self.text("joint universal name")?,
            joint_type: self.reader.read_u8("joint type")?,
            rigid_body_a: self.rigid_body_index("joint rigid body A")?,
            rigid_body_b: self.rigid_body_index("joint rigid body B")?,
            position: self.reader.read_vec3("joint position")?,
            rotation: self.reader.read_vec3("joint rotation")?,
            position_min: self.reader.read_vec3("joint position min")?,
            position_max: self.reader.read_vec3("joint position max")?,
            rotation_min: self.reader.read_vec3("joint rotation min")?,
            rotation_max: self.reader.read_vec3("joint rotation max")?,
            position_spring: self.reader.read_vec3("joint position spring")?,
            rotation_spring: self.reader.read_vec3("joint rotation spring")?,
        })
    }

    fn list<T>(&mut self, what: &str, mut read: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.reader.read_count(what)?;
        let mut items = Vec::with_capacity(count.min(self.reader.remaining()));
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }

    /// 文件末尾的可选段：没有剩余字节时为空
    fn trailing_list<T>(&mut self, what: &str, read: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        if !self.reader.has_remaining() {
            log::debug!("PMX 在 {} 之前结束", what);
            return Ok(Vec::new());
        }
        self.list(what, read)
    }
}

fn read_header(reader: &mut BinaryReader) -> Result<(f32, PmxGlobals)> {
    let signature = reader.read_bytes(PMX_SIGNATURE.len(), "PMX signature")?;
    if signature != PMX_SIGNATURE {
        return Err(ModelError::MalformedSignature("bad PMX signature".to_string()));
    }
    let version = reader.read_f32("PMX version")?;
    if version < 2.0 {
        return Err(ModelError::SchemaViolation(format!("bad PMX version: at least 2.0, but get {}", version)));
    }
    Ok((version, read_globals(reader)?))
}

/// 解析整个 PMX 文件
///
/// 显示枠、刚体与关节三段可以整段缺失（文件在段边界处结束），
/// 但已经开始的段必须完整。
pub fn parse(data: &[u8]) -> Result<PmxModel> {
    let mut reader = BinaryReader::new(data);
    let (version, globals) = read_header(&mut reader)?;
    let mut pmx = PmxReader { reader, globals };

    let header = PmxHeader {
        version,
        globals,
        model_name_local: pmx.text("model name")?,
        model_name_universal: pmx.text("model universal name")?,
        comment_local: pmx.text("comment")?,
        comment_universal: pmx.text("universal comment")?,
    };
    let vertices = pmx.vertices()?;
    let indices = pmx.surfaces()?;
    let textures = pmx.textures()?;
    let materials = pmx.list("material count", |pmx| pmx.material())?;
    let bones = pmx.list("bone count", |pmx| pmx.bone())?;
    let morphs = pmx.list("morph count", |pmx| pmx.morph())?;

    let display_frames = pmx.trailing_list("display frame count", |pmx| pmx.display_frame())?;
    let rigid_bodies = pmx.trailing_list("rigid body count", |pmx| pmx.rigid_body())?;
    let joints = pmx.trailing_list("joint count", |pmx| pmx.joint())?;

    Ok(PmxModel {
        header,
        vertices,
        indices,
        textures,
        materials,
        bones,
        morphs,
        display_frames,
        rigid_bodies,
        joints,
    })
}
