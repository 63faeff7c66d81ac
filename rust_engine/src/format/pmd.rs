//! PMD 模型加载
//!
//! PMD 是 PMX 之前的定长格式：Shift-JIS 名称、u16 下标。读取头部、顶点、索引、材质、骨骼、IK 与表情段，
//! 之后的英文名、toon 纹理和物理段忽略。

use std::f32::consts::PI;
use std::path::Path;

use encoding_rs::SHIFT_JIS;
use glam::{Vec2, Vec3, Vec4};

use super::mmd::{
    self, non_empty, MmdBone, MmdIk, MmdIkLink, MmdInherit, MmdMaterial, MmdMorph, MmdMorphKind, MmdScene, MmdVertex,
};
use crate::config::{get_config, LoaderConfig};
use crate::loader::{Ability, LoadResult, ModelFileLoader};
use crate::util::{read_file, BinaryReader};
use crate::{ModelError, Result};

/// "Pmd" + 版本号 1.0f
pub const PMD_SIGNATURE: &[u8; 7] = &[0x50, 0x6D, 0x64, 0x00, 0x00, 0x80, 0x3F];

const EXTENSIONS: &[(&str, Ability)] = &[("pmd", Ability::MODEL)];

const NAME_LENGTH: usize = 20;
const COMMENT_LENGTH: usize = 256;

/// 骨骼类型 5：旋转跟随 ik_target 指向的骨骼
const BONE_TYPE_ROTATION_INFLUENCED: u8 = 5;
/// 膝盖只能向后弯曲，约 -180° 到 -0.5°
const KNEE_NAME: &str = "ひざ";
const KNEE_LIMIT_MIN: Vec3 = Vec3::new(-PI, 0.0, 0.0);
const KNEE_LIMIT_MAX: Vec3 = Vec3::new(-0.008_726_646, 0.0, 0.0);

#[derive(Clone, Debug, PartialEq)]
pub struct PmdHeader {
    pub name: String,
    pub comment: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmdVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub bones: [u16; 2],
    /// 第一根骨骼的权重（0..=100）
    pub weight: u8,
    pub edge_disabled: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdMaterial {
    pub diffuse_color: Vec4,
    pub specular_strength: f32,
    pub specular_color: Vec3,
    pub ambient_color: Vec3,
    pub toon_index: u8,
    pub edge_flag: bool,
    pub surface_count: usize,
    pub texture_filename: Option<String>,
    pub sphere_filename: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdBone {
    pub name: String,
    pub parent: Option<usize>,
    pub tail: Option<usize>,
    pub bone_type: u8,
    pub ik_target: Option<usize>,
    pub position: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdIk {
    /// IK 控制骨骼
    pub bone: usize,
    /// 被拉动的末端骨骼
    pub target: usize,
    pub iterations: u16,
    /// 每次迭代的角度上限，单位为 4 弧度
    pub control_weight: f32,
    pub chain: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdSkin {
    pub name: String,
    /// 0 为基准表情，1..=4 为眉、目、口、其他
    pub skin_type: u8,
    /// 基准表情中是顶点下标与绝对位置，其他表情中是基准表情的下标与位移
    pub vertices: Vec<(u32, Vec3)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PmdModel {
    pub header: PmdHeader,
    pub vertices: Vec<PmdVertex>,
    /// 顺时针三角形索引
    pub indices: Vec<u16>,
    pub materials: Vec<PmdMaterial>,
    pub bones: Vec<PmdBone>,
    pub iks: Vec<PmdIk>,
    pub skins: Vec<PmdSkin>,
}

fn text(reader: &mut BinaryReader, len: usize, what: &str) -> Result<String> {
    reader.read_fixed_string(len, SHIFT_JIS, what)
}

/// 0xFFFF 为 None
fn optional_index(reader: &mut BinaryReader, what: &str) -> Result<Option<usize>> {
    match reader.read_u16(what)? {
        u16::MAX => Ok(None),
        index => Ok(Some(index as usize)),
    }
}

/// "texture.bmp*sphere.sph"；只有一个文件名且是 .sph/.spa 时为球面贴图
fn split_texture_name(name: &str) -> Result<(Option<String>, Option<String>)> {
    let parts: Vec<&str> = name.split('*').collect();
    let owned = |part: &str| Some(part.to_string()).filter(|part| !part.is_empty());
    match parts.as_slice() {
        [single] => {
            let lower = single.to_lowercase();
            if lower.ends_with(".sph") || lower.ends_with(".spa") {
                Ok((None, owned(single)))
            } else {
                Ok((owned(single), None))
            }
        }
        [texture, sphere] => Ok((owned(texture), owned(sphere))),
        _ => Err(ModelError::SchemaViolation(format!("bad texture info: {}", name))),
    }
}

fn read_vertex(reader: &mut BinaryReader) -> Result<PmdVertex> {
    Ok(PmdVertex {
        position: reader.read_vec3("vertex position")?,
        normal: reader.read_vec3("vertex normal")?,
        uv: reader.read_vec2("vertex uv")?,
        bones: [reader.read_u16("vertex bone")?, reader.read_u16("vertex bone")?],
        weight: reader.read_u8("vertex weight")?,
        edge_disabled: reader.read_u8("vertex edge flag")? != 0,
    })
}

fn read_material(reader: &mut BinaryReader) -> Result<PmdMaterial> {
    let diffuse_color = reader.read_vec4("diffuse color")?;
    let specular_strength = reader.read_f32("specular strength")?;
    let specular_color = reader.read_vec3("specular color")?;
    let ambient_color = reader.read_vec3("ambient color")?;
    let toon_index = reader.read_u8("toon index")?;
    let edge_flag = reader.read_u8("edge flag")? != 0;
    let surface_count = reader.read_u32("material surface count")? as usize;
    let (texture_filename, sphere_filename) = split_texture_name(&text(reader, NAME_LENGTH, "texture name")?)?;
    if surface_count % 3 != 0 {
        return Err(ModelError::SchemaViolation(format!(
            "material surface count should be a multiple of 3: {}",
            surface_count
        )));
    }
    Ok(PmdMaterial {
        diffuse_color,
        specular_strength,
        specular_color,
        ambient_color,
        toon_index,
        edge_flag,
        surface_count,
        texture_filename,
        sphere_filename,
    })
}

fn read_bone(reader: &mut BinaryReader) -> Result<PmdBone> {
    Ok(PmdBone {
        name: text(reader, NAME_LENGTH, "bone name")?,
        parent: optional_index(reader, "parent bone")?,
        tail: optional_index(reader, "tail bone")?,
        bone_type: reader.read_u8("bone type")?,
        ik_target: optional_index(reader, "bone IK target")?,
        position: reader.read_vec3("bone position")?,
    })
}

fn read_ik(reader: &mut BinaryReader) -> Result<PmdIk> {
    let bone = reader.read_u16("IK bone")? as usize;
    let target = reader.read_u16("IK target bone")? as usize;
    let chain_length = reader.read_u8("IK chain length")?;
    let iterations = reader.read_u16("IK iterations")?;
    let control_weight = reader.read_f32("IK control weight")?;
    let chain = (0..chain_length)
        .map(|_| reader.read_u16("IK chain bone").map(|index| index as usize))
        .collect::<Result<Vec<_>>>()?;
    Ok(PmdIk {
        bone,
        target,
        iterations,
        control_weight,
        chain,
    })
}

fn read_skin(reader: &mut BinaryReader) -> Result<PmdSkin> {
    let name = text(reader, NAME_LENGTH, "skin name")?;
    let count = reader.read_u32("skin vertex count")? as usize;
    let skin_type = reader.read_u8("skin type")?;
    let mut vertices = Vec::with_capacity(count.min(reader.remaining() / 16));
    for _ in 0..count {
        vertices.push((reader.read_u32("skin vertex")?, reader.read_vec3("skin offset")?));
    }
    Ok(PmdSkin {
        name,
        skin_type,
        vertices,
    })
}

/// 解析整个 PMD 文件
pub fn parse(data: &[u8]) -> Result<PmdModel> {
    let mut reader = BinaryReader::new(data);
    let signature = reader.read_bytes(PMD_SIGNATURE.len(), "PMD signature")?;
    if signature != PMD_SIGNATURE {
        return Err(ModelError::MalformedSignature("bad PMD signature".to_string()));
    }
    let header = PmdHeader {
        name: text(&mut reader, NAME_LENGTH, "model name")?,
        comment: text(&mut reader, COMMENT_LENGTH, "comment")?,
    };

    let vertex_count = reader.read_u32("vertex count")? as usize;
    if vertex_count == 0 {
        return Err(ModelError::SchemaViolation("vertex count should be greater than 0".to_string()));
    }
    let vertices = (0..vertex_count)
        .map(|_| read_vertex(&mut reader))
        .collect::<Result<Vec<_>>>()?;

    let index_count = reader.read_u32("index count")? as usize;
    if index_count == 0 || index_count % 3 != 0 {
        return Err(ModelError::SchemaViolation(format!("bad index count: {}", index_count)));
    }
    if reader.remaining() < index_count * 2 {
        return Err(ModelError::UnexpectedEof(format!(
            "indices: want {} bytes, but only {} bytes available",
            index_count * 2,
            reader.remaining()
        )));
    }
    let indices = (0..index_count)
        .map(|_| reader.read_u16("index"))
        .collect::<Result<Vec<_>>>()?;

    let material_count = reader.read_u32("material count")? as usize;
    let materials = (0..material_count)
        .map(|_| read_material(&mut reader))
        .collect::<Result<Vec<_>>>()?;

    let bone_count = reader.read_u16("bone count")?;
    let bones = (0..bone_count)
        .map(|_| read_bone(&mut reader))
        .collect::<Result<Vec<_>>>()?;

    let iks = if reader.has_remaining() {
        let count = reader.read_u16("IK count")?;
        (0..count).map(|_| read_ik(&mut reader)).collect::<Result<Vec<_>>>()?
    } else {
        Vec::new()
    };
    let skins = if reader.has_remaining() {
        let count = reader.read_u16("skin count")?;
        (0..count).map(|_| read_skin(&mut reader)).collect::<Result<Vec<_>>>()?
    } else {
        Vec::new()
    };

    Ok(PmdModel {
        header,
        vertices,
        indices,
        materials,
        bones,
        iks,
        skins,
    })
}

fn invert_z(vector: Vec3) -> Vec3 {
    Vec3::new(vector.x, vector.y, -vector.z)
}

impl PmdModel {
    fn convert_morphs(&self) -> Result<Vec<MmdMorph>> {
        let Some(base) = self.skins.iter().find(|skin| skin.skin_type == 0) else {
            if let Some(skin) = self.skins.first() {
                return Err(ModelError::UnresolvedReference(format!(
                    "skin {} needs a base skin",
                    skin.name
                )));
            }
            return Ok(Vec::new());
        };
        self.skins
            .iter()
            .filter(|skin| skin.skin_type != 0)
            .map(|skin| {
                let offsets = skin
                    .vertices
                    .iter()
                    .map(|&(index, offset)| {
                        base.vertices
                            .get(index as usize)
                            .map(|&(vertex, _)| (vertex, invert_z(offset)))
                            .ok_or_else(|| {
                                ModelError::UnresolvedReference(format!(
                                    "skin {}: base skin index {} out of {}",
                                    skin.name,
                                    index,
                                    base.vertices.len()
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(MmdMorph {
                    name: skin.name.clone(),
                    english_name: None,
                    kind: MmdMorphKind::Vertex(offsets),
                })
            })
            .collect()
    }

    fn convert_bones(&self) -> Result<Vec<MmdBone>> {
        let mut bones: Vec<MmdBone> = self
            .bones
            .iter()
            .enumerate()
            .map(|(index, bone)| MmdBone {
                name: bone.name.clone(),
                english_name: None,
                position: invert_z(bone.position),
                parent: bone.parent.filter(|&parent| parent != index),
                ik: None,
                inherit: match bone.ik_target {
                    Some(source) if bone.bone_type == BONE_TYPE_ROTATION_INFLUENCED => Some(MmdInherit {
                        source,
                        influence: 1.0,
                        rotation: true,
                        translation: false,
                        local: false,
                    }),
                    _ => None,
                },
            })
            .collect();

        for ik in &self.iks {
            let links = ik
                .chain
                .iter()
                .map(|&bone| MmdIkLink {
                    bone,
                    limits: self
                        .bones
                        .get(bone)
                        .filter(|bone| bone.name.contains(KNEE_NAME))
                        .map(|_| (KNEE_LIMIT_MIN, KNEE_LIMIT_MAX)),
                })
                .collect();
            let bone_count = bones.len();
            let bone = bones.get_mut(ik.bone).ok_or_else(|| {
                ModelError::UnresolvedReference(format!("IK bone {} out of {} bones", ik.bone, bone_count))
            })?;
            bone.ik = Some(MmdIk {
                target: ik.target,
                loop_count: ik.iterations as i32,
                limit_radian: ik.control_weight * 4.0,
                links,
            });
        }
        Ok(bones)
    }

    /// 转换为右手坐标系的 MMD 场景
    pub(crate) fn into_mmd_scene(self, base_path: &Path, config: &LoaderConfig) -> Result<MmdScene> {
        let vertices = self
            .vertices
            .iter()
            .map(|vertex| {
                let weight = vertex.weight.min(100) as f32 / 100.0;
                MmdVertex {
                    position: invert_z(vertex.position),
                    normal: invert_z(vertex.normal),
                    uv: vertex.uv,
                    joints: [vertex.bones[0] as u32, vertex.bones[1] as u32, 0, 0],
                    weights: [weight, 1.0 - weight, 0.0, 0.0],
                }
            })
            .collect();
        let indices = self
            .indices
            .chunks_exact(3)
            .flat_map(|face| [face[0] as u32, face[2] as u32, face[1] as u32])
            .collect();

        let mut texture_names = Vec::new();
        let materials = self
            .materials
            .iter()
            .enumerate()
            .map(|(index, material)| MmdMaterial {
                name: format!("material {}", index),
                diffuse: material.diffuse_color,
                texture: material.texture_filename.as_ref().map(|name| {
                    texture_names.push(name.clone());
                    texture_names.len() - 1
                }),
                double_sided: true,
                index_count: material.surface_count,
            })
            .collect();

        Ok(MmdScene {
            name: non_empty(self.header.name.clone()),
            english_name: None,
            comment: non_empty(self.header.comment.clone()),
            english_comment: None,
            vertices,
            indices,
            textures: mmd::load_textures(base_path, &texture_names, config),
            materials,
            bones: self.convert_bones()?,
            morphs: self.convert_morphs()?,
        })
    }
}

pub struct PmdLoader;

impl ModelFileLoader for PmdLoader {
    fn name(&self) -> &'static str {
        "pmd"
    }

    fn extensions(&self) -> &'static [(&'static str, Ability)] {
        EXTENSIONS
    }

    fn probe_length(&self) -> Option<usize> {
        Some(PMD_SIGNATURE.len())
    }

    fn probe(&self, buffer: &[u8]) -> bool {
        buffer.starts_with(PMD_SIGNATURE)
    }

    fn load(&self, path: &Path, base_path: &Path) -> Result<LoadResult> {
        let config = get_config();
        let data = read_file(path, config.model_read_limit)?;
        let pmd = parse(&data)?;
        log::debug!(
            "PMD 解析完成: {} 个顶点, {} 个材质, {} 根骨骼, {} 个 IK, {} 个表情",
            pmd.vertices.len(),
            pmd.materials.len(),
            pmd.bones.len(),
            pmd.iks.len(),
            pmd.skins.len()
        );
        mmd::build(pmd.into_mmd_scene(base_path, &config)?, &config, "PMD skin")
    }
}
