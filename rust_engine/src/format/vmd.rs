//! VMD 动作文件解析
//!
//! VMD 只包含动画：骨骼关键帧、表情关键帧和相机关键帧（之后的灯光、阴影段忽略）。
//! 解析分两步：先读出文件坐标系下的原始记录（VmdFile），再转换为动画通道。
//! 骨骼按名称分组，每根骨骼产出共用同一份时间索引的平移、旋转两条通道。

use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::Path;

use encoding_rs::SHIFT_JIS;
use glam::{Quat, Vec3};

use super::MMD_CAMERA_NAME;
use crate::animation::{
    Animation, AnimationChannel, ExpressionTarget, Interpolation, KeyframeData, KeyframeIndexer, NodeTarget,
    Sampler, VmdCurves,
};
use crate::config::get_config;
use crate::loader::{Ability, LoadResult, ModelFileLoader};
use crate::model::{ExpressionTag, HumanoidTag};
use crate::util::{read_file, BinaryReader};
use crate::{ModelError, Result};

const OLD_SIGNATURE: &[u8] = b"Vocaloid Motion Data file";
const NEW_SIGNATURE: &[u8] = b"Vocaloid Motion Data 0002";
/// 签名字段总长，签名之后补 0
const SIGNATURE_FIELD_LENGTH: usize = 30;
const NAME_LENGTH: usize = 15;

const BONE_RECORD_LENGTH: usize = NAME_LENGTH + 4 + 12 + 16 + 64;
const FACE_RECORD_LENGTH: usize = NAME_LENGTH + 4 + 4;
const CAMERA_RECORD_LENGTH: usize = 4 + 4 + 12 + 12 + 24 + 4 + 1;

const EXTENSIONS: &[(&str, Ability)] = &[("vmd", Ability::EXTERNAL_ANIMATION)];

/// 骨骼关键帧（文件坐标系）
#[derive(Clone, Debug, PartialEq)]
pub struct VmdBoneKeyframe {
    pub bone_name: String,
    pub frame: u32,
    pub translation: Vec3,
    /// xyzw
    pub rotation: Quat,
    /// x / y / z / 旋转 四条曲线，每条 (x1, y1, x2, y2)
    pub curves: [[u8; 4]; 4],
}

/// 表情关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct VmdFaceKeyframe {
    pub face_name: String,
    pub frame: u32,
    pub weight: f32,
}

/// 相机关键帧（文件坐标系）
#[derive(Clone, Debug, PartialEq)]
pub struct VmdCameraKeyframe {
    pub frame: u32,
    /// 到目标点的距离，通常为负
    pub distance: f32,
    pub target: Vec3,
    /// 欧拉角（弧度）
    pub rotation: Vec3,
    /// 目标 x / y / z、旋转、距离、视角 六条曲线，已整理为 (x1, y1, x2, y2)
    pub curves: [[u8; 4]; 6],
    /// 视角（度）
    pub fov: u32,
    pub perspective: bool,
}

#[derive(Clone, Debug, Default)]
pub struct VmdFile {
    pub is_new_format: bool,
    pub model_name: String,
    pub bone_keyframes: Vec<VmdBoneKeyframe>,
    pub face_keyframes: Vec<VmdFaceKeyframe>,
    pub camera_keyframes: Vec<VmdCameraKeyframe>,
}

/// 计数来自文件，预分配前先按剩余字节数限制
fn capacity(count: usize, reader: &BinaryReader, record_length: usize) -> usize {
    count.min(reader.remaining() / record_length)
}

fn read_curve(reader: &mut BinaryReader, what: &str) -> Result<[u8; 4]> {
    let bytes = reader.read_bytes(4, what)?;
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl VmdFile {
    pub fn load(path: &Path, size_limit: u64) -> Result<Self> {
        let data = read_file(path, size_limit)?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);

        let signature = reader.read_bytes(SIGNATURE_FIELD_LENGTH, "VMD signature")?;
        let is_new_format = if signature.starts_with(NEW_SIGNATURE) {
            true
        } else if signature.starts_with(OLD_SIGNATURE) {
            false
        } else {
            return Err(ModelError::MalformedSignature("bad VMD file signature".to_string()));
        };

        let model_name_length = if is_new_format { 20 } else { 10 };
        let model_name = reader.read_fixed_string(model_name_length, SHIFT_JIS, "VMD model name")?;

        let bone_keyframes = Self::read_bones(&mut reader)?;
        // 早期文件可能在骨骼段之后直接结束
        let face_keyframes = if reader.has_remaining() {
            Self::read_faces(&mut reader)?
        } else {
            Vec::new()
        };
        let camera_keyframes = if reader.has_remaining() {
            Self::read_cameras(&mut reader)?
        } else {
            Vec::new()
        };

        Ok(Self {
            is_new_format,
            model_name,
            bone_keyframes,
            face_keyframes,
            camera_keyframes,
        })
    }

    fn read_bones(reader: &mut BinaryReader) -> Result<Vec<VmdBoneKeyframe>> {
        let count = reader.read_count("bone keyframe count")?;
        let mut keyframes = Vec::with_capacity(capacity(count, reader, BONE_RECORD_LENGTH));
        for _ in 0..count {
            let bone_name = reader.read_fixed_string(NAME_LENGTH, SHIFT_JIS, "bone name")?;
            let frame = reader.read_u32("bone frame")?;
            let translation = reader.read_vec3("bone translation")?;
            let rotation = Quat::from_vec4(reader.read_vec4("bone rotation")?);

            // 前 16 字节按 x1[xyzr] y1[xyzr] x2[xyzr] y2[xyzr] 交错排列，其余 48 字节是冗余副本
            let interpolation = reader.read_bytes(64, "bone interpolation")?;
            let mut curves = [[0u8; 4]; 4];
            for (channel, curve) in curves.iter_mut().enumerate() {
                *curve = [
                    interpolation[channel],
                    interpolation[channel + 4],
                    interpolation[channel + 8],
                    interpolation[channel + 12],
                ];
            }

            keyframes.push(VmdBoneKeyframe {
                bone_name,
                frame,
                translation,
                rotation,
                curves,
            });
        }
        Ok(keyframes)
    }

    fn read_faces(reader: &mut BinaryReader) -> Result<Vec<VmdFaceKeyframe>> {
        let count = reader.read_count("face keyframe count")?;
        let mut keyframes = Vec::with_capacity(capacity(count, reader, FACE_RECORD_LENGTH));
        for _ in 0..count {
            keyframes.push(VmdFaceKeyframe {
                face_name: reader.read_fixed_string(NAME_LENGTH, SHIFT_JIS, "face name")?,
                frame: reader.read_u32("face frame")?,
                weight: reader.read_f32("face weight")?,
            });
        }
        Ok(keyframes)
    }

    fn read_cameras(reader: &mut BinaryReader) -> Result<Vec<VmdCameraKeyframe>> {
        let count = reader.read_count("camera keyframe count")?;
        let mut keyframes = Vec::with_capacity(capacity(count, reader, CAMERA_RECORD_LENGTH));
        for _ in 0..count {
            let frame = reader.read_u32("camera frame")?;
            let distance = reader.read_f32("camera distance")?;
            let target = reader.read_vec3("camera target")?;
            let rotation = reader.read_vec3("camera rotation")?;

            // 相机曲线每条按 (x1, x2, y1, y2) 存放
            let mut curves = [[0u8; 4]; 6];
            for curve in curves.iter_mut() {
                let [x1, x2, y1, y2] = read_curve(reader, "camera interpolation")?;
                *curve = [x1, y1, x2, y2];
            }

            let fov = reader.read_u32("camera fov")?;
            let perspective = reader.read_u8("camera perspective")? == 0;
            keyframes.push(VmdCameraKeyframe {
                frame,
                distance,
                target,
                rotation,
                curves,
                fov,
                perspective,
            });
        }
        Ok(keyframes)
    }

    /// 转换为动画通道
    ///
    /// frame_time 为每帧秒数；scale 只作用于相机（骨骼动画随模型场景一起缩放）。
    pub fn to_animation(&self, frame_time: f32, scale: f32) -> Result<Animation> {
        let mut channels = Vec::new();

        for (name, mut keyframes) in group_by_name(&self.bone_keyframes, |k| &k.bone_name) {
            keyframes.sort_by_key(|k| k.frame);
            let indexer = frame_indexer(keyframes.iter().map(|k| k.frame), frame_time)?;
            let target = NodeTarget {
                node: None,
                node_name: Some(name.to_string()),
                humanoid_tag: HumanoidTag::from_pmx_japanese(name),
            };

            // 右手系：平移 z 取反，旋转四元数 z、w 取反
            let translations = keyframes
                .iter()
                .map(|k| Vec3::new(k.translation.x, k.translation.y, -k.translation.z))
                .collect();
            let rotations = keyframes
                .iter()
                .map(|k| Quat::from_xyzw(k.rotation.x, k.rotation.y, -k.rotation.z, -k.rotation.w))
                .collect();
            let translation_curves = keyframes.iter().flat_map(|k| k.curves[..3].iter().copied()).collect();
            let rotation_curves = keyframes.iter().map(|k| k.curves[3]).collect();

            channels.push(AnimationChannel::Translation {
                target: target.clone(),
                sampler: Sampler::new(
                    indexer.clone(),
                    KeyframeData::single(translations),
                    Interpolation::VmdBezier(VmdCurves::new(translation_curves, 3)?),
                )?,
                relative: true,
            });
            channels.push(AnimationChannel::Rotation {
                target,
                sampler: Sampler::new(
                    indexer,
                    KeyframeData::single(rotations),
                    Interpolation::VmdBezier(VmdCurves::new(rotation_curves, 1)?),
                )?,
                relative: true,
            });
        }

        for (name, mut keyframes) in group_by_name(&self.face_keyframes, |k| &k.face_name) {
            keyframes.sort_by_key(|k| k.frame);
            let indexer = frame_indexer(keyframes.iter().map(|k| k.frame), frame_time)?;
            channels.push(AnimationChannel::Expression {
                target: ExpressionTarget {
                    name: Some(name.to_string()),
                    tag: ExpressionTag::from_pmx_japanese(name),
                },
                sampler: Sampler::new(
                    indexer,
                    KeyframeData::single(keyframes.iter().map(|k| k.weight).collect()),
                    Interpolation::Linear,
                )?,
            });
        }

        if !self.camera_keyframes.is_empty() {
            channels.extend(self.camera_channels(frame_time, scale)?);
        }

        Ok(Animation::new(None, channels))
    }

    fn camera_channels(&self, frame_time: f32, scale: f32) -> Result<Vec<AnimationChannel>> {
        let mut keyframes: Vec<&VmdCameraKeyframe> = self.camera_keyframes.iter().collect();
        keyframes.sort_by_key(|k| k.frame);
        let indexer = frame_indexer(keyframes.iter().map(|k| k.frame), frame_time)?;
        let curves = |range: std::ops::Range<usize>, channels: usize| {
            VmdCurves::new(
                keyframes.iter().flat_map(|k| k.curves[range.clone()].iter().copied()).collect(),
                channels,
            )
            .map(Interpolation::VmdBezier)
        };
        let camera = MMD_CAMERA_NAME.to_string();

        Ok(vec![
            AnimationChannel::MmdCameraDistance {
                camera: camera.clone(),
                sampler: Sampler::new(
                    indexer.clone(),
                    KeyframeData::single(keyframes.iter().map(|k| k.distance * scale).collect()),
                    curves(4..5, 1)?,
                )?,
            },
            AnimationChannel::MmdCameraTarget {
                camera: camera.clone(),
                sampler: Sampler::new(
                    indexer.clone(),
                    KeyframeData::single(
                        keyframes
                            .iter()
                            .map(|k| Vec3::new(-k.target.x, k.target.y, -k.target.z) * scale)
                            .collect(),
                    ),
                    curves(0..3, 3)?,
                )?,
            },
            AnimationChannel::MmdCameraRotation {
                camera: camera.clone(),
                sampler: Sampler::new(
                    indexer.clone(),
                    KeyframeData::single(
                        keyframes
                            .iter()
                            .map(|k| Vec3::new(k.rotation.x, PI + k.rotation.y, k.rotation.z))
                            .collect(),
                    ),
                    curves(3..4, 1)?,
                )?,
            },
            AnimationChannel::CameraFov {
                camera,
                sampler: Sampler::new(
                    indexer,
                    KeyframeData::single(keyframes.iter().map(|k| (k.fov as f32).to_radians()).collect()),
                    curves(5..6, 1)?,
                )?,
            },
        ])
    }
}

/// 按名称分组，组的顺序为名称首次出现的顺序
fn group_by_name<'a, T>(items: &'a [T], name: impl Fn(&'a T) -> &'a String) -> Vec<(&'a str, Vec<&'a T>)> {
    let mut groups: Vec<(&'a str, Vec<&'a T>)> = Vec::new();
    let mut lookup: HashMap<&'a str, usize> = HashMap::new();
    for item in items {
        let key = name(item).as_str();
        let index = *lookup.entry(key).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[index].1.push(item);
    }
    groups
}

fn frame_indexer(frames: impl Iterator<Item = u32>, frame_time: f32) -> Result<KeyframeIndexer> {
    KeyframeIndexer::new(frames.map(|frame| frame as f32 * frame_time).collect())
}

/// VMD 动作文件加载器
pub struct VmdLoader;

impl ModelFileLoader for VmdLoader {
    fn name(&self) -> &'static str {
        "vmd"
    }

    fn extensions(&self) -> &'static [(&'static str, Ability)] {
        EXTENSIONS
    }

    fn probe_length(&self) -> Option<usize> {
        Some(NEW_SIGNATURE.len())
    }

    fn probe(&self, buffer: &[u8]) -> bool {
        buffer.starts_with(OLD_SIGNATURE) || buffer.starts_with(NEW_SIGNATURE)
    }

    fn load(&self, path: &Path, _base_path: &Path) -> Result<LoadResult> {
        let config = get_config();
        let file = VmdFile::load(path, config.model_read_limit)?;
        let mut animation = file.to_animation(config.vmd_frame_time, config.mmd_scale)?;
        animation.name = path.file_stem().map(|stem| stem.to_string_lossy().into_owned());

        log::debug!(
            "VMD 解析完成: {} 个骨骼关键帧, {} 个表情关键帧, {} 个相机关键帧, {} 条通道, 时长 {:.3}s",
            file.bone_keyframes.len(),
            file.face_keyframes.len(),
            file.camera_keyframes.len(),
            animation.channels.len(),
            animation.duration()
        );

        Ok(LoadResult {
            metadata: None,
            model: None,
            animations: vec![animation],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::FindResult;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn header(signature: &[u8], name_length: usize) -> Vec<u8> {
        let mut data = signature.to_vec();
        data.resize(SIGNATURE_FIELD_LENGTH, 0);
        data.resize(SIGNATURE_FIELD_LENGTH + name_length, 0);
        data
    }

    fn write_name(data: &mut Vec<u8>, name: &str) {
        let (encoded, _, _) = SHIFT_JIS.encode(name);
        let mut field = encoded.into_owned();
        field.resize(NAME_LENGTH, 0);
        data.extend_from_slice(&field);
    }

    fn write_bone(data: &mut Vec<u8>, name: &str, frame: u32, translation: [f32; 3]) {
        write_name(data, name);
        data.write_u32::<LittleEndian>(frame).unwrap();
        for value in translation {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        for value in [0.0, 0.0, 0.0, 1.0] {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        let mut interpolation = [0u8; 64];
        interpolation[..8].fill(20);
        interpolation[8..16].fill(107);
        data.extend_from_slice(&interpolation);
    }

    #[test]
    fn test_bad_signature() {
        let data = header(b"Vocaloid Motion Data 0003", 20);
        assert!(matches!(VmdFile::parse(&data), Err(ModelError::MalformedSignature(_))));
    }

    #[test]
    fn test_old_format_header() {
        let mut data = header(OLD_SIGNATURE, 10);
        data.write_i32::<LittleEndian>(0).unwrap();
        let file = VmdFile::parse(&data).unwrap();
        assert!(!file.is_new_format);
        assert!(file.bone_keyframes.is_empty());
        assert!(file.face_keyframes.is_empty());
    }

    #[test]
    fn test_model_name_must_decode() {
        let mut data = header(NEW_SIGNATURE, 20);
        data.write_i32::<LittleEndian>(0).unwrap();
        data[SIGNATURE_FIELD_LENGTH..SIGNATURE_FIELD_LENGTH + 2].copy_from_slice(&[0x81, 0x00]);
        assert!(matches!(VmdFile::parse(&data), Err(ModelError::InvalidEncoding(_))));

        let mut data = header(NEW_SIGNATURE, 0);
        let (name, _, _) = SHIFT_JIS.encode("初音ミク");
        data.extend_from_slice(&name);
        data.resize(SIGNATURE_FIELD_LENGTH + 20, 0);
        data.write_i32::<LittleEndian>(0).unwrap();
        assert_eq!(VmdFile::parse(&data).unwrap().model_name, "初音ミク");
    }

    #[test]
    fn test_truncated_bone_section() {
        let mut data = header(NEW_SIGNATURE, 20);
        data.write_i32::<LittleEndian>(2).unwrap();
        write_bone(&mut data, "センター", 0, [0.0; 3]);
        assert!(matches!(VmdFile::parse(&data), Err(ModelError::UnexpectedEof(_))));
    }

    #[test]
    fn test_bones_grouped_and_sorted() {
        let mut data = header(NEW_SIGNATURE, 20);
        data.write_i32::<LittleEndian>(3).unwrap();
        write_bone(&mut data, "センター", 24, [0.0, 1.0, 2.0]);
        write_bone(&mut data, "頭", 0, [0.0; 3]);
        write_bone(&mut data, "センター", 0, [0.0; 3]);
        data.write_i32::<LittleEndian>(1).unwrap();
        write_name(&mut data, "まばたき");
        data.write_u32::<LittleEndian>(12).unwrap();
        data.write_f32::<LittleEndian>(1.0).unwrap();

        let file = VmdFile::parse(&data).unwrap();
        assert_eq!(file.bone_keyframes.len(), 3);
        assert!(file.camera_keyframes.is_empty());

        let animation = file.to_animation(1.0 / 24.0, 0.1).unwrap();
        // 两根骨骼各两条通道 + 一条表情通道
        assert_eq!(animation.channels.len(), 5);
        assert!((animation.duration() - 1.0).abs() < 1e-6);

        let AnimationChannel::Translation {
            target,
            sampler,
            relative,
        } = &animation.channels[0]
        else {
            panic!("first channel should be a translation");
        };
        assert!(*relative);
        assert_eq!(target.node_name.as_deref(), Some("センター"));
        assert_eq!(target.humanoid_tag, Some(HumanoidTag::Hips));
        let mut cursor = FindResult::default();
        let mut value = Vec3::ZERO;
        sampler.sample(1.0, &mut cursor, &mut value);
        assert!(value.abs_diff_eq(Vec3::new(0.0, 1.0, -2.0), 1e-6));

        let AnimationChannel::Expression { target, .. } = &animation.channels[4] else {
            panic!("last channel should be an expression");
        };
        assert_eq!(target.tag, Some(ExpressionTag::Blink));
    }

    #[test]
    fn test_camera_channels() {
        let mut data = header(NEW_SIGNATURE, 20);
        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_i32::<LittleEndian>(0).unwrap();
        data.write_i32::<LittleEndian>(1).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_f32::<LittleEndian>(-45.0).unwrap();
        for value in [1.0, 10.0, 2.0, 0.0, 0.0, 0.0] {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        for _ in 0..6 {
            data.extend_from_slice(&[20, 107, 20, 107]);
        }
        data.write_u32::<LittleEndian>(30).unwrap();
        data.write_u8(0).unwrap();

        let file = VmdFile::parse(&data).unwrap();
        let camera = &file.camera_keyframes[0];
        assert_eq!(camera.curves[0], [20, 20, 107, 107]);
        assert!(camera.perspective);

        let animation = file.to_animation(1.0 / 24.0, 0.1).unwrap();
        assert_eq!(animation.channels.len(), 4);
        let mut cursor = FindResult::default();
        for channel in &animation.channels {
            match channel {
                AnimationChannel::MmdCameraDistance { camera, sampler } => {
                    assert_eq!(camera, MMD_CAMERA_NAME);
                    let mut distance = 0.0;
                    sampler.sample(0.0, &mut cursor, &mut distance);
                    assert!((distance + 4.5).abs() < 1e-5);
                }
                AnimationChannel::MmdCameraTarget { sampler, .. } => {
                    let mut target = Vec3::ZERO;
                    sampler.sample(0.0, &mut cursor, &mut target);
                    assert!(target.abs_diff_eq(Vec3::new(-0.1, 1.0, -0.2), 1e-5));
                }
                AnimationChannel::MmdCameraRotation { sampler, .. } => {
                    let mut rotation = Vec3::ZERO;
                    sampler.sample(0.0, &mut cursor, &mut rotation);
                    assert!((rotation.y - PI).abs() < 1e-5);
                }
                AnimationChannel::CameraFov { sampler, .. } => {
                    let mut fov = 0.0;
                    sampler.sample(0.0, &mut cursor, &mut fov);
                    assert!((fov - 30f32.to_radians()).abs() < 1e-5);
                }
                other => panic!("unexpected {} channel", other.kind()),
            }
        }
    }

    #[test]
    fn test_probe() {
        let loader = VmdLoader;
        assert!(loader.probe(b"Vocaloid Motion Data file\0\0\0\0\0"));
        assert!(!loader.probe(b"Vocaloid Motion Data 0001\0\0\0\0\0"));
    }
}
