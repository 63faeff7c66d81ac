//! glTF 对象图到统一模型的转换
//!
//! 按依赖顺序逐层构建：缓冲 → 缓冲视图 → 访问器 → 图片 / 采样器 → 纹理 → 材质 → 网格
//! → 相机 / 蒙皮 → 节点树 → 场景 → 动画 → 表情 / 元数据。
//! 所有下标引用都在构建时检查，越界报 UnresolvedReference。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use glam::{Mat4, Quat, Vec3, Vec4};

use super::schema::{
    AttributeName, Gltf, GltfAccessor, GltfAnimation, GltfCamera, GltfMaterial, GltfNode, GltfPrimitive, GltfSampler,
    GltfSparse, GltfTextureInfo,
};
use super::vrm::humanoid_mapping;
use crate::animation::{
    Animation, AnimationChannel, Interpolation, KeyframeData, KeyframeIndexer, NodeTarget, Sampler as AnimationSampler,
};
use crate::config::LoaderConfig;
use crate::loader::LoadResult;
use crate::model::{
    Accessor, AccessorType, AlphaMode, Buffer, BufferView, Camera, ComponentType, Expression, HumanoidTag, MagFilter,
    Material, Mesh, MeshId, Metadata, MinFilter, Mode, Model, ModelId, MorphTarget, Node, NodeComponent, NodeId,
    NodeTransform, PbrMaterial, Primitive, Sampler, Scene, Skin, Texture, TextureInfo, TextureType, UnlitMaterial,
    VertexAttributes, WrapMode,
};
use crate::util::{map_or_buffer_region, open_case_insensitive, MappedBuffer};
use crate::{ModelError, Result};

const SUPPORTED_EXTENSIONS: &[&str] = &["KHR_materials_unlit", "VRM", "VRMC_vrm"];

/// 纹理未指定采样器时使用
const DEFAULT_TEXTURE_SAMPLER: Sampler = Sampler {
    mag_filter: MagFilter::Linear,
    min_filter: MinFilter::Linear,
    wrap_s: WrapMode::Repeat,
    wrap_t: WrapMode::Repeat,
};

fn missing(what: &str, index: usize) -> ModelError {
    ModelError::UnresolvedReference(format!("{} {} not found", what, index))
}

fn lookup<'t, T>(items: &'t [T], index: usize, what: &str) -> Result<&'t T> {
    items.get(index).ok_or_else(|| missing(what, index))
}

/// 解析 `data:[<mime>];base64,<payload>`，返回 (mime, 字节)
pub(crate) fn decode_data_uri(uri: &str) -> Result<(Option<String>, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ModelError::InvalidEncoding(format!("not a data URI: {}", uri)))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ModelError::InvalidEncoding("data URI without payload".to_string()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| ModelError::InvalidEncoding(format!("unsupported data URI encoding: {}", header)))?;
    let data = STANDARD
        .decode(payload)
        .map_err(|err| ModelError::InvalidEncoding(format!("bad base64 in data URI: {}", err)))?;
    Ok((Some(mime.to_string()).filter(|mime| !mime.is_empty()), data))
}

/// 把相对 URI（可能含 %XX 转义）解析为 base_path 下的路径
pub(crate) fn uri_to_path(base_path: &Path, uri: &str) -> Result<PathBuf> {
    if uri.contains("://") || uri.starts_with('/') {
        return Err(ModelError::UnresolvedReference(format!("only relative URIs are supported: {}", uri)));
    }
    let bytes = uri.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| ModelError::InvalidEncoding(format!("bad percent escape in URI: {}", uri)))?;
            decoded.push(hex);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    let decoded = String::from_utf8(decoded).map_err(|_| ModelError::InvalidEncoding(format!("URI is not UTF-8: {}", uri)))?;
    Ok(decoded
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .fold(base_path.to_path_buf(), |path, part| path.join(part)))
}

fn component_type(code: u32) -> Result<ComponentType> {
    ComponentType::from_gl(code).ok_or_else(|| ModelError::SchemaViolation(format!("bad component type {}", code)))
}

fn mag_filter(code: Option<u32>) -> Result<MagFilter> {
    match code {
        None | Some(9729) => Ok(MagFilter::Linear),
        Some(9728) => Ok(MagFilter::Nearest),
        Some(code) => Err(ModelError::SchemaViolation(format!("bad mag filter {}", code))),
    }
}

fn min_filter(code: Option<u32>) -> Result<MinFilter> {
    match code {
        None | Some(9985) => Ok(MinFilter::LinearMipmapNearest),
        Some(9728) => Ok(MinFilter::Nearest),
        Some(9729) => Ok(MinFilter::Linear),
        Some(9984) => Ok(MinFilter::NearestMipmapNearest),
        Some(9986) => Ok(MinFilter::NearestMipmapLinear),
        Some(9987) => Ok(MinFilter::LinearMipmapLinear),
        Some(code) => Err(ModelError::SchemaViolation(format!("bad min filter {}", code))),
    }
}

fn wrap_mode(code: Option<u32>) -> Result<WrapMode> {
    match code {
        None | Some(10497) => Ok(WrapMode::Repeat),
        Some(33071) => Ok(WrapMode::ClampToEdge),
        Some(33648) => Ok(WrapMode::MirroredRepeat),
        Some(code) => Err(ModelError::SchemaViolation(format!("bad wrap mode {}", code))),
    }
}

fn alpha_mode(name: &str) -> Result<AlphaMode> {
    match name {
        "OPAQUE" => Ok(AlphaMode::Opaque),
        "MASK" => Ok(AlphaMode::Mask),
        "BLEND" => Ok(AlphaMode::Blend),
        _ => Err(ModelError::SchemaViolation(format!("bad alpha mode {}", name))),
    }
}

fn camera(camera: &GltfCamera) -> Result<Camera> {
    match (camera.camera_type.as_str(), &camera.perspective, &camera.orthographic) {
        ("perspective", Some(perspective), _) => {
            if perspective.yfov <= 0.0 || perspective.znear <= 0.0 {
                return Err(ModelError::SchemaViolation(format!(
                    "bad perspective camera: yfov {}, znear {}",
                    perspective.yfov, perspective.znear
                )));
            }
            Ok(Camera::Perspective {
                name: camera.name.clone(),
                aspect_ratio: perspective.aspect_ratio,
                yfov: perspective.yfov,
                zfar: perspective.zfar,
                znear: perspective.znear,
            })
        }
        ("orthographic", _, Some(orthographic)) => {
            if orthographic.zfar <= orthographic.znear {
                return Err(ModelError::SchemaViolation(
                    "orthographic camera zfar must be greater than znear".to_string(),
                ));
            }
            Ok(Camera::Orthographic {
                name: camera.name.clone(),
                xmag: orthographic.xmag,
                ymag: orthographic.ymag,
                zfar: orthographic.zfar,
                znear: orthographic.znear,
            })
        }
        (camera_type, _, _) => Err(ModelError::SchemaViolation(format!(
            "camera type {} and properties mismatch",
            camera_type
        ))),
    }
}

fn node_transform(node: &GltfNode) -> Option<NodeTransform> {
    if let Some(matrix) = &node.matrix {
        return Some(NodeTransform::Matrix(Mat4::from_cols_array(matrix)));
    }
    if node.translation.is_none() && node.rotation.is_none() && node.scale.is_none() {
        return None;
    }
    Some(NodeTransform::Decomposed {
        translation: node.translation.map_or(Vec3::ZERO, Vec3::from_array),
        rotation: node.rotation.map_or(Quat::IDENTITY, Quat::from_array),
        scale: node.scale.map_or(Vec3::ONE, Vec3::from_array),
    })
}

/// 把 {下标: 值} 展开为连续列表，中间缺号视为错误
fn dense<T>(map: BTreeMap<usize, T>, what: &str) -> Result<Vec<T>> {
    let count = map.len();
    map.into_iter()
        .enumerate()
        .map(|(expected, (index, value))| {
            if index == expected {
                Ok(value)
            } else {
                Err(ModelError::SchemaViolation(format!(
                    "{} set {} is missing ({} sets declared)",
                    what, expected, count
                )))
            }
        })
        .collect()
}

/// 动画输出允许的分量类型
fn check_animation_output(accessor: &Accessor, path: &str, accessor_type: AccessorType, allow_normalized: bool) -> Result<()> {
    let component_ok = match (accessor.component_type, accessor.normalized) {
        (ComponentType::Float, false) => true,
        (
            ComponentType::Byte | ComponentType::UnsignedByte | ComponentType::Short | ComponentType::UnsignedShort,
            true,
        ) => allow_normalized,
        _ => false,
    };
    if !component_ok || accessor.accessor_type != accessor_type {
        return Err(ModelError::SchemaViolation(format!(
            "bad accessor for {} animation output: {:?}{} {:?}",
            path,
            accessor.component_type,
            if accessor.normalized { " (normalized)" } else { "" },
            accessor.accessor_type
        )));
    }
    Ok(())
}

/// 已解码的图片数据
struct ImageData {
    name: Option<String>,
    buffer_view: Option<Arc<BufferView>>,
    texture_type: Option<TextureType>,
}

impl ImageData {
    fn to_texture(&self, name: Option<String>, sampler: Sampler) -> Texture {
        Texture {
            name: name.or_else(|| self.name.clone()),
            buffer_view: self.buffer_view.clone(),
            texture_type: self.texture_type,
            sampler,
        }
    }
}

/// 构建中的节点：尚未处理的子节点与已完成的子树
struct NodeFrame<'a> {
    index: usize,
    node: &'a GltfNode,
    pending: std::slice::Iter<'a, usize>,
    children: Vec<Node>,
}

pub(crate) struct GltfBuilder<'a> {
    gltf: &'a Gltf,
    model_id: ModelId,
    base_path: &'a Path,
    config: &'a LoaderConfig,
    binary: Option<Arc<MappedBuffer>>,
    external: HashMap<String, Arc<MappedBuffer>>,
    buffers: Vec<Arc<Buffer>>,
    buffer_views: Vec<Arc<BufferView>>,
    accessors: Vec<Arc<Accessor>>,
    images: Vec<ImageData>,
    textures: Vec<Arc<Texture>>,
    materials: Vec<Arc<Material>>,
    meshes: Vec<Arc<Mesh>>,
    cameras: Vec<Camera>,
    skins: Vec<Arc<Skin>>,
    humanoid: HashMap<usize, HumanoidTag>,
}

impl<'a> GltfBuilder<'a> {
    /// binary 为 GLB 的 BIN 块，作为 0 号无 URI 缓冲
    pub fn new(gltf: &'a Gltf, binary: Option<MappedBuffer>, base_path: &'a Path, config: &'a LoaderConfig) -> Self {
        let humanoid = humanoid_mapping(gltf.extensions.vrm0.as_ref(), gltf.extensions.vrm1.as_ref());
        Self {
            gltf,
            model_id: ModelId::next(),
            base_path,
            config,
            binary: binary.map(Arc::new),
            external: HashMap::new(),
            buffers: Vec::new(),
            buffer_views: Vec::new(),
            accessors: Vec::new(),
            images: Vec::new(),
            textures: Vec::new(),
            materials: Vec::new(),
            meshes: Vec::new(),
            cameras: Vec::new(),
            skins: Vec::new(),
            humanoid,
        }
    }

    pub fn build(mut self) -> Result<LoadResult> {
        self.check_asset()?;
        self.load_buffers()?;
        self.load_buffer_views()?;
        self.load_accessors()?;
        self.load_images()?;
        self.load_textures()?;
        self.load_materials()?;
        self.load_meshes()?;
        self.cameras = self.gltf.cameras.iter().map(camera).collect::<Result<_>>()?;
        self.load_skins()?;
        let scenes = self.load_scenes()?;
        let animations = self
            .gltf
            .animations
            .iter()
            .map(|animation| self.load_animation(animation))
            .collect::<Result<Vec<_>>>()?;
        let expressions = self.load_expressions();
        let metadata = self.load_metadata();

        let model = Model::new(
            self.model_id,
            scenes,
            self.gltf.scene,
            self.skins.clone(),
            expressions,
        )?;

        log::debug!(
            "glTF 解析完成: 生成器 {:?}, {} 个网格, {} 个节点, {} 个蒙皮, {} 个表情, {} 个动画",
            self.gltf.asset.generator,
            self.meshes.len(),
            self.gltf.nodes.len(),
            self.skins.len(),
            model.expressions.len(),
            animations.len()
        );

        Ok(LoadResult {
            metadata,
            model: Some(model),
            animations,
        })
    }

    fn check_asset(&self) -> Result<()> {
        let asset = &self.gltf.asset;
        let required = asset.min_version.as_deref().unwrap_or(&asset.version);
        if required.split('.').next() != Some("2") {
            return Err(ModelError::SchemaViolation(format!(
                "unsupported glTF version {} (min {:?})",
                asset.version, asset.min_version
            )));
        }
        for extension in &self.gltf.extensions_required {
            if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
                log::warn!("不支持的必需扩展 {}，渲染结果可能不正确", extension);
            }
        }
        Ok(())
    }

    fn load_uri(&mut self, uri: &str, size_limit: u64) -> Result<Arc<MappedBuffer>> {
        if let Some(data) = self.external.get(uri) {
            return Ok(data.clone());
        }
        let data = if uri.starts_with("data:") {
            MappedBuffer::Owned(decode_data_uri(uri)?.1)
        } else {
            let file = open_case_insensitive(&uri_to_path(self.base_path, uri)?)?;
            let length = file.metadata()?.len();
            map_or_buffer_region(&file, 0, length, size_limit)?
        };
        let data = Arc::new(data);
        self.external.insert(uri.to_string(), data.clone());
        Ok(data)
    }

    fn load_buffers(&mut self) -> Result<()> {
        let gltf = self.gltf;
        for (index, buffer) in gltf.buffers.iter().enumerate() {
            if buffer.byte_length == 0 {
                return Err(ModelError::SchemaViolation(format!("buffer {} is empty", index)));
            }
            let (name, data) = if let Some(uri) = &buffer.uri {
                let limit = self.config.glb_binary_read_limit;
                (Some(uri.clone()), self.load_uri(uri, limit)?)
            } else if let (0, Some(binary)) = (index, &self.binary) {
                (Some("GLB built-in buffer".to_string()), binary.clone())
            } else {
                return Err(ModelError::UnresolvedReference(format!("buffer {} has no URI", index)));
            };
            if data.len() < buffer.byte_length {
                return Err(ModelError::UnexpectedEof(format!(
                    "buffer {} declares {} bytes, but only {} are available",
                    index,
                    buffer.byte_length,
                    data.len()
                )));
            }
            self.buffers.push(Arc::new(Buffer::new(buffer.name.clone().or(name), data)));
        }
        Ok(())
    }

    fn load_buffer_views(&mut self) -> Result<()> {
        for (index, view) in self.gltf.buffer_views.iter().enumerate() {
            if view.byte_length == 0 {
                return Err(ModelError::SchemaViolation(format!("buffer view {} is empty", index)));
            }
            let buffer = lookup(&self.buffers, view.buffer, "buffer")?.clone();
            let view = BufferView::new(buffer, view.byte_offset, view.byte_length, view.byte_stride.unwrap_or(0))?;
            self.buffer_views.push(Arc::new(view));
        }
        Ok(())
    }

    fn load_accessors(&mut self) -> Result<()> {
        for (index, accessor) in self.gltf.accessors.iter().enumerate() {
            let loaded = self.load_accessor(index, accessor)?;
            self.accessors.push(Arc::new(loaded));
        }
        Ok(())
    }

    fn load_accessor(&self, index: usize, accessor: &GltfAccessor) -> Result<Accessor> {
        let component_type = component_type(accessor.component_type)?;
        let accessor_type = AccessorType::from_name(&accessor.accessor_type)
            .ok_or_else(|| ModelError::SchemaViolation(format!("bad accessor type {}", accessor.accessor_type)))?;
        let view = accessor
            .buffer_view
            .map(|view| lookup(&self.buffer_views, view, "buffer view").cloned())
            .transpose()?;
        let loaded = Accessor::new(
            view,
            accessor.byte_offset,
            component_type,
            accessor.normalized,
            accessor.count,
            accessor_type,
        )?;
        let loaded = match &accessor.sparse {
            Some(sparse) => self.densify(index, loaded, sparse)?,
            None => loaded,
        };
        Ok(loaded
            .with_name(accessor.name.clone())
            .with_bounds(accessor.min.clone(), accessor.max.clone()))
    }

    /// 稀疏访问器展开为一份紧密排列的新缓冲
    fn densify(&self, index: usize, base: Accessor, sparse: &GltfSparse) -> Result<Accessor> {
        let element_length = base.element_length();
        let mut data = vec![0u8; base.count * element_length];
        if let Some(view) = &base.buffer_view {
            let bytes = view.bytes();
            for (element, chunk) in data.chunks_exact_mut(element_length).enumerate() {
                let start = base.byte_offset + element * base.stride();
                chunk.copy_from_slice(&bytes[start..start + element_length]);
            }
        }

        let index_type = component_type(sparse.indices.component_type)?;
        if !matches!(
            index_type,
            ComponentType::UnsignedByte | ComponentType::UnsignedShort | ComponentType::UnsignedInt
        ) {
            return Err(ModelError::SchemaViolation(format!(
                "bad sparse index type {:?} in accessor {}",
                index_type, index
            )));
        }
        let indices = Accessor::new(
            Some(lookup(&self.buffer_views, sparse.indices.buffer_view, "buffer view")?.clone()),
            sparse.indices.byte_offset,
            index_type,
            false,
            sparse.count,
            AccessorType::Scalar,
        )?;
        let values_view = lookup(&self.buffer_views, sparse.values.buffer_view, "buffer view")?;
        let values_end = sparse.values.byte_offset + sparse.count * element_length;
        let values = values_view.bytes().get(sparse.values.byte_offset..values_end).ok_or_else(|| {
            ModelError::UnresolvedReference(format!(
                "sparse values of accessor {} need {} bytes, but buffer view only has {}",
                index, values_end, values_view.byte_length
            ))
        })?;

        for (item, value) in values.chunks_exact(element_length).enumerate() {
            let target = indices.read_u32(item, 0) as usize;
            if target >= base.count {
                return Err(ModelError::UnresolvedReference(format!(
                    "sparse index {} out of accessor {} count {}",
                    target, index, base.count
                )));
            }
            data[target * element_length..(target + 1) * element_length].copy_from_slice(value);
        }

        let length = data.len();
        let buffer = Arc::new(Buffer::from_vec(Some(format!("Sparse accessor {}", index)), data));
        let view = Arc::new(BufferView::new(buffer, 0, length, 0)?);
        Accessor::new(
            Some(view),
            0,
            base.component_type,
            base.normalized,
            base.count,
            base.accessor_type,
        )
    }

    fn load_images(&mut self) -> Result<()> {
        let gltf = self.gltf;
        for image in &gltf.images {
            let mut mime_type = image.mime_type.clone();
            let buffer_view = match (&image.buffer_view, &image.uri) {
                (Some(view), _) => Some(lookup(&self.buffer_views, *view, "buffer view")?.clone()),
                (None, Some(uri)) if uri.starts_with("data:") => {
                    let (uri_mime, data) = decode_data_uri(uri)?;
                    mime_type = mime_type.or(uri_mime);
                    let length = data.len();
                    let buffer = Arc::new(Buffer::from_vec(image.name.clone(), data));
                    Some(Arc::new(BufferView::new(buffer, 0, length, 0)?))
                }
                (None, Some(uri)) if self.config.load_textures => {
                    let limit = self.config.texture_read_limit;
                    match self.load_uri(uri, limit) {
                        Ok(data) => {
                            let length = data.len();
                            let buffer = Arc::new(Buffer::new(Some(uri.clone()), data));
                            Some(Arc::new(BufferView::new(buffer, 0, length, 0)?))
                        }
                        Err(err) => {
                            log::warn!("无法加载图片 {}: {}", uri, err);
                            None
                        }
                    }
                }
                (None, _) => None,
            };
            let texture_type = mime_type
                .as_deref()
                .and_then(TextureType::from_mime_type)
                .or_else(|| buffer_view.as_ref().and_then(|view| TextureType::from_magic(view.bytes())));
            self.images.push(ImageData {
                name: image.name.clone(),
                buffer_view,
                texture_type,
            });
        }
        Ok(())
    }

    fn sampler(sampler: &GltfSampler) -> Result<Sampler> {
        Ok(Sampler {
            mag_filter: mag_filter(sampler.mag_filter)?,
            min_filter: min_filter(sampler.min_filter)?,
            wrap_s: wrap_mode(sampler.wrap_s)?,
            wrap_t: wrap_mode(sampler.wrap_t)?,
        })
    }

    fn load_textures(&mut self) -> Result<()> {
        let samplers = self.gltf.samplers.iter().map(Self::sampler).collect::<Result<Vec<_>>>()?;
        for texture in &self.gltf.textures {
            let sampler = match texture.sampler {
                Some(index) => *lookup(&samplers, index, "sampler")?,
                None => DEFAULT_TEXTURE_SAMPLER,
            };
            let loaded = match texture.source {
                Some(index) => lookup(&self.images, index, "image")?.to_texture(texture.name.clone(), sampler),
                None => Texture {
                    name: texture.name.clone(),
                    buffer_view: None,
                    texture_type: None,
                    sampler,
                },
            };
            self.textures.push(Arc::new(loaded));
        }
        Ok(())
    }

    fn texture_info(&self, info: &Option<GltfTextureInfo>) -> Result<Option<TextureInfo>> {
        info.as_ref()
            .map(|info| {
                Ok(TextureInfo {
                    texture: lookup(&self.textures, info.index, "texture")?.clone(),
                    texcoord: info.tex_coord,
                })
            })
            .transpose()
    }

    fn material(&self, material: &GltfMaterial) -> Result<Material> {
        let pbr = &material.pbr_metallic_roughness;
        let base_color = Vec4::from_array(pbr.base_color_factor);
        let alpha_mode = alpha_mode(&material.alpha_mode)?;
        if material.extensions.unlit.is_some() {
            return Ok(Material::Unlit(UnlitMaterial {
                name: material.name.clone(),
                base_color,
                base_color_texture: self.texture_info(&pbr.base_color_texture)?,
                alpha_mode,
                alpha_cutoff: material.alpha_cutoff,
                double_sided: material.double_sided,
            }));
        }
        Ok(Material::Pbr(PbrMaterial {
            name: material.name.clone(),
            base_color,
            base_color_texture: self.texture_info(&pbr.base_color_texture)?,
            metallic_factor: pbr.metallic_factor,
            roughness_factor: pbr.roughness_factor,
            metallic_roughness_texture: self.texture_info(&pbr.metallic_roughness_texture)?,
            normal_texture: self.texture_info(&material.normal_texture)?,
            occlusion_texture: self.texture_info(&material.occlusion_texture)?,
            emissive_texture: self.texture_info(&material.emissive_texture)?,
            emissive_factor: Vec3::from_array(material.emissive_factor),
            alpha_mode,
            alpha_cutoff: material.alpha_cutoff,
            double_sided: material.double_sided,
        }))
    }

    fn load_materials(&mut self) -> Result<()> {
        self.materials = self
            .gltf
            .materials
            .iter()
            .map(|material| self.material(material).map(Arc::new))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn accessor(&self, index: usize) -> Result<Arc<Accessor>> {
        lookup(&self.accessors, index, "accessor").cloned()
    }

    fn primitive(&self, primitive: &GltfPrimitive, weights: Option<&[f32]>) -> Result<Primitive> {
        let mut position = None;
        let mut normal = None;
        let mut tangent = None;
        let mut texcoords = BTreeMap::new();
        let mut colors = BTreeMap::new();
        let mut joints = BTreeMap::new();
        let mut skin_weights = BTreeMap::new();
        for (name, &index) in &primitive.attributes {
            let accessor = self.accessor(index)?;
            match AttributeName::parse(name) {
                Some(AttributeName::Position) => position = Some(accessor),
                Some(AttributeName::Normal) => normal = Some(accessor),
                Some(AttributeName::Tangent) => tangent = Some(accessor),
                Some(AttributeName::Texcoord(set)) => {
                    texcoords.insert(set, accessor);
                }
                Some(AttributeName::Color(set)) => {
                    colors.insert(set, accessor);
                }
                Some(AttributeName::Joints(set)) => {
                    joints.insert(set, accessor);
                }
                Some(AttributeName::Weights(set)) => {
                    skin_weights.insert(set, accessor);
                }
                None if name.starts_with('_') => log::debug!("忽略自定义顶点属性 {}", name),
                None => log::warn!("未知的顶点属性 {}", name),
            }
        }
        let position =
            position.ok_or_else(|| ModelError::SchemaViolation("no POSITION attribute in primitive".to_string()))?;
        let attributes = VertexAttributes {
            normal,
            tangent,
            texcoords: dense(texcoords, "TEXCOORD")?,
            colors: dense(colors, "COLOR")?,
            joints: dense(joints, "JOINTS")?,
            weights: dense(skin_weights, "WEIGHTS")?,
            ..VertexAttributes::new(position)
        };

        let targets = primitive
            .targets
            .iter()
            .map(|target| self.morph_target(target))
            .collect::<Result<Vec<_>>>()?;

        let indices = primitive.indices.map(|index| self.accessor(index)).transpose()?;
        if let Some(indices) = &indices {
            let integer = matches!(
                indices.component_type,
                ComponentType::UnsignedByte | ComponentType::UnsignedShort | ComponentType::UnsignedInt
            );
            if !integer || indices.normalized || indices.accessor_type != AccessorType::Scalar {
                return Err(ModelError::SchemaViolation(format!(
                    "bad index accessor: {:?} {:?}",
                    indices.component_type, indices.accessor_type
                )));
            }
        }
        let mode = Mode::from_gl(primitive.mode)
            .ok_or_else(|| ModelError::SchemaViolation(format!("bad primitive mode {}", primitive.mode)))?;
        let material = primitive
            .material
            .map(|index| lookup(&self.materials, index, "material").cloned())
            .transpose()?;

        Primitive::with_targets(mode, material, attributes, indices, targets, weights)
    }

    fn morph_target(&self, target: &BTreeMap<String, usize>) -> Result<MorphTarget> {
        let mut morph = MorphTarget::default();
        let mut texcoords = BTreeMap::new();
        let mut colors = BTreeMap::new();
        for (name, &index) in target {
            let accessor = self.accessor(index)?;
            match AttributeName::parse(name) {
                Some(AttributeName::Position) => morph.position = Some(accessor),
                Some(AttributeName::Normal) => morph.normal = Some(accessor),
                Some(AttributeName::Tangent) => morph.tangent = Some(accessor),
                Some(AttributeName::Texcoord(set)) => {
                    texcoords.insert(set, accessor);
                }
                Some(AttributeName::Color(set)) => {
                    colors.insert(set, accessor);
                }
                _ => log::warn!("形变目标不支持属性 {}", name),
            }
        }
        morph.texcoords = dense(texcoords, "TEXCOORD")?;
        morph.colors = dense(colors, "COLOR")?;
        Ok(morph)
    }

    fn load_meshes(&mut self) -> Result<()> {
        for (index, mesh) in self.gltf.meshes.iter().enumerate() {
            let primitives = mesh
                .primitives
                .iter()
                .map(|primitive| self.primitive(primitive, mesh.weights.as_deref()))
                .collect::<Result<Vec<_>>>()?;
            self.meshes.push(Arc::new(Mesh {
                id: MeshId::new(self.model_id, index),
                primitives,
                weights: mesh.weights.clone(),
            }));
        }
        Ok(())
    }

    fn load_skins(&mut self) -> Result<()> {
        for (index, skin) in self.gltf.skins.iter().enumerate() {
            if skin.joints.is_empty() {
                return Err(ModelError::SchemaViolation(format!("skin {} has no joints", index)));
            }
            if let Some(&joint) = skin.joints.iter().find(|&&joint| joint >= self.gltf.nodes.len()) {
                return Err(missing("joint node", joint));
            }
            let inverse_bind_matrices = match skin.inverse_bind_matrices {
                Some(accessor) => {
                    let accessor = self.accessor(accessor)?;
                    if accessor.component_type != ComponentType::Float || accessor.accessor_type != AccessorType::Mat4 {
                        return Err(ModelError::SchemaViolation(format!(
                            "inverse bind matrices of skin {} must be FLOAT MAT4",
                            index
                        )));
                    }
                    if accessor.count != skin.joints.len() {
                        return Err(ModelError::SchemaViolation(format!(
                            "skin {} has {} joints but {} inverse bind matrices",
                            index,
                            skin.joints.len(),
                            accessor.count
                        )));
                    }
                    Some(accessor.to_f32_vec().chunks_exact(16).map(Mat4::from_cols_slice).collect())
                }
                None => None,
            };
            let skin = Skin::new(
                skin.name.clone(),
                skin.joints.iter().map(|&joint| NodeId::new(self.model_id, joint)).collect(),
                inverse_bind_matrices,
                skin.joints.iter().map(|joint| self.humanoid.get(joint).copied()).collect(),
            )?;
            self.skins.push(Arc::new(skin));
        }
        Ok(())
    }

    /// 节点入栈：检查环并标记为在当前路径上
    fn enter_node(&self, index: usize, visiting: &mut [bool]) -> Result<NodeFrame<'a>> {
        let gltf = self.gltf;
        let node = lookup(&gltf.nodes, index, "node")?;
        if visiting[index] {
            return Err(ModelError::SchemaViolation(format!("node {} is its own ancestor", index)));
        }
        visiting[index] = true;
        Ok(NodeFrame {
            index,
            node,
            pending: node.children.iter(),
            children: Vec::with_capacity(node.children.len()),
        })
    }

    fn finish_node(&self, frame: NodeFrame<'a>, visiting: &mut [bool]) -> Result<Node> {
        let NodeFrame {
            index, node, children, ..
        } = frame;
        visiting[index] = false;

        let mut components = Vec::new();
        if let Some(mesh) = node.mesh {
            components.push(NodeComponent::Mesh(lookup(&self.meshes, mesh, "mesh")?.clone()));
        }
        if let Some(skin) = node.skin {
            components.push(NodeComponent::Skin(lookup(&self.skins, skin, "skin")?.clone()));
        }
        if let Some(camera) = node.camera {
            components.push(NodeComponent::Camera(lookup(&self.cameras, camera, "camera")?.clone()));
        }
        if node.weights.is_some() {
            log::debug!("节点 {} 的形变权重被忽略，使用网格默认权重", index);
        }

        Ok(Node::new(
            NodeId::new(self.model_id, index),
            node.name.clone(),
            node_transform(node),
            children,
            components,
        )?
        .with_humanoid_tag(self.humanoid.get(&index).copied()))
    }

    /// 后序构建各根节点的子树，用显式栈代替递归
    ///
    /// visiting 记录当前路径上的节点，用于发现环。
    fn build_nodes(&self, roots: &[usize], visiting: &mut [bool]) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(roots.len());
        for &root in roots {
            let mut stack = vec![self.enter_node(root, visiting)?];
            while let Some(mut frame) = stack.pop() {
                if let Some(&child) = frame.pending.next() {
                    stack.push(frame);
                    stack.push(self.enter_node(child, visiting)?);
                    continue;
                }
                let node = self.finish_node(frame, visiting)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => nodes.push(node),
                }
            }
        }
        Ok(nodes)
    }

    fn load_scenes(&self) -> Result<Vec<Scene>> {
        let gltf = self.gltf;
        let mut visiting = vec![false; gltf.nodes.len()];
        let mut build = |roots: &[usize]| -> Result<Scene> {
            Ok(Scene {
                nodes: self.build_nodes(roots, &mut visiting)?,
                initial_transform: None,
            })
        };
        if gltf.scenes.is_empty() && !gltf.nodes.is_empty() {
            let mut is_child = vec![false; gltf.nodes.len()];
            for child in gltf.nodes.iter().flat_map(|node| node.children.iter()) {
                if let Some(flag) = is_child.get_mut(*child) {
                    *flag = true;
                }
            }
            let roots: Vec<usize> = (0..gltf.nodes.len()).filter(|&index| !is_child[index]).collect();
            log::debug!("文件没有声明场景，以 {} 个根节点组成缺省场景", roots.len());
            return Ok(vec![build(&roots)?]);
        }
        gltf.scenes.iter().map(|scene| build(&scene.nodes)).collect()
    }

    fn load_animation(&self, animation: &GltfAnimation) -> Result<Animation> {
        let mut channels = Vec::new();
        for channel in &animation.channels {
            let Some(node_index) = channel.target.node else {
                log::debug!("跳过没有目标节点的动画通道");
                continue;
            };
            let node = lookup(&self.gltf.nodes, node_index, "animation target node")?;
            let sampler = lookup(&animation.samplers, channel.sampler, "animation sampler")?;
            let input = self.accessor(sampler.input)?;
            let output = self.accessor(sampler.output)?;
            if input.component_type != ComponentType::Float || input.accessor_type != AccessorType::Scalar {
                return Err(ModelError::SchemaViolation(
                    "animation input must be FLOAT SCALAR".to_string(),
                ));
            }
            let indexer = KeyframeIndexer::new(input.to_f32_vec())?;
            let interpolation = Interpolation::from_gltf(&sampler.interpolation).ok_or_else(|| {
                ModelError::SchemaViolation(format!("bad animation interpolation {}", sampler.interpolation))
            })?;
            let elements = interpolation.elements();
            let target = NodeTarget {
                node: Some(NodeId::new(self.model_id, node_index)),
                node_name: node.name.clone(),
                humanoid_tag: self
                    .humanoid
                    .get(&node_index)
                    .copied()
                    .or_else(|| node.name.as_deref().and_then(HumanoidTag::from_vrm_name)),
            };

            let path = channel.target.path.as_str();
            match path {
                "translation" | "scale" => {
                    check_animation_output(&output, path, AccessorType::Vec3, false)?;
                    let data = KeyframeData::vec3_from_components(&output.to_f32_vec(), elements)?;
                    let sampler = AnimationSampler::new(indexer, data, interpolation)?;
                    channels.push(if path == "translation" {
                        AnimationChannel::Translation {
                            target,
                            sampler,
                            relative: false,
                        }
                    } else {
                        AnimationChannel::Scale { target, sampler }
                    });
                }
                "rotation" => {
                    check_animation_output(&output, path, AccessorType::Vec4, true)?;
                    let data = KeyframeData::quat_from_components(&output.to_f32_vec(), elements)?;
                    let sampler = AnimationSampler::new(indexer, data, interpolation)?;
                    channels.push(AnimationChannel::Rotation {
                        target,
                        sampler,
                        relative: false,
                    });
                }
                "weights" => {
                    check_animation_output(&output, path, AccessorType::Scalar, true)?;
                    let slots = indexer.len() * elements;
                    if slots == 0 || output.count % slots != 0 {
                        return Err(ModelError::SchemaViolation(format!(
                            "{} weight values can't be split into {} keyframe slots",
                            output.count, slots
                        )));
                    }
                    // 输出按 [帧][值槽][形变目标] 排列，拆成每个形变目标一条通道
                    let targets = output.count / slots;
                    let values = output.to_f32_vec();
                    for morph_index in 0..targets {
                        let data = KeyframeData::new(
                            values.iter().skip(morph_index).step_by(targets).copied().collect(),
                            elements,
                        )?;
                        channels.push(AnimationChannel::MorphWeight {
                            target: target.clone(),
                            morph_index,
                            sampler: AnimationSampler::new(indexer.clone(), data, interpolation.clone())?,
                        });
                    }
                }
                _ => log::warn!("不支持的动画路径 {}", path),
            }
        }
        Ok(Animation::new(animation.name.clone(), channels))
    }

    fn load_expressions(&self) -> Vec<Expression> {
        let extensions = &self.gltf.extensions;
        if let Some(master) = extensions.vrm0.as_ref().and_then(|vrm| vrm.blend_shape_master.as_ref()) {
            return master.to_expressions(self.model_id, self.meshes.len());
        }
        if let Some(expressions) = extensions.vrm1.as_ref().and_then(|vrm| vrm.expressions.as_ref()) {
            return expressions.to_expressions(self.model_id, self.gltf.nodes.len());
        }
        Vec::new()
    }

    fn load_metadata(&self) -> Option<Metadata> {
        let extensions = &self.gltf.extensions;
        let metadata = if let Some(vrm) = &extensions.vrm0 {
            log::debug!("VRM 0.x 模型，导出器 {:?}", vrm.exporter_version);
            vrm.meta.as_ref().map(|meta| {
                let thumbnail = meta.texture.and_then(|index| self.textures.get(index).cloned());
                meta.to_metadata(thumbnail)
            })
        } else if let Some(vrm) = &extensions.vrm1 {
            log::debug!("VRM 1.x 模型，规范版本 {:?}", vrm.spec_version);
            vrm.meta.as_ref().map(|meta| {
                let thumbnail = meta
                    .thumbnail_image
                    .and_then(|index| self.images.get(index))
                    .map(|image| Arc::new(image.to_texture(None, Sampler::default())));
                meta.to_metadata(thumbnail)
            })
        } else {
            None
        };

        let copyright = self.gltf.asset.copyright.clone();
        match metadata {
            Some(mut metadata) => {
                if metadata.copyright_information.is_none() {
                    metadata.copyright_information = copyright;
                }
                Some(metadata)
            }
            None => copyright.map(|copyright| Metadata {
                copyright_information: Some(copyright),
                ..Default::default()
            }),
        }
    }
}

/// 从 JSON 文本构建；binary 为 GLB 的 BIN 块
pub(crate) fn load(json: &[u8], binary: Option<MappedBuffer>, base_path: &Path, config: &LoaderConfig) -> Result<LoadResult> {
    let gltf: Gltf = serde_json::from_slice(json)?;
    GltfBuilder::new(&gltf, binary, base_path, config).build()
}
