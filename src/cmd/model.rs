use std::{
    collections::BTreeMap,
    fs::{self, DirBuilder},
    io::Write,
    path::PathBuf,
};

use anyhow::{Context, Result};
use argh::FromArgs;
use gltf_json::{self as json, validation::USize64};
use json::validation::Checked::Valid;
use serde_json::json;
use tdslib::{
    convert::bounds,
    format::chunk::dump_chunks,
    import::{Dot3dsImporter, ImportOptions, Importer},
    scene::{MapMode, Mesh, Node, Scene, TextureKind, TextureRef},
    util::file::{DefaultIoSystem, IoSystem},
};

#[derive(FromArgs, PartialEq, Debug)]
/// process 3DS model files
#[argh(subcommand, name = "model")]
pub struct Args {
    #[argh(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Info(InfoArgs),
    Convert(ConvertArgs),
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// dumps the chunk tree and a scene summary
#[argh(subcommand, name = "info")]
pub struct InfoArgs {
    #[argh(positional)]
    /// input 3DS file
    input: PathBuf,
    #[argh(switch)]
    /// skip the chunk tree dump
    no_chunks: bool,
}

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// converts a 3DS file to glTF
#[argh(subcommand, name = "convert")]
pub struct ConvertArgs {
    #[argh(positional)]
    /// input 3DS file
    input: PathBuf,
    #[argh(positional)]
    /// output directory
    out_dir: PathBuf,
    #[argh(switch)]
    /// don't generate missing normals
    no_normals: bool,
    #[argh(switch)]
    /// keep texture transforms instead of baking them into UVs
    no_uv_bake: bool,
    #[argh(switch)]
    /// ignore the file's master scale
    no_scale: bool,
}

pub fn run(args: Args) -> Result<()> {
    match args.command {
        SubCommand::Info(c_args) => info(c_args),
        SubCommand::Convert(c_args) => convert(c_args),
    }
}

fn info(args: InfoArgs) -> Result<()> {
    let data = DefaultIoSystem.read(&args.input)?;
    if !args.no_chunks {
        let mut out = std::io::stdout().lock();
        dump_chunks(&mut out, &data, 0)?;
        out.flush()?;
    }
    let scene = Dot3dsImporter::default()
        .read_buffer(&data)
        .with_context(|| format!("Failed to import '{}'", args.input.display()))?;
    let vertices: usize = scene.meshes.iter().map(|m| m.positions.len()).sum();
    let faces: usize = scene.meshes.iter().map(|m| m.faces.len()).sum();
    log::info!(
        "{} meshes ({} vertices, {} faces), {} materials, {} nodes",
        scene.meshes.len(),
        vertices,
        faces,
        scene.materials.len(),
        scene.node_count()
    );
    if let Some((min, max)) = bounds(&scene) {
        log::info!(
            "Bounds: ({}, {}, {}) - ({}, {}, {})",
            min.x,
            min.y,
            min.z,
            max.x,
            max.y,
            max.z
        );
    }
    for material in &scene.materials {
        let textures: Vec<String> =
            material.textures.iter().map(|t| format!("{:?}={}", t.kind, t.path)).collect();
        log::info!("Material '{}': {}", material.name, textures.join(", "));
    }
    scene.walk_nodes(|node, depth| {
        log::info!("{}{} ({} meshes)", "  ".repeat(depth), node.name, node.meshes.len());
    });
    Ok(())
}

fn convert(args: ConvertArgs) -> Result<()> {
    let options = ImportOptions {
        generate_normals: !args.no_normals,
        bake_uv_transforms: !args.no_uv_bake,
        apply_master_scale: !args.no_scale,
    };
    let scene = Dot3dsImporter::new(options).read_file(&args.input, &DefaultIoSystem)?;
    log::info!(
        "Loaded {} meshes, {} materials from '{}'",
        scene.meshes.len(),
        scene.materials.len(),
        args.input.display()
    );

    DirBuilder::new().recursive(true).create(&args.out_dir)?;
    let (json_root, buffer) = build_gltf(&scene);
    fs::write(args.out_dir.join(BUFFER_NAME), buffer)?;
    let writer = fs::File::create(args.out_dir.join("out.gltf"))?;
    json::serialize::to_writer_pretty(writer, &json_root)?;
    log::info!("Wrote {}", args.out_dir.join("out.gltf").display());
    Ok(())
}

const BUFFER_NAME: &str = "buffer0.bin";

/// Vertex and index data for all meshes, packed into a single buffer.
#[derive(Default)]
struct BufferBuilder {
    data: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl BufferBuilder {
    fn push_view(
        &mut self,
        bytes: Vec<u8>,
        target: json::buffer::Target,
        name: String,
    ) -> json::Index<json::buffer::View> {
        let offset = self.data.len();
        self.data.extend(bytes);
        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: (self.data.len() - offset).into(),
            byte_offset: Some(offset.into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(name),
            target: Some(Valid(target)),
        });
        json::Index::new(self.views.len() as u32 - 1)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_accessor(
        &mut self,
        view: json::Index<json::buffer::View>,
        count: usize,
        component_type: json::accessor::ComponentType,
        type_: json::accessor::Type,
        min: Option<json::Value>,
        max: Option<json::Value>,
        name: String,
    ) -> json::Index<json::Accessor> {
        self.accessors.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: count.into(),
            component_type: Valid(json::accessor::GenericComponentType(component_type)),
            extensions: None,
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: Some(name),
            normalized: false,
            sparse: None,
        });
        json::Index::new(self.accessors.len() as u32 - 1)
    }

    fn add_mesh(&mut self, idx: usize, mesh: &Mesh) -> json::mesh::Primitive {
        let mut attributes = BTreeMap::new();

        let bytes = mesh.positions.iter().flat_map(|p| [p.x, p.y, p.z]).flat_map(f32::to_le_bytes);
        let view = self.push_view(
            bytes.collect(),
            json::buffer::Target::ArrayBuffer,
            format!("Mesh {idx} positions"),
        );
        let (min, max) = position_bounds(mesh);
        let accessor = self.push_accessor(
            view,
            mesh.positions.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            Some(json!(min)),
            Some(json!(max)),
            format!("Mesh {idx} positions"),
        );
        attributes.insert(Valid(json::mesh::Semantic::Positions), accessor);

        if !mesh.normals.is_empty() && mesh.normals.len() == mesh.positions.len() {
            let bytes = mesh.normals.iter().flat_map(|n| [n.x, n.y, n.z]).flat_map(f32::to_le_bytes);
            let view = self.push_view(
                bytes.collect(),
                json::buffer::Target::ArrayBuffer,
                format!("Mesh {idx} normals"),
            );
            let accessor = self.push_accessor(
                view,
                mesh.normals.len(),
                json::accessor::ComponentType::F32,
                json::accessor::Type::Vec3,
                None,
                None,
                format!("Mesh {idx} normals"),
            );
            attributes.insert(Valid(json::mesh::Semantic::Normals), accessor);
        }

        if let Some(tex_coords) = &mesh.tex_coords {
            // glTF puts the texture origin at the top left
            let bytes = tex_coords.iter().flat_map(|uv| [uv.x, 1.0 - uv.y]).flat_map(f32::to_le_bytes);
            let view = self.push_view(
                bytes.collect(),
                json::buffer::Target::ArrayBuffer,
                format!("Mesh {idx} texture coordinates"),
            );
            let accessor = self.push_accessor(
                view,
                tex_coords.len(),
                json::accessor::ComponentType::F32,
                json::accessor::Type::Vec2,
                None,
                None,
                format!("Mesh {idx} texture coordinates"),
            );
            attributes.insert(Valid(json::mesh::Semantic::TexCoords(0)), accessor);
        }

        let bytes = mesh.faces.iter().flatten().flat_map(|i| i.to_le_bytes());
        let view = self.push_view(
            bytes.collect(),
            json::buffer::Target::ElementArrayBuffer,
            format!("Mesh {idx} indices"),
        );
        let indices = self.push_accessor(
            view,
            mesh.faces.len() * 3,
            json::accessor::ComponentType::U32,
            json::accessor::Type::Scalar,
            None,
            None,
            format!("Mesh {idx} indices"),
        );

        json::mesh::Primitive {
            attributes,
            extensions: None,
            extras: Default::default(),
            indices: Some(indices),
            material: Some(json::Index::new(mesh.material as u32)),
            mode: Default::default(),
            targets: None,
        }
    }
}

fn position_bounds(mesh: &Mesh) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for p in &mesh.positions {
        for (axis, value) in [p.x, p.y, p.z].into_iter().enumerate() {
            min[axis] = min[axis].min(value);
            max[axis] = max[axis].max(value);
        }
    }
    (min, max)
}

#[derive(Default)]
struct TextureTable {
    samplers: Vec<json::texture::Sampler>,
    textures: Vec<json::Texture>,
    images: Vec<json::Image>,
}

impl TextureTable {
    fn add(&mut self, texture: &TextureRef) -> json::texture::Info {
        let wrap = match texture.map_mode {
            MapMode::Wrap => json::texture::WrappingMode::Repeat,
            MapMode::Mirror => json::texture::WrappingMode::MirroredRepeat,
            MapMode::Clamp | MapMode::Decal => json::texture::WrappingMode::ClampToEdge,
        };
        let texture_idx = self.textures.len() as u32;
        self.samplers.push(json::texture::Sampler {
            mag_filter: Some(Valid(json::texture::MagFilter::Linear)),
            min_filter: Some(Valid(json::texture::MinFilter::LinearMipmapLinear)),
            name: Some(format!("{} sampler", texture.path)),
            wrap_s: Valid(wrap),
            wrap_t: Valid(wrap),
            extensions: None,
            extras: None,
        });
        self.textures.push(json::Texture {
            name: Some(texture.path.clone()),
            sampler: Some(json::Index::new(texture_idx)),
            source: json::Index::new(texture_idx),
            extensions: None,
            extras: None,
        });
        self.images.push(json::Image {
            buffer_view: None,
            mime_type: None,
            name: Some(texture.path.clone()),
            uri: Some(texture.path.replace('\\', "/")),
            extensions: None,
            extras: None,
        });
        json::texture::Info {
            index: json::Index::new(texture_idx),
            tex_coord: 0,
            extensions: None,
            extras: None,
        }
    }
}

/// Flattens the node tree into glTF nodes, returning the index of `node`.
fn add_node(
    node: &Node,
    node_meshes: &mut Vec<json::Mesh>,
    primitives: &[json::mesh::Primitive],
    nodes: &mut Vec<json::Node>,
) -> json::Index<json::Node> {
    let idx = nodes.len();
    nodes.push(json::Node {
        camera: None,
        children: None,
        extensions: None,
        extras: None,
        matrix: None,
        mesh: None,
        name: Some(node.name.clone()),
        rotation: None,
        scale: None,
        translation: None,
        skin: None,
        weights: None,
    });
    if !node.meshes.is_empty() {
        nodes[idx].mesh = Some(json::Index::new(node_meshes.len() as u32));
        node_meshes.push(json::Mesh {
            extensions: None,
            extras: Default::default(),
            name: Some(node.name.clone()),
            primitives: node.meshes.iter().map(|&m| primitives[m].clone()).collect(),
            weights: None,
        });
    }
    let children: Vec<_> =
        node.children.iter().map(|child| add_node(child, node_meshes, primitives, nodes)).collect();
    if !children.is_empty() {
        nodes[idx].children = Some(children);
    }
    json::Index::new(idx as u32)
}

fn build_gltf(scene: &Scene) -> (json::Root, Vec<u8>) {
    let mut buffer = BufferBuilder::default();
    let primitives: Vec<_> =
        scene.meshes.iter().enumerate().map(|(idx, mesh)| buffer.add_mesh(idx, mesh)).collect();

    let mut textures = TextureTable::default();
    let mut json_materials = Vec::with_capacity(scene.materials.len());
    for material in &scene.materials {
        let d = material.diffuse;
        let emissive = [d.r, d.g, d.b].map(|c| c * material.self_illumination);
        json_materials.push(json::Material {
            alpha_cutoff: None,
            alpha_mode: Valid(if material.opacity < 1.0 {
                json::material::AlphaMode::Blend
            } else {
                json::material::AlphaMode::Opaque
            }),
            double_sided: material.two_sided,
            name: Some(material.name.clone()),
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor([
                    d.r,
                    d.g,
                    d.b,
                    material.opacity,
                ]),
                base_color_texture: material
                    .texture(TextureKind::Diffuse)
                    .map(|texture| textures.add(texture)),
                metallic_factor: json::material::StrengthFactor(0.0),
                roughness_factor: json::material::StrengthFactor(1.0 - material.shininess),
                metallic_roughness_texture: None,
                extensions: None,
                extras: None,
            },
            normal_texture: material.texture(TextureKind::Bump).map(|texture| {
                let info = textures.add(texture);
                json::material::NormalTexture {
                    index: info.index,
                    scale: 1.0,
                    tex_coord: info.tex_coord,
                    extensions: None,
                    extras: None,
                }
            }),
            occlusion_texture: None,
            emissive_texture: material
                .texture(TextureKind::SelfIllumination)
                .map(|texture| textures.add(texture)),
            emissive_factor: json::material::EmissiveFactor(emissive),
            extensions: None,
            extras: None,
        });
    }

    let mut json_meshes = Vec::new();
    let mut json_nodes = Vec::with_capacity(scene.node_count());
    let root = add_node(&scene.root, &mut json_meshes, &primitives, &mut json_nodes);

    let BufferBuilder { data, views, accessors } = buffer;
    let json_root = json::Root {
        accessors,
        animations: vec![],
        asset: Default::default(),
        buffers: vec![json::Buffer {
            byte_length: data.len().into(),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: Some(BUFFER_NAME.to_string()),
        }],
        buffer_views: views,
        scene: Some(json::Index::new(0)),
        extensions: None,
        extras: Default::default(),
        extensions_used: vec![],
        extensions_required: vec![],
        cameras: vec![],
        images: textures.images,
        materials: json_materials,
        meshes: json_meshes,
        nodes: json_nodes,
        samplers: textures.samplers,
        scenes: vec![json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some("Scene".into()),
            nodes: vec![root],
        }],
        skins: vec![],
        textures: textures.textures,
    };
    (json_root, data)
}
