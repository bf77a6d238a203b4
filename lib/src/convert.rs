//! Turns the parsed intermediate scene into the output [`scene`](crate::scene) graph.

use std::collections::BTreeMap;

use glam::Vec3;

use crate::{
    format::{
        repair::bake_uv_transform,
        types::{self, NodeId, TextureKind, UvTransform},
    },
    scene::{Material, Mesh, Node, Scene, TextureRef},
    util::math::Color3,
};

/// Name of the placeholder material for faces without a valid one.
pub const DEFAULT_MATERIAL_NAME: &str = "%%%DEFAULT";

#[derive(Copy, Clone, Debug)]
pub struct ConvertOptions {
    pub bake_uv_transforms: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self { Self { bake_uv_transforms: true } }
}

/// Points faces without a valid material at a placeholder, adding it once.
/// Returns the placeholder index if one was needed.
pub fn replace_default_material(scene: &mut types::Scene) -> Option<usize> {
    let count = scene.materials.len();
    let needs_default = |face: &types::Face| face.material.map_or(true, |idx| idx >= count);
    if !scene.meshes.iter().flat_map(|m| &m.faces).any(needs_default) {
        return None;
    }
    scene.materials.push(types::Material {
        name: DEFAULT_MATERIAL_NAME.to_string(),
        diffuse: Some(Color3::grey(0.3)),
        ..Default::default()
    });
    let mut replaced = 0;
    for face in scene.meshes.iter_mut().flat_map(|m| &mut m.faces) {
        if needs_default(&*face) {
            face.material = Some(count);
            replaced += 1;
        }
    }
    log::debug!("Assigned {} faces to the default material", replaced);
    Some(count)
}

/// Fills every absent material channel with its default.
pub fn convert_material(
    material: &types::Material,
    ambient: Option<Color3>,
    options: ConvertOptions,
) -> Material {
    let textures = material
        .textures
        .iter()
        .filter(|texture| {
            if texture.path.is_empty() {
                log::warn!("Material '{}': {:?} map has no file name", material.name, texture.kind);
            }
            !texture.path.is_empty()
        })
        .map(|texture| TextureRef {
            kind: texture.kind,
            path: texture.path.clone(),
            blend: texture.blend.unwrap_or(1.0),
            map_mode: texture.map_mode,
            transform: if options.bake_uv_transforms && texture.kind == TextureKind::Diffuse {
                UvTransform::default()
            } else {
                texture.transform
            },
        })
        .collect();
    Material {
        name: material.name.clone(),
        diffuse: material.diffuse.unwrap_or(Color3::grey(0.6)),
        ambient: material.ambient.or(ambient).unwrap_or(Color3::BLACK),
        specular: material.specular.unwrap_or(Color3::BLACK),
        shininess: material.shininess.unwrap_or(0.0),
        shininess_strength: material.shininess_strength.unwrap_or(1.0),
        opacity: 1.0 - material.transparency.unwrap_or(0.0),
        self_illumination: material.self_illumination.unwrap_or(0.0),
        two_sided: material.two_sided,
        shading: material.shading.unwrap_or_default(),
        textures,
    }
}

#[derive(Debug, Default)]
pub struct ConvertedMeshes {
    pub meshes: Vec<Mesh>,
    /// Output mesh indices for each source mesh.
    pub by_source: Vec<Vec<usize>>,
}

/// Splits every mesh into one output mesh per referenced material.
///
/// Faces must already carry valid material indices; see
/// [`replace_default_material`].
pub fn convert_meshes(
    meshes: &[types::Mesh],
    materials: &[types::Material],
    options: ConvertOptions,
) -> ConvertedMeshes {
    let mut out = ConvertedMeshes::default();
    for mesh in meshes {
        let mut groups: BTreeMap<usize, Vec<[u32; 3]>> = BTreeMap::new();
        for face in &mesh.faces {
            match face.material {
                Some(material) => groups.entry(material).or_default().push(face.indices),
                None => log::warn!("Mesh '{}': dropping face without material", mesh.name),
            }
        }
        let mut indices = Vec::with_capacity(groups.len());
        for (material, faces) in groups {
            let mut split = split_mesh(mesh, material, &faces);
            if options.bake_uv_transforms {
                let transform = materials
                    .get(material)
                    .and_then(|m| m.texture(TextureKind::Diffuse))
                    .map(|t| t.transform)
                    .filter(|t| !t.is_identity());
                if let (Some(transform), Some(tex_coords)) = (transform, &mut split.tex_coords) {
                    *tex_coords = bake_uv_transform(tex_coords, &transform);
                }
            }
            indices.push(out.meshes.len());
            out.meshes.push(split);
        }
        if indices.is_empty() {
            log::debug!("Mesh '{}' has no faces", mesh.name);
        }
        out.by_source.push(indices);
    }
    out
}

/// Copies the faces of one material into a new mesh with a compact vertex range.
///
/// Faces with out-of-range indices are skipped; [`check_indices`] normally
/// clamps them beforehand.
///
/// [`check_indices`]: crate::format::repair::check_indices
fn split_mesh(mesh: &types::Mesh, material: usize, faces: &[[u32; 3]]) -> Mesh {
    let count = mesh.positions.len();
    let has_normals = mesh.normals.len() == count;
    let mut remap = vec![u32::MAX; count];
    let mut out = Mesh {
        name: mesh.name.clone(),
        tex_coords: mesh.tex_coords.as_ref().map(|_| Vec::new()),
        material,
        ..Default::default()
    };
    let mut skipped = 0;
    for face in faces {
        if face.iter().any(|&idx| idx as usize >= count) {
            skipped += 1;
            continue;
        }
        let face = face.map(|idx| {
            let idx = idx as usize;
            if remap[idx] == u32::MAX {
                remap[idx] = out.positions.len() as u32;
                out.positions.push(mesh.positions[idx]);
                if has_normals {
                    out.normals.push(mesh.normals[idx]);
                }
                if let (Some(dst), Some(src)) = (&mut out.tex_coords, &mesh.tex_coords) {
                    dst.push(src.get(idx).copied().unwrap_or_default());
                }
            }
            remap[idx]
        });
        out.faces.push(face);
    }
    if skipped > 0 {
        log::warn!("Mesh '{}': skipped {} faces with invalid indices", mesh.name, skipped);
    }
    out
}

/// Builds the output scene from a repaired intermediate scene.
pub fn convert_scene(mut scene: types::Scene, options: ConvertOptions) -> Scene {
    replace_default_material(&mut scene);
    let materials = scene
        .materials
        .iter()
        .map(|material| convert_material(material, scene.ambient, options))
        .collect();
    let converted = convert_meshes(&scene.meshes, &scene.materials, options);

    let mut claimed = vec![false; scene.meshes.len()];
    let mut root = build_nodes(&scene, &converted.by_source, &mut claimed);
    for (idx, mesh) in scene.meshes.iter().enumerate() {
        let outputs = &converted.by_source[idx];
        if claimed[idx] || outputs.is_empty() {
            continue;
        }
        log::debug!("Mesh '{}' has no node, adding one under the root", mesh.name);
        root.children.push(Node {
            name: mesh.name.clone(),
            meshes: outputs.clone(),
            ..Default::default()
        });
    }

    Scene {
        root,
        meshes: converted.meshes,
        materials,
        background_image: scene.background_image,
    }
}

/// Converts the node arena into a tree.
///
/// A node is always pushed before any node is attached to it, so children
/// have larger handles than their parents and a reverse sweep finishes every
/// subtree before its parent is visited.
fn build_nodes(scene: &types::Scene, by_source: &[Vec<usize>], claimed: &mut [bool]) -> Node {
    let arena = &scene.nodes;
    let mut built: Vec<Option<Node>> = Vec::with_capacity(arena.len());
    for (id, node) in arena.iter() {
        let mut meshes = Vec::new();
        if id != NodeId::ROOT {
            for (idx, mesh) in scene.meshes.iter().enumerate() {
                if mesh.name == node.object_name() {
                    meshes.extend_from_slice(&by_source[idx]);
                    claimed[idx] = true;
                }
            }
        }
        built.push(Some(Node {
            name: node.object_name().to_string(),
            pivot: node.pivot,
            meshes,
            children: Vec::new(),
        }));
    }
    for idx in (1..arena.len()).rev() {
        let node = arena.get(NodeId(idx));
        let children = node.children.iter().filter_map(|child| built[child.0].take()).collect();
        if let Some(out) = built[idx].as_mut() {
            out.children = children;
        }
    }
    let children = arena.root().children.iter().filter_map(|child| built[child.0].take()).collect();
    let mut root = built[0].take().unwrap_or_default();
    root.children = children;
    root
}

/// Multiplies positions and pivots by the file's master scale.
pub fn apply_master_scale(scene: &mut Scene, master_scale: Option<f32>) {
    let scale = match master_scale {
        None => return,
        Some(scale) if scale.is_finite() && scale > 0.0 => scale,
        Some(scale) => {
            log::warn!("Ignoring invalid master scale {}", scale);
            return;
        }
    };
    if scale == 1.0 {
        return;
    }
    log::debug!("Applying master scale {}", scale);
    for mesh in &mut scene.meshes {
        for position in &mut mesh.positions {
            *position *= scale;
        }
    }
    scene.walk_nodes_mut(|node| node.pivot *= scale);
}

/// Scene bounds as `(min, max)`, if there are any vertices.
pub fn bounds(scene: &Scene) -> Option<(Vec3, Vec3)> {
    let mut positions = scene.meshes.iter().flat_map(|m| m.positions.iter().copied());
    let first = positions.next()?;
    Some(positions.fold((first, first), |(min, max), p| (min.min(p), max.max(p))))
}
