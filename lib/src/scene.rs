//! Output scene graph returned by the importer.

pub use crate::format::types::{MapMode, ShadingMode, TextureKind, UvTransform};
use glam::{Vec2, Vec3};

use crate::util::math::Color3;

#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub root: Node,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub background_image: Option<String>,
}

impl Scene {
    /// Visits every node, parents before children.
    pub fn walk_nodes(&self, mut f: impl FnMut(&Node, usize)) {
        let mut stack = vec![(&self.root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            f(node, depth);
            stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
        }
    }

    pub fn walk_nodes_mut(&mut self, mut f: impl FnMut(&mut Node)) {
        let mut stack = vec![&mut self.root];
        while let Some(node) = stack.pop() {
            f(node);
            stack.extend(node.children.iter_mut().rev());
        }
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk_nodes(|_, _| count += 1);
        count
    }

    pub fn find_node(&self, name: &str) -> Option<&Node> {
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            if node.name == name {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }
}

#[derive(Clone, Debug, Default)]
pub struct Node {
    pub name: String,
    pub pivot: Vec3,
    /// Indices into [`Scene::meshes`].
    pub meshes: Vec<usize>,
    pub children: Vec<Node>,
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Option<Vec<Vec2>>,
    pub faces: Vec<[u32; 3]>,
    /// Index into [`Scene::materials`].
    pub material: usize,
}

#[derive(Clone, Debug)]
pub struct TextureRef {
    pub kind: TextureKind,
    pub path: String,
    pub blend: f32,
    pub map_mode: MapMode,
    /// Identity once baked into the mesh texture coordinates.
    pub transform: UvTransform,
}

/// Fully resolved material, every channel present.
#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub diffuse: Color3,
    pub ambient: Color3,
    pub specular: Color3,
    pub shininess: f32,
    pub shininess_strength: f32,
    pub opacity: f32,
    pub self_illumination: f32,
    pub two_sided: bool,
    pub shading: ShadingMode,
    pub textures: Vec<TextureRef>,
}

impl Material {
    pub fn texture(&self, kind: TextureKind) -> Option<&TextureRef> {
        self.textures.iter().find(|t| t.kind == kind)
    }
}
