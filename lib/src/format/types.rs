//! Format-shaped scene records filled in by the parser.
//!
//! These only live for the duration of one import; [`crate::convert`] turns
//! them into the output [`crate::scene`] types.

use glam::{Vec2, Vec3};

use crate::util::math::Color3;

pub const ROOT_NODE_NAME: &str = "<3DSRoot>";
/// Placeholder node name used by 3DS for instanced dummies.
pub const DUMMY_NODE_NAME: &str = "$$$DUMMY";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

#[derive(Clone, Debug, Default)]
pub struct Node {
    pub name: String,
    pub instance_name: Option<String>,
    pub pivot: Vec3,
    /// Hierarchy value as stored in the node header.
    pub depth: i16,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    /// Name meshes are matched against.
    pub fn object_name(&self) -> &str {
        match &self.instance_name {
            Some(instance) if self.name == DUMMY_NODE_NAME => instance,
            _ => &self.name,
        }
    }
}

/// Node storage addressed by stable handles. Entry 0 is always the root.
#[derive(Clone, Debug)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl Default for NodeArena {
    fn default() -> Self {
        Self { nodes: vec![Node { name: ROOT_NODE_NAME.to_string(), ..Default::default() }] }
    }
}

impl NodeArena {
    /// Adds a detached node.
    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(old) = self.nodes[child.0].parent.take() {
            self.nodes[old.0].children.retain(|&c| c != child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node { &self.nodes[id.0] }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node { &mut self.nodes[id.0] }

    #[inline]
    pub fn root(&self) -> &Node { &self.nodes[0] }

    #[inline]
    pub fn len(&self) -> usize { self.nodes.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.nodes.len() <= 1 }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TextureKind {
    Diffuse,
    Specular,
    Opacity,
    Reflection,
    Bump,
    Shininess,
    SelfIllumination,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MapMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Decal,
}

impl MapMode {
    /// Decodes the map tiling flags.
    pub fn from_tiling(flags: u16) -> Self {
        if flags & 0x0001 != 0 {
            MapMode::Decal
        } else if flags & 0x0002 != 0 {
            MapMode::Mirror
        } else if flags & 0x0010 != 0 {
            MapMode::Clamp
        } else {
            MapMode::Wrap
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UvTransform {
    pub offset: Vec2,
    pub scale: Vec2,
    /// Radians.
    pub rotation: f32,
}

impl Default for UvTransform {
    fn default() -> Self {
        Self { offset: Vec2::ZERO, scale: Vec2::ONE, rotation: 0.0 }
    }
}

impl UvTransform {
    pub fn is_identity(&self) -> bool { *self == Self::default() }
}

#[derive(Clone, Debug)]
pub struct Texture {
    pub kind: TextureKind,
    pub path: String,
    pub blend: Option<f32>,
    pub map_mode: MapMode,
    pub transform: UvTransform,
}

impl Texture {
    pub fn new(kind: TextureKind) -> Self {
        Self {
            kind,
            path: String::new(),
            blend: None,
            map_mode: MapMode::default(),
            transform: UvTransform::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ShadingMode {
    Wireframe,
    Flat,
    #[default]
    Gouraud,
    Phong,
    Metal,
}

impl ShadingMode {
    pub fn from_raw(value: u16) -> Option<Self> {
        Some(match value {
            0 => ShadingMode::Wireframe,
            1 => ShadingMode::Flat,
            2 => ShadingMode::Gouraud,
            3 => ShadingMode::Phong,
            4 => ShadingMode::Metal,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct Material {
    pub name: String,
    pub diffuse: Option<Color3>,
    pub ambient: Option<Color3>,
    pub specular: Option<Color3>,
    pub shininess: Option<f32>,
    pub shininess_strength: Option<f32>,
    pub transparency: Option<f32>,
    pub self_illumination: Option<f32>,
    pub two_sided: bool,
    pub shading: Option<ShadingMode>,
    pub textures: Vec<Texture>,
}

impl Material {
    pub fn texture(&self, kind: TextureKind) -> Option<&Texture> {
        self.textures.iter().find(|t| t.kind == kind)
    }

    /// Returns the slot for `kind`, creating it if needed.
    pub fn texture_mut(&mut self, kind: TextureKind) -> &mut Texture {
        let idx = match self.textures.iter().position(|t| t.kind == kind) {
            Some(idx) => idx,
            None => {
                self.textures.push(Texture::new(kind));
                self.textures.len() - 1
            }
        };
        &mut self.textures[idx]
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Face {
    pub indices: [u32; 3],
    /// Index into [`Scene::materials`].
    pub material: Option<usize>,
    /// Zero means "not smoothed".
    pub smoothing_group: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub tex_coords: Option<Vec<Vec2>>,
    pub normals: Vec<Vec3>,
    pub faces: Vec<Face>,
}

#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub ambient: Option<Color3>,
    pub background_image: Option<String>,
    pub master_scale: Option<f32>,
    pub materials: Vec<Material>,
    pub meshes: Vec<Mesh>,
    pub nodes: NodeArena,
}

impl Scene {
    pub fn material_index(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.name == name)
    }
}
