//! Recursive-descent chunk parser producing the intermediate [`Scene`].

use std::io::Cursor;

use anyhow::{bail, ensure, Result};
use binrw::{binrw, BinReaderExt, Endian};
use glam::{Vec2, Vec3};

use crate::{
    error::FormatError,
    format::{
        chunk::{ChunkCursor, CHUNK_HEADER_SIZE},
        hierarchy::HierarchyResolver,
        types::{
            Face, MapMode, Material, Mesh, Node, NodeId, Scene, ShadingMode, Texture, TextureKind,
        },
        ChunkId,
    },
    util::math::{Color24, Color3, Vector2, Vector3},
};

/// Containers nested deeper than this are skipped.
const MAX_NESTING: usize = 64;

#[binrw]
#[derive(Copy, Clone, Debug)]
struct FaceRecord {
    a: u16,
    b: u16,
    c: u16,
    flags: u16,
}

#[binrw]
#[derive(Copy, Clone, Debug)]
struct NodeHeaderTail {
    flags1: u16,
    flags2: u16,
    hierarchy: i16,
}

/// Called with the cursor at the start of the chunk payload and the absolute
/// offset where the payload ends.
type Handler = fn(&mut Parser<'_>, ChunkId, usize) -> Result<()>;

static HANDLERS: &[(ChunkId, Handler)] = &[
    (ChunkId::Editor, container),
    (ChunkId::MasterScale, master_scale),
    (ChunkId::AmbientLight, ambient_light),
    (ChunkId::BitMap, background_bitmap),
    (ChunkId::NamedObject, named_object),
    (ChunkId::TriMesh, tri_mesh),
    (ChunkId::PointArray, point_array),
    (ChunkId::TexVerts, tex_verts),
    (ChunkId::FaceArray, face_array),
    (ChunkId::MeshMatGroup, mesh_mat_group),
    (ChunkId::SmoothGroup, smooth_group),
    (ChunkId::MatEntry, material_entry),
    (ChunkId::MatName, material_name),
    (ChunkId::MatAmbient, material_color),
    (ChunkId::MatDiffuse, material_color),
    (ChunkId::MatSpecular, material_color),
    (ChunkId::MatShininess, material_percentage),
    (ChunkId::MatShinStrength, material_percentage),
    (ChunkId::MatTransparency, material_percentage),
    (ChunkId::MatSelfIllum, material_percentage),
    (ChunkId::MatTwoSided, material_two_sided),
    (ChunkId::MatShading, material_shading),
    (ChunkId::MatTexMap, texture_map),
    (ChunkId::MatSpecMap, texture_map),
    (ChunkId::MatOpacMap, texture_map),
    (ChunkId::MatReflMap, texture_map),
    (ChunkId::MatBumpMap, texture_map),
    (ChunkId::MatShinMap, texture_map),
    (ChunkId::MatSelfIllumMap, texture_map),
    (ChunkId::MatMapName, map_name),
    (ChunkId::MatMapTiling, map_tiling),
    (ChunkId::MatMapUScale, map_param),
    (ChunkId::MatMapVScale, map_param),
    (ChunkId::MatMapUOffset, map_param),
    (ChunkId::MatMapVOffset, map_param),
    (ChunkId::MatMapAngle, map_param),
    (ChunkId::Keyframer, keyframer),
    (ChunkId::ObjectNode, object_node),
    (ChunkId::NodeHeader, node_header),
    (ChunkId::InstanceName, instance_name),
    (ChunkId::Pivot, pivot),
];

fn handler(id: u16) -> Option<(ChunkId, Handler)> {
    HANDLERS.iter().find(|(chunk_id, _)| *chunk_id as u16 == id).copied()
}

/// Decodes a complete .3ds buffer.
pub fn parse_scene(data: &[u8]) -> Result<Scene> {
    let mut parser = Parser::new(data);
    parser.parse_top()?;
    Ok(parser.into_scene())
}

pub struct Parser<'a> {
    cursor: ChunkCursor<'a>,
    scene: Scene,
    resolver: HierarchyResolver,
    nesting: usize,
    object_name: String,
    mesh: Option<usize>,
    material: Option<usize>,
    texture: Option<TextureKind>,
    node: Option<NodeId>,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: ChunkCursor::new(data),
            scene: Scene::default(),
            resolver: HierarchyResolver::new(),
            nesting: 0,
            object_name: String::new(),
            mesh: None,
            material: None,
            texture: None,
            node: None,
        }
    }

    pub fn into_scene(self) -> Scene { self.scene }

    pub fn parse_top(&mut self) -> Result<()> {
        ensure!(!self.cursor.is_empty(), FormatError::Empty);
        let header = self.cursor.read_header()?;
        if !ChunkId::is_container(header.id()) {
            bail!(FormatError::NotA3ds { id: header.id() });
        }
        let mut length = header.length() as usize;
        if length < CHUNK_HEADER_SIZE {
            bail!(FormatError::InvalidChunkLength { id: header.id(), offset: 0, length: header.length() });
        }
        if length > self.cursor.len() {
            log::warn!(
                "Main chunk declares {:#X} bytes but the file has {:#X}",
                length,
                self.cursor.len()
            );
            length = self.cursor.len();
        } else if length < self.cursor.len() {
            log::debug!("Ignoring {:#X} bytes after the main chunk", self.cursor.len() - length);
        }
        self.parse_chunk(length - CHUNK_HEADER_SIZE)
    }

    /// Parses sibling chunks filling `remaining` bytes from the current position.
    pub fn parse_chunk(&mut self, mut remaining: usize) -> Result<()> {
        if self.nesting >= MAX_NESTING {
            log::warn!("Chunks nested too deeply at {:#X}, skipping", self.cursor.position());
            return self.cursor.skip(remaining);
        }
        self.nesting += 1;
        while remaining > 0 {
            let start = self.cursor.position();
            if remaining < CHUNK_HEADER_SIZE {
                log::warn!("Skipping {} trailing bytes at {:#X}", remaining, start);
                self.cursor.skip(remaining)?;
                break;
            }
            let header = self.cursor.read_header()?;
            if (header.length() as usize) < CHUNK_HEADER_SIZE {
                bail!(FormatError::InvalidChunkLength {
                    id: header.id(),
                    offset: start,
                    length: header.length(),
                });
            }
            let mut consumed = header.length() as usize;
            if consumed > remaining {
                log::warn!(
                    "Chunk {:#06X} {} at {:#X} declares {:#X} bytes, only {:#X} left",
                    header.id(),
                    ChunkId::name(header.id()),
                    start,
                    consumed,
                    remaining
                );
                consumed = remaining;
            }
            let end = start + consumed;
            match handler(header.id()) {
                Some((id, handler)) => {
                    log::debug!("{:#X}: {:?} (length {:#X})", start, id, consumed);
                    handler(self, id, end)?;
                    if self.cursor.position() > end {
                        log::warn!(
                            "{:?} at {:#X} read {:#X} bytes past its end",
                            id,
                            start,
                            self.cursor.position() - end
                        );
                    }
                }
                None => log::debug!(
                    "{:#X}: skipping {:#06X} {} (length {:#X})",
                    start,
                    header.id(),
                    ChunkId::name(header.id()),
                    consumed
                ),
            }
            self.cursor.seek(end)?;
            remaining -= consumed;
        }
        self.nesting -= 1;
        Ok(())
    }

    /// Parses nested chunks from the current position up to `end`.
    fn parse_children(&mut self, end: usize) -> Result<()> {
        let remaining = end.saturating_sub(self.cursor.position());
        self.parse_chunk(remaining)
    }

    /// Bytes left before `end`.
    #[inline]
    fn left(&self, end: usize) -> usize { end.saturating_sub(self.cursor.position()) }

    /// Takes the rest of the payload if it holds at least `needed` bytes.
    fn payload(&mut self, id: ChunkId, end: usize, needed: usize) -> Result<Option<&'a [u8]>> {
        let left = self.left(end);
        if left < needed {
            log::warn!("{:?} is truncated ({} of {} bytes)", id, left, needed);
            return Ok(None);
        }
        Ok(Some(self.cursor.take(left)?))
    }

    /// Reads a `u16` record count and returns the records that fit in the payload.
    fn counted(&mut self, id: ChunkId, end: usize, stride: usize) -> Result<(usize, &'a [u8])> {
        if self.left(end) < 2 {
            log::warn!("{:?} is missing its count", id);
            return Ok((0, &[]));
        }
        let mut count = self.cursor.read_u16()? as usize;
        let fits = self.left(end) / stride;
        if count > fits {
            log::warn!("{:?} declares {} records, only {} fit", id, count, fits);
            count = fits;
        }
        Ok((count, self.cursor.take(count * stride)?))
    }

    fn read_string(&mut self, end: usize) -> Result<String> {
        let left = self.left(end);
        self.cursor.read_cstring(left)
    }

    /// Probes for an optional percentage sub-chunk, clamped to `[0, 1]`.
    ///
    /// Leaves the cursor untouched and returns `None` if the next chunk is
    /// something else.
    pub fn parse_percentage(&mut self, end: usize) -> Result<Option<f32>> {
        let start = self.cursor.position();
        let Some((id, size)) = self.probe_header(end)? else {
            return Ok(None);
        };
        let value = match ChunkId::from_repr(id) {
            Some(ChunkId::IntPercentage) if size >= 2 => Some(self.cursor.read_u16()? as f32 / 100.0),
            Some(ChunkId::FloatPercentage) if size >= 4 => Some(self.cursor.read_f32()?),
            _ => None,
        };
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            self.cursor.restore();
            return Ok(None);
        };
        self.cursor.seek(start + CHUNK_HEADER_SIZE + size)?;
        Ok(Some(value.clamp(0.0, 1.0)))
    }

    /// Probes for an optional color sub-chunk.
    ///
    /// Byte colors are scaled to `[0, 1]`. With `accept_percentage` a
    /// percentage chunk is read as a grey level.
    pub fn parse_color(&mut self, end: usize, accept_percentage: bool) -> Result<Option<Color3>> {
        let start = self.cursor.position();
        let Some((id, size)) = self.probe_header(end)? else {
            return Ok(None);
        };
        let color = match ChunkId::from_repr(id) {
            Some(ChunkId::ColorF | ChunkId::LinColorF) if size >= 12 => {
                let color: Color3 = Cursor::new(self.cursor.take(12)?).read_type(Endian::Little)?;
                Some(color).filter(|c| !c.r.is_nan() && !c.g.is_nan() && !c.b.is_nan())
            }
            Some(ChunkId::Color24 | ChunkId::LinColor24) if size >= 3 => {
                let color: Color24 = Cursor::new(self.cursor.take(3)?).read_type(Endian::Little)?;
                Some(Color3::from(color))
            }
            Some(ChunkId::IntPercentage | ChunkId::FloatPercentage) if accept_percentage => {
                self.cursor.restore();
                return Ok(self.parse_percentage(end)?.map(Color3::grey));
            }
            _ => None,
        };
        match color {
            Some(color) => {
                self.cursor.seek(start + CHUNK_HEADER_SIZE + size)?;
                Ok(Some(color))
            }
            None => {
                self.cursor.restore();
                Ok(None)
            }
        }
    }

    /// Saves the position and reads the next header if one fits before `end`.
    /// Returns the id and the usable payload size.
    fn probe_header(&mut self, end: usize) -> Result<Option<(u16, usize)>> {
        let left = self.left(end);
        if left < CHUNK_HEADER_SIZE {
            return Ok(None);
        }
        self.cursor.save();
        let header = self.cursor.read_header()?;
        let length = (header.length() as usize).clamp(CHUNK_HEADER_SIZE, left);
        Ok(Some((header.id(), length - CHUNK_HEADER_SIZE)))
    }

    fn current_mesh(&mut self, id: ChunkId) -> Option<&mut Mesh> {
        let mesh = self.mesh.and_then(|idx| self.scene.meshes.get_mut(idx));
        if mesh.is_none() {
            log::warn!("{:?} outside of a mesh, skipping", id);
        }
        mesh
    }

    fn current_material(&mut self, id: ChunkId) -> Option<&mut Material> {
        let material = self.material.and_then(|idx| self.scene.materials.get_mut(idx));
        if material.is_none() {
            log::warn!("{:?} outside of a material, skipping", id);
        }
        material
    }

    fn current_texture(&mut self, id: ChunkId) -> Option<&mut Texture> {
        let Some(kind) = self.texture else {
            log::warn!("{:?} outside of a texture map, skipping", id);
            return None;
        };
        Some(self.current_material(id)?.texture_mut(kind))
    }

    fn current_node(&mut self, id: ChunkId) -> Option<&mut Node> {
        match self.node {
            Some(node) => Some(self.scene.nodes.get_mut(node)),
            None => {
                log::warn!("{:?} outside of an object node, skipping", id);
                None
            }
        }
    }
}

fn container(p: &mut Parser<'_>, _id: ChunkId, end: usize) -> Result<()> { p.parse_children(end) }

fn master_scale(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    if let Some(bytes) = p.payload(id, end, 4)? {
        let scale: f32 = Cursor::new(bytes).read_type(Endian::Little)?;
        p.scene.master_scale = Some(scale);
    }
    Ok(())
}

fn ambient_light(p: &mut Parser<'_>, _id: ChunkId, end: usize) -> Result<()> {
    match p.parse_color(end, false)? {
        Some(color) => p.scene.ambient = Some(color),
        None => log::warn!("Ambient light without a usable color"),
    }
    Ok(())
}

fn background_bitmap(p: &mut Parser<'_>, _id: ChunkId, end: usize) -> Result<()> {
    let path = p.read_string(end)?;
    if !path.is_empty() {
        p.scene.background_image = Some(path);
    }
    Ok(())
}

fn named_object(p: &mut Parser<'_>, _id: ChunkId, end: usize) -> Result<()> {
    p.object_name = p.read_string(end)?;
    let result = p.parse_children(end);
    p.object_name.clear();
    result
}

fn tri_mesh(p: &mut Parser<'_>, _id: ChunkId, end: usize) -> Result<()> {
    p.scene.meshes.push(Mesh { name: p.object_name.clone(), ..Default::default() });
    p.mesh = Some(p.scene.meshes.len() - 1);
    let result = p.parse_children(end);
    p.mesh = None;
    result
}

fn point_array(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let (count, bytes) = p.counted(id, end, 12)?;
    let mut reader = Cursor::new(bytes);
    let positions = (0..count)
        .map(|_| reader.read_type::<Vector3>(Endian::Little).map(Vec3::from))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(mesh) = p.current_mesh(id) {
        mesh.positions = positions;
    }
    Ok(())
}

fn tex_verts(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let (count, bytes) = p.counted(id, end, 8)?;
    let mut reader = Cursor::new(bytes);
    let tex_coords = (0..count)
        .map(|_| reader.read_type::<Vector2>(Endian::Little).map(Vec2::from))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(mesh) = p.current_mesh(id) {
        mesh.tex_coords = Some(tex_coords);
    }
    Ok(())
}

fn face_array(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let (count, bytes) = p.counted(id, end, 8)?;
    let mut reader = Cursor::new(bytes);
    let faces = (0..count)
        .map(|_| -> Result<Face> {
            let record: FaceRecord = reader.read_type(Endian::Little)?;
            Ok(Face {
                indices: [record.a as u32, record.b as u32, record.c as u32],
                material: None,
                smoothing_group: 0,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let Some(mesh) = p.current_mesh(id) else {
        return Ok(());
    };
    mesh.faces = faces;
    p.parse_children(end)
}

fn mesh_mat_group(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let name = p.read_string(end)?;
    let (count, bytes) = p.counted(id, end, 2)?;
    let material = p.scene.material_index(&name);
    if material.is_none() {
        log::warn!("Face group references unknown material '{}'", name);
    }
    let Some(mesh) = p.current_mesh(id) else {
        return Ok(());
    };
    let mut out_of_range = 0;
    for chunk in bytes.chunks_exact(2).take(count) {
        let face = u16::from_le_bytes([chunk[0], chunk[1]]) as usize;
        match mesh.faces.get_mut(face) {
            Some(face) => face.material = material,
            None => out_of_range += 1,
        }
    }
    if out_of_range > 0 {
        log::warn!("Material group '{}' lists {} faces that do not exist", name, out_of_range);
    }
    Ok(())
}

fn smooth_group(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let left = p.left(end);
    let bytes = p.cursor.take(left - left % 4)?;
    let Some(mesh) = p.current_mesh(id) else {
        return Ok(());
    };
    let groups = bytes.len() / 4;
    if groups != mesh.faces.len() {
        log::warn!("Mesh '{}': {} smoothing groups for {} faces", mesh.name, groups, mesh.faces.len());
    }
    for (face, chunk) in mesh.faces.iter_mut().zip(bytes.chunks_exact(4)) {
        face.smoothing_group = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

fn material_entry(p: &mut Parser<'_>, _id: ChunkId, end: usize) -> Result<()> {
    p.scene.materials.push(Material::default());
    p.material = Some(p.scene.materials.len() - 1);
    let result = p.parse_children(end);
    p.material = None;
    result
}

fn material_name(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let name = p.read_string(end)?;
    if p.scene.material_index(&name).is_some() {
        log::warn!("Duplicate material name '{}'", name);
    }
    if let Some(material) = p.current_material(id) {
        material.name = name;
    }
    Ok(())
}

fn material_color(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let color = p.parse_color(end, true)?;
    let Some(material) = p.current_material(id) else {
        return Ok(());
    };
    if color.is_none() {
        log::warn!("Material '{}': {:?} has no usable color", material.name, id);
    }
    match id {
        ChunkId::MatAmbient => material.ambient = color,
        ChunkId::MatDiffuse => material.diffuse = color,
        ChunkId::MatSpecular => material.specular = color,
        _ => {}
    }
    Ok(())
}

fn material_percentage(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let value = p.parse_percentage(end)?;
    let Some(material) = p.current_material(id) else {
        return Ok(());
    };
    if value.is_none() {
        log::warn!("Material '{}': {:?} has no usable percentage", material.name, id);
    }
    match id {
        ChunkId::MatShininess => material.shininess = value,
        ChunkId::MatShinStrength => material.shininess_strength = value,
        ChunkId::MatTransparency => material.transparency = value,
        ChunkId::MatSelfIllum => material.self_illumination = value,
        _ => {}
    }
    Ok(())
}

fn material_two_sided(p: &mut Parser<'_>, id: ChunkId, _end: usize) -> Result<()> {
    if let Some(material) = p.current_material(id) {
        material.two_sided = true;
    }
    Ok(())
}

fn material_shading(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let Some(bytes) = p.payload(id, end, 2)? else {
        return Ok(());
    };
    let raw: u16 = Cursor::new(bytes).read_type(Endian::Little)?;
    let shading = ShadingMode::from_raw(raw);
    if shading.is_none() {
        log::warn!("Unknown shading mode {}", raw);
    }
    if let Some(material) = p.current_material(id) {
        material.shading = shading;
    }
    Ok(())
}

fn texture_map(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let kind = match id {
        ChunkId::MatTexMap => TextureKind::Diffuse,
        ChunkId::MatSpecMap => TextureKind::Specular,
        ChunkId::MatOpacMap => TextureKind::Opacity,
        ChunkId::MatReflMap => TextureKind::Reflection,
        ChunkId::MatBumpMap => TextureKind::Bump,
        ChunkId::MatShinMap => TextureKind::Shininess,
        ChunkId::MatSelfIllumMap => TextureKind::SelfIllumination,
        _ => return Ok(()),
    };
    let blend = p.parse_percentage(end)?;
    let Some(material) = p.current_material(id) else {
        return Ok(());
    };
    material.texture_mut(kind).blend = blend;
    p.texture = Some(kind);
    let result = p.parse_children(end);
    p.texture = None;
    result
}

fn map_name(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let path = p.read_string(end)?;
    if let Some(texture) = p.current_texture(id) {
        texture.path = path;
    }
    Ok(())
}

fn map_tiling(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let Some(bytes) = p.payload(id, end, 2)? else {
        return Ok(());
    };
    let flags: u16 = Cursor::new(bytes).read_type(Endian::Little)?;
    if let Some(texture) = p.current_texture(id) {
        texture.map_mode = MapMode::from_tiling(flags);
    }
    Ok(())
}

fn map_param(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let Some(bytes) = p.payload(id, end, 4)? else {
        return Ok(());
    };
    let value: f32 = Cursor::new(bytes).read_type(Endian::Little)?;
    let Some(texture) = p.current_texture(id) else {
        return Ok(());
    };
    let transform = &mut texture.transform;
    match id {
        ChunkId::MatMapUScale | ChunkId::MatMapVScale if value == 0.0 || !value.is_finite() => {
            log::warn!("Texture '{}': invalid {:?} {}, using 1.0", texture.path, id, value);
        }
        ChunkId::MatMapUScale => transform.scale.x = value,
        ChunkId::MatMapVScale => transform.scale.y = value,
        ChunkId::MatMapUOffset => transform.offset.x = value,
        ChunkId::MatMapVOffset => transform.offset.y = value,
        ChunkId::MatMapAngle => transform.rotation = value.to_radians(),
        _ => {}
    }
    Ok(())
}

fn keyframer(p: &mut Parser<'_>, _id: ChunkId, end: usize) -> Result<()> {
    p.resolver.reset();
    p.parse_children(end)
}

fn object_node(p: &mut Parser<'_>, _id: ChunkId, end: usize) -> Result<()> {
    let node = p.scene.nodes.push(Node::default());
    p.node = Some(node);
    let result = p.parse_children(end);
    p.node = None;
    result?;

    let record = p.scene.nodes.get(node);
    if record.name.is_empty() {
        log::warn!("Object node without a name");
    }
    let depth = record.depth;
    p.resolver.attach(&mut p.scene.nodes, node, depth);
    Ok(())
}

fn node_header(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let name = p.read_string(end)?;
    let tail = match p.payload(id, end, 6)? {
        Some(bytes) => Some(Cursor::new(bytes).read_type::<NodeHeaderTail>(Endian::Little)?),
        None => None,
    };
    if let Some(node) = p.current_node(id) {
        node.name = name;
        if let Some(tail) = tail {
            node.depth = tail.hierarchy;
        }
    }
    Ok(())
}

fn instance_name(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let name = p.read_string(end)?;
    if let Some(node) = p.current_node(id) {
        node.instance_name = Some(name);
    }
    Ok(())
}

fn pivot(p: &mut Parser<'_>, id: ChunkId, end: usize) -> Result<()> {
    let Some(bytes) = p.payload(id, end, 12)? else {
        return Ok(());
    };
    let pivot: Vector3 = Cursor::new(bytes).read_type(Endian::Little)?;
    if let Some(node) = p.current_node(id) {
        node.pivot = pivot.into();
    }
    Ok(())
}
