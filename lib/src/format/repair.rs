//! Mesh cleanup run between parsing and conversion.
//!
//! Everything here works in file units; master scale is applied afterwards.

use std::collections::HashMap;

use glam::{Vec2, Vec3};

use crate::format::types::{Mesh, UvTransform};

/// Replaces out-of-range face indices with 0. Returns the number of indices fixed.
pub fn check_indices(mesh: &mut Mesh) -> usize {
    if mesh.positions.is_empty() {
        if !mesh.faces.is_empty() {
            log::warn!("Mesh '{}' has {} faces but no vertices", mesh.name, mesh.faces.len());
            mesh.faces.clear();
        }
        return 0;
    }
    let count = mesh.positions.len() as u32;
    let mut fixed = 0;
    for face in &mut mesh.faces {
        for idx in &mut face.indices {
            if *idx >= count {
                *idx = 0;
                fixed += 1;
            }
        }
    }
    if fixed > 0 {
        log::warn!("Mesh '{}': clamped {} invalid face indices", mesh.name, fixed);
    }
    fixed
}

/// Keeps the texture coordinate array parallel to the positions.
pub fn fix_tex_coords(mesh: &mut Mesh) {
    let count = mesh.positions.len();
    if let Some(tex_coords) = &mut mesh.tex_coords {
        if tex_coords.len() != count {
            log::warn!(
                "Mesh '{}': {} texture coordinates for {} vertices",
                mesh.name,
                tex_coords.len(),
                count
            );
            tex_coords.resize(count, Vec2::ZERO);
        }
    }
}

/// Faces touching each distinct position, in face order.
type FacesByPosition = HashMap<[u32; 3], Vec<usize>>;

fn position_key(p: Vec3) -> [u32; 3] {
    // -0.0 and 0.0 are the same point
    p.to_array().map(|v| if v == 0.0 { 0 } else { v.to_bits() })
}

fn faces_by_position(mesh: &Mesh) -> FacesByPosition {
    let mut out = FacesByPosition::new();
    for (face_idx, face) in mesh.faces.iter().enumerate() {
        for idx in face.indices {
            let faces = out.entry(position_key(mesh.positions[idx as usize])).or_default();
            if faces.last() != Some(&face_idx) {
                faces.push(face_idx);
            }
        }
    }
    out
}

/// Faces whose normals blend into the corner of `face_idx` at `vertex`.
///
/// Smoothing groups are bitmasks: two faces at the same position blend when
/// their masks share a bit. A face with mask 0 only ever sees itself.
fn smoothing_set(
    mesh: &Mesh,
    by_position: &FacesByPosition,
    face_idx: usize,
    vertex: u32,
) -> Vec<usize> {
    let group = mesh.faces[face_idx].smoothing_group;
    if group == 0 {
        return vec![face_idx];
    }
    match by_position.get(&position_key(mesh.positions[vertex as usize])) {
        Some(faces) => faces
            .iter()
            .copied()
            .filter(|&other| mesh.faces[other].smoothing_group & group != 0)
            .collect(),
        None => vec![face_idx],
    }
}

/// Splits vertices shared by corners with different smoothing behavior.
///
/// Two corners keep a common vertex only if they blend with exactly the same
/// set of faces; ungrouped faces get vertices of their own. Duplicates are
/// appended in face order, so running this twice changes nothing. Indices
/// must be in range (see [`check_indices`]).
pub fn make_unique(mesh: &mut Mesh) {
    let by_position = faces_by_position(mesh);
    let mut set_ids: HashMap<Vec<usize>, u32> = HashMap::new();
    let corner_sets: Vec<[u32; 3]> = mesh
        .faces
        .iter()
        .enumerate()
        .map(|(face_idx, face)| {
            face.indices.map(|vertex| {
                let set = smoothing_set(mesh, &by_position, face_idx, vertex);
                let next = set_ids.len() as u32;
                *set_ids.entry(set).or_insert(next)
            })
        })
        .collect();

    let Mesh { positions, tex_coords, normals, faces, .. } = mesh;
    let has_normals = normals.len() == positions.len();
    let mut owner: Vec<Option<u32>> = vec![None; positions.len()];
    let mut split: HashMap<(u32, u32), u32> = HashMap::new();

    for (face, sets) in faces.iter_mut().zip(&corner_sets) {
        for (idx, &set) in face.indices.iter_mut().zip(sets) {
            let vertex = *idx as usize;
            match owner[vertex] {
                None => owner[vertex] = Some(set),
                Some(existing) if existing == set => {}
                Some(_) => {
                    *idx = *split.entry((*idx, set)).or_insert_with(|| {
                        positions.push(positions[vertex]);
                        if let Some(tex_coords) = tex_coords.as_mut() {
                            tex_coords.push(tex_coords[vertex]);
                        }
                        if has_normals {
                            normals.push(normals[vertex]);
                        }
                        (positions.len() - 1) as u32
                    });
                }
            }
        }
    }
    if !split.is_empty() {
        log::debug!("Mesh '{}': split {} vertices", mesh.name, split.len());
    }
}

/// Generates smooth per-vertex normals if the mesh has none.
///
/// Each corner gets the uniform average of the face normals in its smoothing
/// set. Expects [`make_unique`] to have run, so that every corner sharing a
/// vertex has the same set.
pub fn gen_normals(mesh: &mut Mesh) {
    if !mesh.normals.is_empty() && mesh.normals.len() == mesh.positions.len() {
        return;
    }
    let face_normals: Vec<Vec3> = mesh
        .faces
        .iter()
        .map(|face| {
            let [a, b, c] = face.indices.map(|i| mesh.positions[i as usize]);
            (b - a).cross(c - a).try_normalize().unwrap_or(Vec3::ZERO)
        })
        .collect();
    let by_position = faces_by_position(mesh);
    let mut normals = vec![Vec3::Z; mesh.positions.len()];
    for (face_idx, face) in mesh.faces.iter().enumerate() {
        for vertex in face.indices {
            let sum: Vec3 = smoothing_set(mesh, &by_position, face_idx, vertex)
                .into_iter()
                .map(|other| face_normals[other])
                .sum();
            normals[vertex as usize] = sum.try_normalize().unwrap_or(Vec3::Z);
        }
    }
    mesh.normals = normals;
}

/// Applies a material UV transform: `rotate(uv, angle) * scale - offset`.
pub fn bake_uv_transform(tex_coords: &[Vec2], transform: &UvTransform) -> Vec<Vec2> {
    let rotation = Vec2::from_angle(transform.rotation);
    tex_coords.iter().map(|&uv| rotation.rotate(uv) * transform.scale - transform.offset).collect()
}

#[derive(Copy, Clone, Debug)]
pub struct RepairOptions {
    pub generate_normals: bool,
}

impl Default for RepairOptions {
    fn default() -> Self { Self { generate_normals: true } }
}

/// Runs the full cleanup on one mesh.
pub fn repair_mesh(mesh: &mut Mesh, options: RepairOptions) {
    check_indices(mesh);
    fix_tex_coords(mesh);
    make_unique(mesh);
    if options.generate_normals {
        gen_normals(mesh);
    }
}
