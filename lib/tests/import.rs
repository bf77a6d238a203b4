use std::path::Path;

use glam::Vec3;
use tdslib::{
    convert::DEFAULT_MATERIAL_NAME,
    error::FormatError,
    format::ChunkId,
    import::{Dot3dsImporter, ImportOptions, Importer},
    scene::{Scene, TextureKind},
    util::file::MemoryIoSystem,
};

fn chunk(id: ChunkId, payload: &[u8]) -> Vec<u8> {
    let mut out = (id as u16).to_le_bytes().to_vec();
    out.extend(((payload.len() + 6) as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn container(id: ChunkId, children: &[Vec<u8>]) -> Vec<u8> { chunk(id, &children.concat()) }

fn cstr(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

fn floats(values: &[f32]) -> Vec<u8> { values.iter().flat_map(|v| v.to_le_bytes()).collect() }

fn shorts(values: &[u16]) -> Vec<u8> { values.iter().flat_map(|v| v.to_le_bytes()).collect() }

fn material(name: &str, rgb: [u8; 3]) -> Vec<u8> {
    container(ChunkId::MatEntry, &[
        chunk(ChunkId::MatName, &cstr(name)),
        chunk(ChunkId::MatDiffuse, &chunk(ChunkId::Color24, &rgb)),
    ])
}

struct MeshDesc<'a> {
    name: &'a str,
    positions: &'a [[f32; 3]],
    faces: &'a [[u16; 3]],
    groups: &'a [(&'a str, &'a [u16])],
    smoothing: Option<&'a [u32]>,
}

fn object(desc: &MeshDesc) -> Vec<u8> {
    let mut points = shorts(&[desc.positions.len() as u16]);
    for p in desc.positions {
        points.extend(floats(p));
    }
    let mut faces = shorts(&[desc.faces.len() as u16]);
    for f in desc.faces {
        faces.extend(shorts(&[f[0], f[1], f[2], 0]));
    }
    for (name, indices) in desc.groups {
        let mut group = cstr(name);
        group.extend(shorts(&[indices.len() as u16]));
        group.extend(shorts(indices));
        faces.extend(chunk(ChunkId::MeshMatGroup, &group));
    }
    if let Some(smoothing) = desc.smoothing {
        let bytes: Vec<u8> = smoothing.iter().flat_map(|g| g.to_le_bytes()).collect();
        faces.extend(chunk(ChunkId::SmoothGroup, &bytes));
    }
    let mesh = container(ChunkId::TriMesh, &[
        chunk(ChunkId::PointArray, &points),
        chunk(ChunkId::FaceArray, &faces),
    ]);
    chunk(ChunkId::NamedObject, &[cstr(desc.name), mesh].concat())
}

fn node(name: &str, depth: i16, pivot: [f32; 3]) -> Vec<u8> {
    let mut header = cstr(name);
    header.extend(shorts(&[0, 0]));
    header.extend(depth.to_le_bytes());
    container(ChunkId::ObjectNode, &[
        chunk(ChunkId::NodeHeader, &header),
        chunk(ChunkId::Pivot, &floats(&pivot)),
    ])
}

fn import(data: &[u8]) -> Scene { Dot3dsImporter::default().read_buffer(data).unwrap() }

fn import_err(data: &[u8]) -> FormatError {
    let err = Dot3dsImporter::default().read_buffer(data).unwrap_err();
    err.downcast_ref::<FormatError>().cloned().expect("structural error")
}

const TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

fn two_material_quad() -> Vec<u8> {
    let quad = MeshDesc {
        name: "Quad",
        positions: &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
        faces: &[[0, 1, 2], [0, 2, 3], [2, 1, 0]],
        groups: &[("Red", &[0, 2]), ("Blue", &[1])],
        smoothing: Some(&[1, 1, 1]),
    };
    container(ChunkId::Main, &[container(ChunkId::Editor, &[
        material("Red", [255, 0, 0]),
        material("Blue", [0, 0, 255]),
        object(&quad),
    ])])
}

#[test]
fn zero_mesh_file() {
    let data = container(ChunkId::Main, &[
        chunk(ChunkId::Version, &3u32.to_le_bytes()),
        container(ChunkId::Editor, &[chunk(ChunkId::MeshVersion, &3u32.to_le_bytes())]),
    ]);
    let scene = import(&data);
    assert_eq!(scene.root.name, "<3DSRoot>");
    assert!(scene.root.children.is_empty());
    assert!(scene.meshes.is_empty());
    assert!(scene.materials.is_empty());
}

#[test]
fn mesh_split_per_material() {
    let scene = import(&two_material_quad());
    assert_eq!(scene.meshes.len(), 2);
    assert_eq!(scene.materials.len(), 2);
    let faces: usize = scene.meshes.iter().map(|m| m.faces.len()).sum();
    assert_eq!(faces, 3);
    for mesh in &scene.meshes {
        let count = mesh.positions.len() as u32;
        assert!(mesh.faces.iter().flatten().all(|&i| i < count));
        assert_eq!(mesh.normals.len(), mesh.positions.len());
    }
    let red = scene.meshes.iter().find(|m| scene.materials[m.material].name == "Red").unwrap();
    assert_eq!(red.faces.len(), 2);
    // No keyframer: the mesh gets its own node
    assert_eq!(scene.root.children.len(), 1);
    assert_eq!(scene.root.children[0].name, "Quad");
    assert_eq!(scene.root.children[0].meshes, vec![0, 1]);
}

#[test]
fn faces_without_material_use_default() {
    let tri = MeshDesc { name: "Tri", positions: &TRIANGLE, faces: &[[0, 1, 2]], groups: &[], smoothing: None };
    let data = container(ChunkId::Main, &[container(ChunkId::Editor, &[object(&tri)])]);
    let scene = import(&data);
    assert_eq!(scene.materials.len(), 1);
    assert_eq!(scene.materials[0].name, DEFAULT_MATERIAL_NAME);
    assert_eq!(scene.meshes[0].material, 0);
    assert_eq!(scene.meshes[0].normals, vec![Vec3::Z; 3]);
}

#[test]
fn master_scale_doubles_positions_and_pivots() {
    let tri = MeshDesc { name: "Tri", positions: &TRIANGLE, faces: &[[0, 1, 2]], groups: &[], smoothing: None };
    let build = |scale: Option<f32>| {
        let mut editor = vec![object(&tri)];
        if let Some(scale) = scale {
            editor.push(chunk(ChunkId::MasterScale, &scale.to_le_bytes()));
        }
        container(ChunkId::Main, &[
            container(ChunkId::Editor, &editor),
            container(ChunkId::Keyframer, &[node("Tri", 0, [1.0, 2.0, 3.0])]),
        ])
    };
    let plain = import(&build(None));
    let scaled = import(&build(Some(2.0)));
    for (a, b) in plain.meshes[0].positions.iter().zip(&scaled.meshes[0].positions) {
        assert_eq!(*a * 2.0, *b);
    }
    assert_eq!(plain.root.children[0].pivot, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(scaled.root.children[0].pivot, Vec3::new(2.0, 4.0, 6.0));

    let options = ImportOptions { apply_master_scale: false, ..Default::default() };
    let unscaled = Dot3dsImporter::new(options).read_buffer(&build(Some(2.0))).unwrap();
    assert_eq!(unscaled.meshes[0].positions, plain.meshes[0].positions);
}

#[test]
fn keyframer_depths_rebuild_tree() {
    let data = container(ChunkId::Main, &[container(ChunkId::Keyframer, &[
        node("N1", 0, [0.0; 3]),
        node("N2", 1, [0.0; 3]),
        node("N3", 2, [0.0; 3]),
        node("N4", 1, [0.0; 3]),
    ])]);
    let scene = import(&data);
    assert_eq!(scene.root.children.len(), 1);
    let n1 = &scene.root.children[0];
    assert_eq!(n1.name, "N1");
    let names: Vec<&str> = n1.children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["N2", "N4"]);
    assert_eq!(n1.children[0].children[0].name, "N3");
    assert!(n1.children[1].children.is_empty());
}

#[test]
fn smoothing_groups_control_hard_edges() {
    let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.5, -1.0, 1.0]];
    let build = |groups: &[u32]| {
        let desc = MeshDesc {
            name: "Fold",
            positions: &positions,
            faces: &[[0, 1, 2], [1, 0, 3]],
            groups: &[],
            smoothing: Some(groups),
        };
        container(ChunkId::Main, &[container(ChunkId::Editor, &[object(&desc)])])
    };
    let smooth = import(&build(&[1, 1]));
    assert_eq!(smooth.meshes[0].positions.len(), 4);
    let overlapping = import(&build(&[0b01, 0b11]));
    assert_eq!(overlapping.meshes[0].positions.len(), 4);
    assert_eq!(overlapping.meshes[0].normals, smooth.meshes[0].normals);

    let hard = import(&build(&[1, 2]));
    let mesh = &hard.meshes[0];
    assert_eq!(mesh.positions.len(), 6);
    let shared: Vec<usize> = (0..mesh.positions.len())
        .filter(|&i| mesh.positions[i] == Vec3::new(1.0, 0.0, 0.0))
        .collect();
    assert_eq!(shared.len(), 2);
    assert_ne!(mesh.normals[shared[0]], mesh.normals[shared[1]]);
}

#[test]
fn bad_indices_are_clamped() {
    let tri = MeshDesc {
        name: "Tri",
        positions: &TRIANGLE,
        faces: &[[0, 1, 2], [0, 9, 2]],
        groups: &[],
        smoothing: None,
    };
    let scene = import(&container(ChunkId::Main, &[container(ChunkId::Editor, &[object(&tri)])]));
    let mesh = &scene.meshes[0];
    let count = mesh.positions.len() as u32;
    assert!(mesh.faces.iter().flatten().all(|&i| i < count));
    assert_eq!(mesh.faces.len(), 2);
}

#[test]
fn missing_colors_fall_back_to_defaults() {
    let mat = container(ChunkId::MatEntry, &[
        chunk(ChunkId::MatName, &cstr("Bare")),
        chunk(ChunkId::MatDiffuse, &[]),
        chunk(ChunkId::MatTexMap, &chunk(ChunkId::MatMapName, &cstr("bare.png"))),
    ]);
    let data = container(ChunkId::Main, &[container(ChunkId::Editor, &[
        container(ChunkId::AmbientLight, &[chunk(ChunkId::ColorF, &floats(&[0.1, 0.1, 0.1]))]),
        mat,
    ])]);
    let scene = import(&data);
    let material = &scene.materials[0];
    assert_eq!(material.diffuse.r, 0.6);
    assert_eq!(material.ambient.r, 0.1);
    assert_eq!(material.opacity, 1.0);
    assert_eq!(material.texture(TextureKind::Diffuse).map(|t| t.path.as_str()), Some("bare.png"));
}

#[test]
fn truncated_files() {
    // Main chunk claims more than the file holds; the tail is still read
    let mut data = two_material_quad();
    let len = data.len();
    data[2..6].copy_from_slice(&((len + 100) as u32).to_le_bytes());
    assert_eq!(import(&data).meshes.len(), 2);

    // Cut through the middle of the point array
    let full = two_material_quad();
    let point_array = full.windows(2).position(|w| w == [0x10, 0x41]).unwrap();
    let scene = import(&full[..point_array + 14]);
    assert!(scene.meshes.iter().all(|m| m.faces.is_empty() || !m.positions.is_empty()));

    assert_eq!(import_err(&[]), FormatError::Empty);
    assert_eq!(import_err(b"PK\x03\x04\x00\x00"), FormatError::NotA3ds { id: 0x4B50 });
    assert!(matches!(import_err(&[0x4D, 0x4D, 0x10]), FormatError::UnexpectedEof { .. }));
}

#[test]
fn structural_errors_survive_context() {
    let mut io = MemoryIoSystem::new();
    io.insert("bad.3ds", vec![0x4D, 0x4D, 2, 0, 0, 0]);
    let importer = Dot3dsImporter::default();
    assert!(importer.can_read(Path::new("bad.3ds"), &io, false));
    let err = importer.read_file(Path::new("bad.3ds"), &io).unwrap_err();
    assert_eq!(
        err.downcast_ref::<FormatError>(),
        Some(&FormatError::InvalidChunkLength { id: 0x4D4D, offset: 0, length: 2 })
    );
}
