use std::path::Path;

use anyhow::{Context, Result};

use crate::{
    convert::{apply_master_scale, convert_scene, ConvertOptions},
    format::{
        chunk::{ChunkCursor, CHUNK_HEADER_SIZE},
        parse::parse_scene,
        repair::{repair_mesh, RepairOptions},
        ChunkId,
    },
    scene::Scene,
    util::file::IoSystem,
};

/// Common interface of file format importers.
pub trait Importer: Send + Sync {
    /// Lowercase file extensions handled by this importer.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether `path` looks like something this importer reads. With
    /// `check_signature`, files with unknown extensions are opened and probed.
    fn can_read(&self, path: &Path, io: &dyn IoSystem, check_signature: bool) -> bool;

    fn read_file(&self, path: &Path, io: &dyn IoSystem) -> Result<Scene>;
}

#[derive(Copy, Clone, Debug)]
pub struct ImportOptions {
    /// Synthesize normals for meshes that have none.
    pub generate_normals: bool,
    /// Bake diffuse map offset/scale/rotation into texture coordinates.
    pub bake_uv_transforms: bool,
    pub apply_master_scale: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { generate_normals: true, bake_uv_transforms: true, apply_master_scale: true }
    }
}

/// Importer for 3D Studio `.3ds` files (and `.prj` project files).
#[derive(Clone, Debug, Default)]
pub struct Dot3dsImporter {
    pub options: ImportOptions,
}

impl Dot3dsImporter {
    pub fn new(options: ImportOptions) -> Self { Self { options } }

    /// Checks the first chunk header.
    pub fn probe_buffer(data: &[u8]) -> bool {
        let mut cursor = ChunkCursor::new(data);
        match cursor.read_header() {
            Ok(header) => {
                ChunkId::is_container(header.id()) && header.length() as usize >= CHUNK_HEADER_SIZE
            }
            Err(_) => false,
        }
    }

    /// Decodes an in-memory file.
    pub fn read_buffer(&self, data: &[u8]) -> Result<Scene> {
        let mut intermediate = parse_scene(data)?;
        log::debug!(
            "Parsed {} meshes, {} materials, {} nodes",
            intermediate.meshes.len(),
            intermediate.materials.len(),
            intermediate.nodes.len() - 1
        );
        let repair = RepairOptions { generate_normals: self.options.generate_normals };
        for mesh in &mut intermediate.meshes {
            repair_mesh(mesh, repair);
        }
        let master_scale = intermediate.master_scale;
        let convert = ConvertOptions { bake_uv_transforms: self.options.bake_uv_transforms };
        let mut scene = convert_scene(intermediate, convert);
        if self.options.apply_master_scale {
            apply_master_scale(&mut scene, master_scale);
        }
        Ok(scene)
    }
}

impl Importer for Dot3dsImporter {
    fn extensions(&self) -> &'static [&'static str] { &["3ds", "prj"] }

    fn can_read(&self, path: &Path, io: &dyn IoSystem, check_signature: bool) -> bool {
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        if let Some(extension) = extension {
            if self.extensions().contains(&extension.as_str()) {
                return true;
            }
        }
        if !check_signature || !io.exists(path) {
            return false;
        }
        match io.read(path) {
            Ok(data) => Self::probe_buffer(&data),
            Err(e) => {
                log::debug!("Failed to probe '{}': {:#}", path.display(), e);
                false
            }
        }
    }

    fn read_file(&self, path: &Path, io: &dyn IoSystem) -> Result<Scene> {
        let data = io.read(path)?;
        self.read_buffer(&data)
            .with_context(|| format!("Failed to import '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::file::MemoryIoSystem;

    const EMPTY_MAIN: [u8; 6] = [0x4D, 0x4D, 6, 0, 0, 0];

    #[test]
    fn probe_checks_first_header() {
        assert!(Dot3dsImporter::probe_buffer(&EMPTY_MAIN));
        assert!(Dot3dsImporter::probe_buffer(&[0x3D, 0xC2, 6, 0, 0, 0]));
        assert!(!Dot3dsImporter::probe_buffer(&[0x3D, 0x3D, 6, 0, 0, 0]));
        assert!(!Dot3dsImporter::probe_buffer(&[0x4D, 0x4D, 2, 0, 0, 0]));
        assert!(!Dot3dsImporter::probe_buffer(&EMPTY_MAIN[..4]));
    }

    #[test]
    fn can_read_by_extension_or_signature() {
        let mut io = MemoryIoSystem::new();
        io.insert("model.bin", EMPTY_MAIN.to_vec());
        io.insert("other.bin", b"glTF".to_vec());
        let importer = Dot3dsImporter::default();
        assert!(importer.can_read(Path::new("MODEL.3DS"), &io, false));
        assert!(importer.can_read(Path::new("scene.prj"), &io, false));
        assert!(!importer.can_read(Path::new("model.bin"), &io, false));
        assert!(importer.can_read(Path::new("model.bin"), &io, true));
        assert!(!importer.can_read(Path::new("other.bin"), &io, true));
        assert!(!importer.can_read(Path::new("missing.bin"), &io, true));
    }

    #[test]
    fn read_file_through_io() {
        let mut io = MemoryIoSystem::new();
        io.insert("empty.3ds", EMPTY_MAIN.to_vec());
        let scene = Dot3dsImporter::default().read_file(Path::new("empty.3ds"), &io).unwrap();
        assert!(scene.meshes.is_empty());
        assert!(Dot3dsImporter::default().read_file(Path::new("nope.3ds"), &io).is_err());
    }
}
