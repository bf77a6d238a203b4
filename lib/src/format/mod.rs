pub mod chunk;
pub mod hierarchy;
pub mod parse;
pub mod repair;
pub mod types;

use strum::{FromRepr, IntoStaticStr};

/// Known chunk identifiers.
///
/// Anything not listed here is skipped by the parser.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, FromRepr, IntoStaticStr)]
#[repr(u16)]
pub enum ChunkId {
    // File version
    Version = 0x0002,
    // Color / percentage sub-chunks
    ColorF = 0x0010,
    Color24 = 0x0011,
    LinColor24 = 0x0012,
    LinColorF = 0x0013,
    IntPercentage = 0x0030,
    FloatPercentage = 0x0031,
    // Global settings
    MasterScale = 0x0100,
    BitMap = 0x1100,
    UseBitMap = 0x1101,
    AmbientLight = 0x2100,
    // Editor section
    Editor = 0x3D3D,
    MeshVersion = 0x3D3E,
    NamedObject = 0x4000,
    TriMesh = 0x4100,
    PointArray = 0x4110,
    FaceArray = 0x4120,
    MeshMatGroup = 0x4130,
    TexVerts = 0x4140,
    SmoothGroup = 0x4150,
    MeshMatrix = 0x4160,
    MeshColor = 0x4165,
    Light = 0x4600,
    Camera = 0x4700,
    // Materials
    MatName = 0xA000,
    MatAmbient = 0xA010,
    MatDiffuse = 0xA020,
    MatSpecular = 0xA030,
    MatShininess = 0xA040,
    MatShinStrength = 0xA041,
    MatTransparency = 0xA050,
    MatTwoSided = 0xA081,
    MatSelfIllum = 0xA084,
    MatShading = 0xA100,
    MatTexMap = 0xA200,
    MatSpecMap = 0xA204,
    MatOpacMap = 0xA210,
    MatReflMap = 0xA220,
    MatBumpMap = 0xA230,
    MatMapName = 0xA300,
    MatShinMap = 0xA33C,
    MatSelfIllumMap = 0xA33D,
    MatMapTiling = 0xA351,
    MatMapUScale = 0xA354,
    MatMapVScale = 0xA356,
    MatMapUOffset = 0xA358,
    MatMapVOffset = 0xA35A,
    MatMapAngle = 0xA35C,
    MatEntry = 0xAFFF,
    // Keyframer section
    Keyframer = 0xB000,
    AmbientNode = 0xB001,
    ObjectNode = 0xB002,
    CameraNode = 0xB003,
    TargetNode = 0xB004,
    LightNode = 0xB005,
    LightTargetNode = 0xB006,
    SpotlightNode = 0xB007,
    KeyframerHeader = 0xB00A,
    NodeHeader = 0xB010,
    InstanceName = 0xB011,
    Pivot = 0xB013,
    BoundBox = 0xB014,
    PosTrack = 0xB020,
    RotTrack = 0xB021,
    ScaleTrack = 0xB022,
    NodeId = 0xB030,
    // Top-level containers
    Main = 0x4D4D,
    Project = 0xC23D,
}

impl ChunkId {
    #[inline]
    pub fn name(id: u16) -> &'static str { Self::from_repr(id).map_or("Unknown", |id| id.into()) }

    /// Whether `id` may start a file.
    #[inline]
    pub fn is_container(id: u16) -> bool {
        matches!(Self::from_repr(id), Some(ChunkId::Main | ChunkId::Project))
    }
}
