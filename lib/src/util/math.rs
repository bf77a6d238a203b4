use binrw::binrw;
use glam::{Vec2, Vec3};

#[binrw]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl From<Vector2> for Vec2 {
    fn from(v: Vector2) -> Self { Vec2::new(v.x, v.y) }
}

#[binrw]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vector3> for Vec3 {
    fn from(v: Vector3) -> Self { Vec3::new(v.x, v.y, v.z) }
}

/// Linear RGB color, components in `[0, 1]`.
#[binrw]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Color3 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color3 {
    pub const BLACK: Self = Self::grey(0.0);

    #[inline]
    pub const fn new(r: f32, g: f32, b: f32) -> Self { Self { r, g, b } }

    #[inline]
    pub const fn grey(v: f32) -> Self { Self { r: v, g: v, b: v } }
}

/// 24-bit color as stored in byte color chunks.
#[binrw]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Color24 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl From<Color24> for Color3 {
    fn from(c: Color24) -> Self {
        Self::new(c.r as f32 / 255.0, c.g as f32 / 255.0, c.b as f32 / 255.0)
    }
}

#[cfg(test)]
mod tests {
    use binrw::{BinReaderExt, Endian};

    use super::*;

    #[test]
    fn records_convert_to_glam() {
        let bytes = [1.0f32, -2.0, 0.5].map(f32::to_le_bytes).concat();
        let v: Vector3 = std::io::Cursor::new(bytes).read_type(Endian::Little).unwrap();
        assert_eq!(Vec3::from(v), Vec3::new(1.0, -2.0, 0.5));
        assert_eq!(Vec2::from(Vector2 { x: 0.25, y: 4.0 }), Vec2::new(0.25, 4.0));
    }

    #[test]
    fn byte_colors_scale_to_unit_range() {
        let c = Color3::from(Color24 { r: 255, g: 0, b: 51 });
        assert_eq!(c, Color3::new(1.0, 0.0, 0.2));
    }
}
