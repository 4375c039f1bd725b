//! Byte views of plain vertex data for buffer uploads.

use fxlayer_core::Vertex;

/// # Safety
///
/// Only implement on `#[repr(C)]` types made of plain numeric fields with no
/// padding.
pub unsafe trait AsBytes: Sized {
    fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, std::mem::size_of::<Self>()) }
    }
}

/// `#[repr(C)]`, 52 bytes, every field 4-byte aligned.
unsafe impl AsBytes for Vertex {}

pub fn slice_as_bytes<T: AsBytes>(items: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(items.as_ptr().cast::<u8>(), std::mem::size_of_val(items)) }
}

/// Attribute locations and byte offsets of [`Vertex`]: position, color,
/// then two texture coordinates.
pub const VERTEX_ATTRIBUTES: [(u32, i32, usize); 4] = [(0, 4, 0), (1, 4, 16), (2, 4, 20), (3, 4, 36)];

pub const VERTEX_STRIDE: usize = std::mem::size_of::<Vertex>();

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(VERTEX_STRIDE, 52);
        assert_eq!(VERTEX_ATTRIBUTES[0].2, offset_of!(Vertex, position));
        assert_eq!(VERTEX_ATTRIBUTES[1].2, offset_of!(Vertex, color));
        assert_eq!(VERTEX_ATTRIBUTES[2].2, offset_of!(Vertex, tex_coords));
        assert_eq!(VERTEX_ATTRIBUTES[3].2, offset_of!(Vertex, tex_coords) + 16);
    }

    #[test]
    fn slices_view_every_byte() {
        let quad = fxlayer_core::fullscreen_quad();
        let bytes = slice_as_bytes(&quad);
        assert_eq!(bytes.len(), 4 * 52);
        assert_eq!(&bytes[0..4], &(-1.0f32).to_ne_bytes());
        assert_eq!(quad[1].as_bytes(), &bytes[52..104]);
    }
}
