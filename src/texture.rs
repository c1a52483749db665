// src/texture.rs
//! Texture codec (C7): encodes a packed texture (magic + header + per-image
//! records + pixel payload) into a bundle entry's bytes, and decodes it back.

use image::{GenericImage, RgbaImage};

use crate::anchor::{Anchor, AnchorKind};
use crate::byte_codec::{
    read_fixed_point, read_u32_be, write_fixed_point, write_u32_be,
};
use crate::error::{Error, Result};
use crate::packer::{self, PackInput};

pub const TEXTURE_UUID: [u8; 16] = [
    0x0e, 0xb1, 0x4c, 0x84, 0x47, 0x4c, 0xb3, 0xad, 0xa6, 0xbd, 0x93, 0xe4, 0xbe, 0xa5, 0x46, 0xba,
];
pub const TEXTURE_HEADER_LEN: u64 = 38;
pub const IMAGE_HEADER_LEN: u64 = 37;

/// A decoded source image contributing to a composed texture.
pub struct SourceImage {
    pub key: Vec<u8>,
    pub anchor: Anchor,
    pub pixels: RgbaImage,
    /// Caller has already committed this image to a 90-degree rotation,
    /// independent of the texture's `allow_r90` setting.
    pub forced_r90: bool,
}

/// One image record as recovered from a decoded texture entry.
#[derive(Debug, Clone)]
pub struct TextureImage {
    pub key: Vec<u8>,
    pub anchor: Anchor,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub r90: bool,
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub max_width: u32,
    pub max_height: u32,
    pub pow2: bool,
    pub allow_r90: bool,
    pub images: Vec<TextureImage>,
    pub pixel_data_offset: u64,
    pub pixel_data_size: u64,
}

/// Packs `sources` onto a canvas, composes the pixel buffer, PNG-encodes it,
/// and assembles the full bundle-entry payload: magic, header, image
/// records, then the opaque pixel payload. Returns the payload bytes
/// together with the descriptor the caller can use for dirty-checking on a
/// later incremental rebuild.
pub fn compose(
    sources: &[SourceImage],
    max_width: u32,
    max_height: u32,
    pow2: bool,
    allow_r90: bool,
) -> Result<(Vec<u8>, TextureDescriptor)> {
    for s in sources {
        if s.pixels.width() == 0 || s.pixels.height() == 0 {
            return Err(Error::NoPixels(String::from_utf8_lossy(&s.key).into_owned()));
        }
    }

    let pack_inputs: Vec<PackInput> = sources
        .iter()
        .map(|s| PackInput {
            key: s.key.clone(),
            width: s.pixels.width(),
            height: s.pixels.height(),
            forced_r90: s.forced_r90,
        })
        .collect();

    let result = packer::pack(&pack_inputs, max_width, max_height, allow_r90, pow2)?;

    let mut canvas = RgbaImage::new(result.width, result.height);
    let mut images = Vec::with_capacity(sources.len());

    for placement in &result.placements {
        let source = sources
            .iter()
            .find(|s| s.key == placement.key)
            .expect("packer only returns placements for its inputs");

        let oriented = if placement.r90 {
            image::imageops::rotate90(&source.pixels)
        } else {
            source.pixels.clone()
        };
        canvas
            .copy_from(&oriented, placement.x, placement.y)
            .map_err(Error::Image)?;

        images.push(TextureImage {
            key: placement.key.clone(),
            anchor: source.anchor,
            x: placement.x,
            y: placement.y,
            width: placement.width,
            height: placement.height,
            r90: placement.r90,
        });
    }

    let mut png_bytes = Vec::new();
    {
        let mut cursor = std::io::Cursor::new(&mut png_bytes);
        canvas
            .write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(Error::Image)?;
    }

    let total_image_entries_size: u64 = images
        .iter()
        .map(|img| IMAGE_HEADER_LEN + img.key.len() as u64)
        .sum();
    let image_data_offset = TEXTURE_HEADER_LEN + total_image_entries_size;

    let mut payload = Vec::with_capacity(image_data_offset as usize + png_bytes.len());
    payload.extend_from_slice(&TEXTURE_UUID);
    write_u32_be(&mut payload, image_data_offset as u32);
    write_u32_be(&mut payload, images.len() as u32);
    write_u32_be(&mut payload, TEXTURE_HEADER_LEN as u32);
    write_u32_be(&mut payload, result.width);
    write_u32_be(&mut payload, result.height);
    payload.push(pow2 as u8);
    payload.push(allow_r90 as u8);
    debug_assert_eq!(payload.len() as u64, TEXTURE_HEADER_LEN);

    for img in &images {
        write_u32_be(&mut payload, IMAGE_HEADER_LEN as u32 + img.key.len() as u32);
        write_u32_be(&mut payload, img.anchor.kind.as_u32());
        write_fixed_point(&mut payload, img.anchor.x);
        write_fixed_point(&mut payload, img.anchor.y);
        write_u32_be(&mut payload, img.x);
        write_u32_be(&mut payload, img.y);
        write_u32_be(&mut payload, img.width);
        write_u32_be(&mut payload, img.height);
        payload.push(img.r90 as u8);
        write_u32_be(&mut payload, img.key.len() as u32);
        payload.extend_from_slice(&img.key);
    }

    debug_assert_eq!(payload.len() as u64, image_data_offset);
    payload.extend_from_slice(&png_bytes);

    let descriptor = TextureDescriptor {
        max_width,
        max_height,
        pow2,
        allow_r90,
        images,
        pixel_data_offset: image_data_offset,
        pixel_data_size: png_bytes.len() as u64,
    };

    Ok((payload, descriptor))
}

/// Parses a texture entry's bytes into its descriptor. The pixel payload
/// itself stays opaque -- fetch it with `pixel_data` once you have the
/// offset/size pair.
pub fn decode(bytes: &[u8]) -> Result<TextureDescriptor> {
    if bytes.len() < TEXTURE_HEADER_LEN as usize {
        return Err(Error::InvalidFormat("texture entry too short".into()));
    }
    if bytes[0..16] != TEXTURE_UUID {
        return Err(Error::InvalidFormat("bad texture magic".into()));
    }

    let pixel_data_offset = read_u32_be(&bytes[16..20]) as u64;
    let images_count = read_u32_be(&bytes[20..24]) as usize;
    let offset_to_first_image = read_u32_be(&bytes[24..28]) as u64;
    let max_width = read_u32_be(&bytes[28..32]);
    let max_height = read_u32_be(&bytes[32..36]);
    let pow2 = bytes[36] != 0;
    let allow_r90 = bytes[37] != 0;

    let mut images = Vec::with_capacity(images_count);
    let mut offset = offset_to_first_image as usize;
    for _ in 0..images_count {
        if offset + IMAGE_HEADER_LEN as usize > bytes.len() {
            return Err(Error::InvalidFormat("truncated image record".into()));
        }
        let rec = &bytes[offset..];
        let record_size = read_u32_be(&rec[0..4]) as usize;
        let anchor_kind = AnchorKind::from_u32(read_u32_be(&rec[4..8]))?;
        let anchor_x = read_fixed_point(&rec[8..12]);
        let anchor_y = read_fixed_point(&rec[12..16]);
        let x = read_u32_be(&rec[16..20]);
        let y = read_u32_be(&rec[20..24]);
        let width = read_u32_be(&rec[24..28]);
        let height = read_u32_be(&rec[28..32]);
        let r90 = rec[32] != 0;
        let key_size = read_u32_be(&rec[33..37]) as usize;
        let key_start = offset + IMAGE_HEADER_LEN as usize;
        if key_start + key_size > bytes.len() {
            return Err(Error::InvalidFormat("truncated image key".into()));
        }
        let key = bytes[key_start..key_start + key_size].to_vec();

        images.push(TextureImage {
            key,
            anchor: Anchor {
                kind: anchor_kind,
                x: anchor_x,
                y: anchor_y,
            },
            x,
            y,
            width,
            height,
            r90,
        });

        offset += record_size;
    }

    if pixel_data_offset > bytes.len() as u64 {
        return Err(Error::InvalidFormat("pixel data offset past end of entry".into()));
    }
    let pixel_data_size = bytes.len() as u64 - pixel_data_offset;

    Ok(TextureDescriptor {
        max_width,
        max_height,
        pow2,
        allow_r90,
        images,
        pixel_data_offset,
        pixel_data_size,
    })
}

pub fn pixel_data(bytes: &[u8], descriptor: &TextureDescriptor) -> &[u8] {
    let start = descriptor.pixel_data_offset as usize;
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_fn(w, h, |_, _| image::Rgba(rgba))
    }

    #[test]
    fn composes_and_decodes_round_trip() {
        let sources = vec![
            SourceImage {
                key: b"a".to_vec(),
                anchor: Anchor::explicit(3.5, 4.0),
                pixels: solid(8, 8, [255, 0, 0, 255]),
                forced_r90: false,
            },
            SourceImage {
                key: b"b".to_vec(),
                anchor: Anchor::named(AnchorKind::Center, 16, 16),
                pixels: solid(16, 16, [0, 255, 0, 255]),
                forced_r90: false,
            },
            SourceImage {
                key: b"c".to_vec(),
                anchor: Anchor::named(AnchorKind::Right, 8, 8),
                pixels: solid(8, 8, [0, 0, 255, 255]),
                forced_r90: false,
            },
            SourceImage {
                key: b"d".to_vec(),
                anchor: Anchor::named(AnchorKind::Left, 16, 16),
                pixels: solid(16, 16, [255, 255, 0, 255]),
                forced_r90: false,
            },
        ];

        let (payload, descriptor) = compose(&sources, 64, 64, false, true).unwrap();
        assert_eq!(descriptor.images.len(), 4);

        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.images.len(), 4);
        assert_eq!(decoded.max_width, descriptor.max_width);

        let a = decoded.images.iter().find(|i| i.key == b"a").unwrap();
        assert!((a.anchor.x - 3.5).abs() < 1.0 / 16384.0 * 2.0);
        assert!((a.anchor.y - 4.0).abs() < 1.0 / 16384.0 * 2.0);
        assert_eq!(a.anchor.kind, AnchorKind::Explicit);

        let b = decoded.images.iter().find(|i| i.key == b"b").unwrap();
        assert_eq!(b.anchor.kind, AnchorKind::Center);
        assert_eq!(b.width, 16);
        assert_eq!(b.height, 16);

        let pixels = pixel_data(&payload, &decoded);
        assert!(!pixels.is_empty());
        // PNG magic
        assert_eq!(&pixels[0..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn rejects_bad_magic() {
        let bad = vec![0u8; TEXTURE_HEADER_LEN as usize];
        let err = decode(&bad).unwrap_err();
        assert_eq!(err.err_str(), "invalid-format");
    }

    #[test]
    fn empty_pixels_is_rejected() {
        let sources = vec![SourceImage {
            key: b"empty".to_vec(),
            anchor: Anchor::named(AnchorKind::Center, 0, 0),
            pixels: RgbaImage::new(0, 0),
            forced_r90: false,
        }];
        let err = compose(&sources, 64, 64, false, true).unwrap_err();
        assert_eq!(err.err_str(), "no-pixels");
    }
}
