//! Skin textures and their content hash.
//!
//! A texture is the raw PNG as served upstream plus the MD5 of its decoded
//! RGBA pixel buffer. The hash doubles as the HTTP ETag. In the texture cache
//! a texture is stored as `[hash: 16 bytes][png]` so a warm hit needs no
//! decode.

use bytes::{BufMut, Bytes, BytesMut};
use image::{ImageFormat, RgbaImage};

const HASH_LEN: usize = 16;

// Mojang AB copyrighted imagery; use is subject to their terms.
const STEVE_PNG: &[u8] = include_bytes!("../assets/steve.png");

/// Pixel hash of [`STEVE_PNG`], the ETag every fallback response carries.
pub const STEVE_HASH: &str = "98903c1609352e11552dca79eb1ce3d6";

/// Errors decoding textures or texture records.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TextureError {
    #[error("texture decode failed: {0}")]
    Decode(String),

    #[error("texture record corrupt: {0}")]
    Record(String),
}

/// A validated skin PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    png: Bytes,
    hash: [u8; HASH_LEN],
}

impl Texture {
    /// Validate `png` and compute its content hash.
    pub fn from_png(png: Bytes) -> Result<Self, TextureError> {
        let hash = pixel_hash(&decode(&png)?);
        Ok(Self { png, hash })
    }

    pub fn png(&self) -> &Bytes {
        &self.png
    }

    pub fn hash(&self) -> [u8; HASH_LEN] {
        self.hash
    }

    /// Lowercase hex of the content hash.
    pub fn etag(&self) -> String {
        hex::encode(self.hash)
    }

    /// Decoded RGBA pixels.
    pub fn image(&self) -> Result<RgbaImage, TextureError> {
        decode(&self.png)
    }

    /// Texture cache representation.
    pub fn to_record(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HASH_LEN + self.png.len());
        buf.put_slice(&self.hash);
        buf.put_slice(&self.png);
        buf.freeze()
    }

    pub fn from_record(mut record: Bytes) -> Result<Self, TextureError> {
        if record.len() <= HASH_LEN {
            return Err(TextureError::Record(format!("{} bytes", record.len())));
        }
        let png = record.split_off(HASH_LEN);
        let hash: [u8; HASH_LEN] = record[..].try_into().map_err(|_| TextureError::Record("hash length".into()))?;
        Ok(Self { png, hash })
    }

    /// The built-in default skin served for `char`/`mhf_steve` and on failure.
    pub fn steve() -> Result<Self, TextureError> {
        Self::from_png(Bytes::from_static(STEVE_PNG))
    }
}

fn decode(png: &[u8]) -> Result<RgbaImage, TextureError> {
    image::load_from_memory_with_format(png, ImageFormat::Png)
        .map(|img| img.to_rgba8())
        .map_err(|e| TextureError::Decode(e.to_string()))
}

fn pixel_hash(pixels: &RgbaImage) -> [u8; HASH_LEN] {
    md5::compute(pixels.as_raw()).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steve_is_the_legacy_default_skin() {
        let steve = Texture::steve().unwrap();
        let img = steve.image().unwrap();
        assert_eq!(img.dimensions(), (64, 32));
        assert_eq!(steve.etag(), STEVE_HASH);
    }

    #[test]
    fn test_hash_is_over_pixels_not_bytes() {
        let steve = Texture::steve().unwrap();
        let pixels = steve.image().unwrap();
        assert_eq!(steve.hash(), md5::compute(pixels.as_raw()).0);
        assert_ne!(steve.hash(), md5::compute(steve.png()).0);
    }

    #[test]
    fn test_record_roundtrip() {
        let steve = Texture::steve().unwrap();
        assert_eq!(Texture::from_record(steve.to_record()).unwrap(), steve);
        assert!(matches!(Texture::from_record(Bytes::from_static(&[0; 16])), Err(TextureError::Record(_))));
    }

    #[test]
    fn test_rejects_non_png() {
        assert!(matches!(Texture::from_png(Bytes::from_static(b"GIF89a")), Err(TextureError::Decode(_))));
    }
}
