//! Texture backends turning fetched image bytes into renderer resources.

use thiserror::Error;

use crate::tile::TileKey;

/// Errors creating a texture from a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextureError {
    /// The payload could not be decoded as an image.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// The payload was empty.
    #[error("Empty image payload")]
    Empty,
}

/// Creates and releases the renderer-side resource for a tile.
///
/// The cache calls `release` exactly once for every texture `create`
/// returned, either on eviction or when the cache is dropped.
pub trait TextureBackend {
    type Texture;

    fn create(&mut self, key: &TileKey, data: &[u8]) -> Result<Self::Texture, TextureError>;

    fn release(&mut self, texture: Self::Texture);
}

/// RGBA8 pixels of a decoded tile image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTexture {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

/// Backend that decodes images in memory with the `image` crate.
///
/// Suitable for renderers that upload pixels themselves, and for tests.
#[derive(Debug, Default)]
pub struct DecodedImageBackend {
    resident: usize,
    resident_bytes: usize,
}

impl DecodedImageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Textures created and not yet released.
    pub fn resident(&self) -> usize {
        self.resident
    }

    /// Pixel bytes held by resident textures.
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }
}

impl TextureBackend for DecodedImageBackend {
    type Texture = DecodedTexture;

    fn create(&mut self, _key: &TileKey, data: &[u8]) -> Result<DecodedTexture, TextureError> {
        if data.is_empty() {
            return Err(TextureError::Empty);
        }
        let image = image::load_from_memory(data)
            .map_err(|e| TextureError::Decode(e.to_string()))?
            .to_rgba8();

        let texture = DecodedTexture {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        };
        self.resident += 1;
        self.resident_bytes += texture.pixels.len();
        Ok(texture)
    }

    fn release(&mut self, texture: DecodedTexture) {
        self.resident = self.resident.saturating_sub(1);
        self.resident_bytes = self.resident_bytes.saturating_sub(texture.pixels.len());
    }
}
