//! Texture topology, filtering and wrapping

use serde::{Deserialize, Serialize};

use super::backend::Capabilities;
use super::GraphicsError;

/// Texture topology
///
/// Per-variant data lives on the variant, so a volume always has a depth and
/// an array always has a layer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    /// A single 2D image
    Flat,
    /// A 3D texture
    Volume {
        /// Number of depth slices
        depth: u32,
    },
    /// A stack of same-sized 2D layers
    Array {
        /// Number of layers
        layers: u32,
    },
    /// Six square faces
    Cube,
}

impl TextureKind {
    /// Number of slices addressable for reads and attachment
    pub const fn slice_count(&self) -> u32 {
        match self {
            Self::Flat => 1,
            Self::Volume { depth } => *depth,
            Self::Array { layers } => *layers,
            Self::Cube => 6,
        }
    }

    /// Human-readable topology name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Flat => "2d",
            Self::Volume { .. } => "volume",
            Self::Array { .. } => "array",
            Self::Cube => "cube",
        }
    }
}

/// A texture topology together with validated pixel dimensions
///
/// Only constructible through [`TextureShape::new`], which rejects zero
/// sizes, empty volumes/arrays and non-square cubes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureShape {
    kind: TextureKind,
    width: u32,
    height: u32,
}

impl TextureShape {
    /// Validate and build a shape
    pub fn new(kind: TextureKind, width: u32, height: u32) -> Result<Self, GraphicsError> {
        if width == 0 || height == 0 || kind.slice_count() == 0 {
            return Err(GraphicsError::InvalidDimensions);
        }

        if kind == TextureKind::Cube && width != height {
            return Err(GraphicsError::CubeNotSquare);
        }

        Ok(Self { kind, width, height })
    }

    /// Shorthand for a flat 2D shape
    pub fn flat(width: u32, height: u32) -> Result<Self, GraphicsError> {
        Self::new(TextureKind::Flat, width, height)
    }

    /// Topology
    pub const fn kind(&self) -> TextureKind {
        self.kind
    }

    /// Width in pixels
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Total texel count across all slices
    pub const fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.kind.slice_count() as usize
    }

    /// Check the shape against the backend's size limits for its topology
    pub fn check_limits(&self, caps: &Capabilities) -> Result<(), GraphicsError> {
        let too_large = |dimension: &'static str, pixels: u32| GraphicsError::TextureTooLarge {
            dimension,
            pixels,
        };

        match self.kind {
            TextureKind::Flat => {
                if self.width > caps.max_texture_size {
                    return Err(too_large("width", self.width));
                }
                if self.height > caps.max_texture_size {
                    return Err(too_large("height", self.height));
                }
            }
            TextureKind::Volume { depth } => {
                if self.width > caps.max_volume_texture_size {
                    return Err(too_large("width", self.width));
                }
                if self.height > caps.max_volume_texture_size {
                    return Err(too_large("height", self.height));
                }
                if depth > caps.max_volume_texture_size {
                    return Err(too_large("depth", depth));
                }
            }
            TextureKind::Array { layers } => {
                if self.width > caps.max_texture_size {
                    return Err(too_large("width", self.width));
                }
                if self.height > caps.max_texture_size {
                    return Err(too_large("height", self.height));
                }
                if layers > caps.max_texture_layers {
                    return Err(too_large("array layer count", layers));
                }
            }
            TextureKind::Cube => {
                if self.width > caps.max_cube_texture_size {
                    return Err(too_large("width", self.width));
                }
            }
        }

        Ok(())
    }
}

/// Texture sampling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterMode {
    /// No filtering (only meaningful for mipmaps)
    None,
    /// Bilinear
    #[default]
    Linear,
    /// Point sampling
    Nearest,
}

/// Minification, magnification and mipmap filters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Minification filter
    pub min: FilterMode,
    /// Magnification filter
    pub mag: FilterMode,
    /// Mipmap filter
    pub mipmap: FilterMode,
    /// Anisotropy level
    pub anisotropy: f32,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            min: FilterMode::Linear,
            mag: FilterMode::Linear,
            mipmap: FilterMode::None,
            anisotropy: 1.0,
        }
    }
}

impl Filter {
    /// Whether the filter is usable; mipmap filtering requires mipmaps
    pub fn is_valid(&self, mipmaps_allowed: bool) -> bool {
        if !mipmaps_allowed && self.mipmap != FilterMode::None {
            return false;
        }
        self.min != FilterMode::None && self.mag != FilterMode::None
    }
}

/// Texture coordinate wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WrapMode {
    /// Clamp to edge
    #[default]
    Clamp,
    /// Clamp to transparent black
    ClampZero,
    /// Repeat
    Repeat,
    /// Mirrored repeat
    MirroredRepeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_must_be_square() {
        assert!(matches!(
            TextureShape::new(TextureKind::Cube, 64, 32),
            Err(GraphicsError::CubeNotSquare)
        ));
        assert!(TextureShape::new(TextureKind::Cube, 64, 64).is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(TextureShape::flat(0, 8).is_err());
        assert!(TextureShape::new(TextureKind::Array { layers: 0 }, 8, 8).is_err());
    }

    #[test]
    fn test_limits_per_kind() {
        let caps = Capabilities {
            max_texture_size: 256,
            max_texture_layers: 4,
            ..Capabilities::default()
        };

        let wide = TextureShape::flat(512, 16).unwrap();
        assert!(matches!(
            wide.check_limits(&caps),
            Err(GraphicsError::TextureTooLarge { dimension: "width", pixels: 512 })
        ));

        let deep = TextureShape::new(TextureKind::Array { layers: 8 }, 16, 16).unwrap();
        assert!(matches!(
            deep.check_limits(&caps),
            Err(GraphicsError::TextureTooLarge { dimension: "array layer count", .. })
        ));

        assert_eq!(deep.texel_count(), 16 * 16 * 8);
    }
}
