//! Writes completed frame buffers to image files.

use std::fs;
use std::path::PathBuf;

use image::{GrayImage, RgbImage};

use crate::allocator::FrameBuffer;
use crate::configuration::StreamConfiguration;
use crate::error::{CameraError, Result};
use crate::traits::FourCC;

/// Saves frames into a directory, one file per frame.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    dir: PathBuf,
}

impl FrameWriter {
    /// Create a writer, creating `dir` if it does not exist.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Save the frame held by `buffer`, named after `secs`.
    ///
    /// Uncompressed frames are written as PNG, MJPEG frames are written as
    /// received.
    pub fn write(
        &self,
        buffer: &FrameBuffer,
        config: &StreamConfiguration,
        secs: f64,
    ) -> Result<PathBuf> {
        let mapped = buffer.map();
        let data = mapped.plane(0).unwrap_or_default();
        let width = config.size.width;
        let height = config.size.height;
        let format = config.pixel_format;

        if format.is_compressed() {
            let path = self.path_for(secs, "jpg");
            fs::write(&path, data)?;
            return Ok(path);
        }

        let path = self.path_for(secs, "png");
        match format {
            FourCC::GREY | FourCC::NV12 => {
                let luma = pack_rows(data, config.stride, width, height)?;
                gray_image(width, height, luma)?.save(&path)?;
            }
            FourCC::YUYV => {
                let packed = pack_rows(data, config.stride, width * 2, height)?;
                let luma = packed.iter().step_by(2).copied().collect();
                gray_image(width, height, luma)?.save(&path)?;
            }
            FourCC::RGB3 => {
                let rgb = pack_rows(data, config.stride, width * 3, height)?;
                RgbImage::from_raw(width, height, rgb)
                    .ok_or(CameraError::UnsupportedImageFormat(format))?
                    .save(&path)?;
            }
            other => return Err(CameraError::UnsupportedImageFormat(other)),
        }
        log::debug!("wrote {}", path.display());
        Ok(path)
    }

    fn path_for(&self, secs: f64, extension: &str) -> PathBuf {
        self.dir.join(format!("img{secs:.6}.{extension}"))
    }
}

fn gray_image(width: u32, height: u32, luma: Vec<u8>) -> Result<GrayImage> {
    GrayImage::from_raw(width, height, luma)
        .ok_or(CameraError::UnsupportedImageFormat(FourCC::GREY))
}

/// Copy `height` rows of `row_bytes` out of `data` laid out with `stride`.
fn pack_rows(data: &[u8], stride: u32, row_bytes: u32, height: u32) -> Result<Vec<u8>> {
    let stride = stride.max(row_bytes) as usize;
    let row_bytes = row_bytes as usize;
    let height = height as usize;
    let required = match height {
        0 => 0,
        rows => stride * (rows - 1) + row_bytes,
    };
    if data.len() < required {
        return Err(CameraError::BufferTooSmall {
            required,
            actual: data.len(),
        });
    }

    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in data.chunks(stride).take(height) {
        packed.extend_from_slice(row.get(..row_bytes).unwrap_or(row));
    }
    Ok(packed)
}
