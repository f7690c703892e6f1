use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::features::render::job::RenderParams;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl From<image::ImageError> for TransformError {
    fn from(err: image::ImageError) -> Self {
        TransformError(err.to_string())
    }
}

/// 图片变换器（CPU 密集，调用方负责放到阻塞线程池）
pub trait ImageTransformer: Send + Sync {
    /// 将 Logo 叠加到图片右下角，返回 PNG 字节
    fn overlay(
        &self,
        image: &[u8],
        logo: &RgbaImage,
        params: &RenderParams,
    ) -> Result<Vec<u8>, TransformError>;

    /// 缩放到精确宽高，返回 PNG 字节
    fn resize(&self, image: &[u8], width: u32, height: u32) -> Result<Vec<u8>, TransformError>;
}

/// 基于 `image` crate 的默认实现
#[derive(Debug, Clone)]
pub struct RasterTransformer {
    /// Logo 最终宽度占输出宽度的比例
    logo_scale: f32,
}

impl RasterTransformer {
    pub fn new(logo_scale: f32) -> Self {
        Self {
            logo_scale: logo_scale.clamp(0.01, 1.0),
        }
    }
}

impl Default for RasterTransformer {
    fn default() -> Self {
        Self::new(0.15)
    }
}

impl ImageTransformer for RasterTransformer {
    fn overlay(
        &self,
        image: &[u8],
        logo: &RgbaImage,
        params: &RenderParams,
    ) -> Result<Vec<u8>, TransformError> {
        if logo.width() == 0 || logo.height() == 0 {
            return Err(TransformError("Logo 尺寸为 0".to_string()));
        }
        let mut base = image::load_from_memory(image)?.to_rgba8();
        let (base_w, base_h) = base.dimensions();

        // 叠加后还会缩放到请求尺寸，这里按请求宽高比预先补偿 Logo 形变
        let sy = base_h as f32 / params.height.max(1) as f32;
        let logo_w = (base_w as f32 * self.logo_scale).round().max(1.0);
        let final_w = params.width as f32 * self.logo_scale;
        let logo_h = (final_w * logo.height() as f32 / logo.width() as f32 * sy)
            .round()
            .max(1.0);
        let logo_w = (logo_w as u32).min(base_w);
        let logo_h = (logo_h as u32).min(base_h);

        let resized = imageops::resize(logo, logo_w, logo_h, FilterType::Triangle);
        let margin = i64::from(base_w.min(base_h) / 50);
        let x = (i64::from(base_w) - i64::from(logo_w) - margin).max(0);
        let y = (i64::from(base_h) - i64::from(logo_h) - margin).max(0);
        imageops::overlay(&mut base, &resized, x, y);

        encode_png(&DynamicImage::ImageRgba8(base))
    }

    fn resize(&self, image: &[u8], width: u32, height: u32) -> Result<Vec<u8>, TransformError> {
        let img = image::load_from_memory(image)?;
        let out = if img.width() == width && img.height() == height {
            img
        } else {
            img.resize_exact(width, height, FilterType::Lanczos3)
        };
        encode_png(&out)
    }
}

pub(crate) fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, TransformError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
