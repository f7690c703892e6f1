use image::{Rgba, RgbaImage};
use serde::Serialize;

use super::transform::TransformError;
use crate::config::PostProcessConfig;
use crate::features::render::job::RenderParams;
use crate::features::safety::SafetyVerdict;

/// Logo 叠加变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoVariant {
    None,
    Standard,
    Restricted,
}

/// 选择 Logo 变体：命中安全判定时强制受限 Logo（忽略 `logo` 参数），否则按请求决定是否叠加普通 Logo
pub fn select_logo(verdict: &SafetyVerdict, params: &RenderParams) -> LogoVariant {
    if verdict.is_restricted() {
        LogoVariant::Restricted
    } else if params.logo {
        LogoVariant::Standard
    } else {
        LogoVariant::None
    }
}

/// 已解码的 Logo 素材
#[derive(Debug, Clone)]
pub struct LogoAssets {
    standard: RgbaImage,
    restricted: RgbaImage,
}

impl LogoAssets {
    pub fn new(standard: RgbaImage, restricted: RgbaImage) -> Self {
        Self {
            standard,
            restricted,
        }
    }

    /// 内置徽标：普通为半透明白底，受限为红底
    pub fn builtin() -> Self {
        Self::new(
            badge([255, 255, 255, 170], [40, 40, 40, 220]),
            badge([200, 30, 30, 230], [255, 255, 255, 255]),
        )
    }

    /// 按配置加载；未配置的变体使用内置徽标
    pub fn from_config(cfg: &PostProcessConfig) -> Result<Self, TransformError> {
        let builtin = Self::builtin();
        let standard = match cfg.standard_logo_path.as_deref() {
            Some(path) => load(path)?,
            None => builtin.standard,
        };
        let restricted = match cfg.restricted_logo_path.as_deref() {
            Some(path) => load(path)?,
            None => builtin.restricted,
        };
        Ok(Self::new(standard, restricted))
    }

    pub fn asset(&self, variant: LogoVariant) -> Option<&RgbaImage> {
        match variant {
            LogoVariant::None => None,
            LogoVariant::Standard => Some(&self.standard),
            LogoVariant::Restricted => Some(&self.restricted),
        }
    }
}

fn load(path: &str) -> Result<RgbaImage, TransformError> {
    let img = image::open(path)
        .map_err(|e| TransformError(format!("加载 Logo 失败 {path}: {e}")))?;
    tracing::info!("已加载 Logo: {} ({}x{})", path, img.width(), img.height());
    Ok(img.to_rgba8())
}

/// 生成 200x60 的带边框徽标
fn badge(fill: [u8; 4], border: [u8; 4]) -> RgbaImage {
    const W: u32 = 200;
    const H: u32 = 60;
    const BORDER: u32 = 4;
    RgbaImage::from_fn(W, H, |x, y| {
        let on_border = x < BORDER || y < BORDER || x >= W - BORDER || y >= H - BORDER;
        if on_border {
            Rgba(border)
        } else {
            Rgba(fill)
        }
    })
}
