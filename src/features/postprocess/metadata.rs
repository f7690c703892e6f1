use std::io::Cursor;

use serde::Serialize;

use crate::features::render::job::RenderParams;
use crate::features::safety::SafetyVerdict;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("PNG 解码失败: {0}")]
    Decode(#[from] png::DecodingError),
    #[error("PNG 编码失败: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("元数据序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 写入成品图片的描述性元数据
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub prompt: String,
    pub original_prompt: String,
    pub params: RenderParams,
    pub safety: SafetyVerdict,
    /// 后端响应中的其余字段
    pub backend: serde_json::Map<String, serde_json::Value>,
}

pub trait MetadataWriter: Send + Sync {
    fn write(&self, image: &[u8], meta: &ArtifactMetadata) -> Result<Vec<u8>, MetadataError>;
}

/// 以 iTXt 文本块写入 PNG 元数据
#[derive(Debug, Clone, Default)]
pub struct PngTextWriter;

pub const SOFTWARE: &str = concat!("imagegen-gateway/", env!("CARGO_PKG_VERSION"));

impl MetadataWriter for PngTextWriter {
    fn write(&self, image: &[u8], meta: &ArtifactMetadata) -> Result<Vec<u8>, MetadataError> {
        let mut decoder = png::Decoder::new(Cursor::new(image));
        decoder.set_transformations(png::Transformations::EXPAND);
        let mut reader = decoder.read_info()?;
        let mut pixels = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut pixels)?;
        let (color, depth) = reader.output_color_type();

        let params = serde_json::to_string(&meta.params)?;
        let safety = serde_json::to_string(&meta.safety)?;
        let backend = serde_json::to_string(&meta.backend)?;

        let mut out = Vec::with_capacity(image.len() + 1024);
        {
            let mut encoder = png::Encoder::new(&mut out, frame.width, frame.height);
            encoder.set_color(color);
            encoder.set_depth(depth);
            encoder.add_itxt_chunk("prompt".to_string(), meta.prompt.clone())?;
            encoder.add_itxt_chunk("originalPrompt".to_string(), meta.original_prompt.clone())?;
            encoder.add_itxt_chunk("params".to_string(), params)?;
            encoder.add_itxt_chunk("safety".to_string(), safety)?;
            encoder.add_itxt_chunk("backend".to_string(), backend)?;
            encoder.add_itxt_chunk("Software".to_string(), SOFTWARE.to_string())?;

            let mut writer = encoder.write_header()?;
            writer.write_image_data(&pixels[..frame.buffer_size()])?;
            writer.finish()?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::postprocess::transform::tests::solid_png;

    fn meta() -> ArtifactMetadata {
        ArtifactMetadata {
            prompt: "a red cube".into(),
            original_prompt: "  a red   cube".into(),
            params: RenderParams {
                width: 32,
                height: 16,
                seed: 42,
                negative_prompt: None,
                model: "flux".into(),
                logo: false,
            },
            safety: SafetyVerdict::default(),
            backend: serde_json::Map::new(),
        }
    }

    fn read_text(png_bytes: &[u8]) -> Vec<(String, String)> {
        let decoder = png::Decoder::new(Cursor::new(png_bytes));
        let reader = decoder.read_info().expect("read_info");
        reader
            .info()
            .utf8_text
            .iter()
            .map(|c| (c.keyword.clone(), c.get_text().expect("text")))
            .collect()
    }

    #[test]
    fn writes_prompt_and_params_as_itxt() {
        let out = PngTextWriter
            .write(&solid_png(32, 16, [10, 20, 30, 255]), &meta())
            .expect("write");
        let texts = read_text(&out);
        assert!(texts.contains(&("prompt".to_string(), "a red cube".to_string())));
        assert!(texts.contains(&("originalPrompt".to_string(), "  a red   cube".to_string())));
        assert!(texts.iter().any(|(k, v)| k == "params" && v.contains("\"seed\":42")));

        let img = image::load_from_memory(&out).expect("decode").to_rgba8();
        assert_eq!(img.dimensions(), (32, 16));
        assert_eq!(img.get_pixel(5, 5).0, [10, 20, 30, 255]);
    }

    #[test]
    fn non_png_input_is_an_error() {
        assert!(PngTextWriter.write(b"\xff\xd8\xff garbage", &meta()).is_err());
    }
}
