use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// worker 实现的请求/响应契约形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// 批量/步数式渲染器：POST JSON，返回 base64 图片与安全评分
    #[serde(alias = "batchStep", alias = "comfyui")]
    BatchStep,
    /// 简单参数式渲染器：GET query，直接返回二进制图片
    #[serde(alias = "simpleParametric", alias = "meoow")]
    SimpleParametric,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::BatchStep => "batch_step",
            ModelFamily::SimpleParametric => "simple_parametric",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模型描述（静态注册，请求期只读）
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ModelDescriptor {
    pub name: String,
    pub family: ModelFamily,
    #[serde(default = "ModelDescriptor::default_enabled")]
    pub enabled: bool,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, family: ModelFamily) -> Self {
        Self {
            name: name.into(),
            family,
            enabled: true,
        }
    }

    fn default_enabled() -> bool {
        true
    }
}

/// 模型注册表：按名称查找模型所属的 family
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    by_name: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let by_name = models
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.by_name.get(name)
    }

    /// 解析可用模型；未注册或已停用均视为请求错误
    pub fn resolve(&self, name: &str) -> Result<&ModelDescriptor, DispatchError> {
        let model = self
            .get(name)
            .ok_or_else(|| DispatchError::UnknownModel(name.to_string()))?;
        if !model.enabled {
            return Err(DispatchError::ModelDisabled(name.to_string()));
        }
        Ok(model)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_accepts_camel_case_aliases() {
        let f: ModelFamily = serde_json::from_str("\"batchStep\"").expect("parse");
        assert_eq!(f, ModelFamily::BatchStep);
        let f: ModelFamily = serde_json::from_str("\"simple_parametric\"").expect("parse");
        assert_eq!(f, ModelFamily::SimpleParametric);
    }

    #[test]
    fn resolve_rejects_unknown_and_disabled_models() {
        let mut disabled = ModelDescriptor::new("old", ModelFamily::BatchStep);
        disabled.enabled = false;
        let reg = ModelRegistry::new([
            ModelDescriptor::new("flux", ModelFamily::BatchStep),
            disabled,
        ]);

        assert_eq!(reg.resolve("flux").expect("flux").family, ModelFamily::BatchStep);
        assert!(matches!(reg.resolve("nope"), Err(DispatchError::UnknownModel(_))));
        assert!(matches!(reg.resolve("old"), Err(DispatchError::ModelDisabled(_))));
    }
}
