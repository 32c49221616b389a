use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::Tier;

/// 上游服务商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenRouter,
    Gemini,
    Zenmux,
    HuggingFace,
    OpenAi,
}

/// 请求体格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// OpenAI 兼容的 chat/completions
    ChatCompletions,
    /// Gemini generateContent
    GenerateContent,
}

/// 鉴权头形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthShape {
    Bearer,
    GoogApiKey,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::OpenRouter,
        Provider::Gemini,
        Provider::Zenmux,
        Provider::HuggingFace,
        Provider::OpenAi,
    ];

    pub fn wire_format(&self) -> WireFormat {
        match self {
            Provider::Gemini => WireFormat::GenerateContent,
            _ => WireFormat::ChatCompletions,
        }
    }

    pub fn auth_shape(&self) -> AuthShape {
        match self {
            Provider::Gemini => AuthShape::GoogApiKey,
            _ => AuthShape::Bearer,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Zenmux => "https://zenmux.ai/api/v1",
            Provider::HuggingFace => "https://router.huggingface.co/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// 环境变量名前缀，如 `OPENROUTER` -> `OPENROUTER_API_KEY`
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "OPENROUTER",
            Provider::Gemini => "GEMINI",
            Provider::Zenmux => "ZENMUX",
            Provider::HuggingFace => "HF",
            Provider::OpenAi => "OPENAI",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenRouter => "openrouter",
            Provider::Gemini => "gemini",
            Provider::Zenmux => "zenmux",
            Provider::HuggingFace => "huggingface",
            Provider::OpenAi => "openai",
        };
        f.write_str(name)
    }
}

/// 请求模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    Code,
}

impl Mode {
    /// 未知或缺省的模式按普通聊天处理
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(|f| f.trim().to_ascii_lowercase()) {
            Some(f) if f == "code" => Mode::Code,
            _ => Mode::Chat,
        }
    }
}

fn default_modes() -> Vec<Mode> {
    vec![Mode::Chat]
}

/// 候选模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub provider: Provider,
    #[serde(rename = "id")]
    pub model: String,
    pub name: String,
    #[serde(default)]
    pub vision: bool,
    /// FREE 等级可用
    #[serde(default)]
    pub site_free: bool,
    #[serde(default = "default_modes")]
    pub modes: Vec<Mode>,
}

impl Candidate {
    pub fn new(
        provider: Provider,
        model: &str,
        name: &str,
        vision: bool,
        site_free: bool,
        modes: &[Mode],
    ) -> Self {
        Self {
            provider,
            model: model.to_string(),
            name: name.to_string(),
            vision,
            site_free,
            modes: modes.to_vec(),
        }
    }

    pub fn supports(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    candidates: Vec<Candidate>,
}

/// 按 (等级, 模式) 预先排好的候选表，启动后不再变化
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    candidates: Vec<Candidate>,
    orders: HashMap<(Tier, Mode), Vec<Candidate>>,
}

impl ModelCatalog {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        let mut orders = HashMap::new();
        for tier in Tier::ALL {
            for mode in [Mode::Chat, Mode::Code] {
                orders.insert((tier, mode), Self::build_order(&candidates, tier, mode));
            }
        }
        Self { candidates, orders }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let catalog_error = |reason: String| ConfigError::Catalog {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| catalog_error(e.to_string()))?;
        let file: CatalogFile =
            serde_json::from_str(&raw).map_err(|e| catalog_error(e.to_string()))?;
        if file.candidates.is_empty() {
            return Err(catalog_error("catalog has no candidates".to_string()));
        }
        Ok(Self::new(file.candidates))
    }

    // FREE 只用站内免费模型；其他等级先付费模型再免费模型
    fn build_order(candidates: &[Candidate], tier: Tier, mode: Mode) -> Vec<Candidate> {
        let usable = candidates.iter().filter(|c| c.supports(mode));
        if tier == Tier::Free {
            return usable.filter(|c| c.site_free).cloned().collect();
        }
        let (free, premium): (Vec<&Candidate>, Vec<&Candidate>) = usable.partition(|c| c.site_free);
        premium.into_iter().chain(free).cloned().collect()
    }

    /// 带图片的聊天请求把视觉模型提前，其余保持原顺序
    pub fn attempt_order(&self, tier: Tier, mode: Mode, with_image: bool) -> Vec<&Candidate> {
        let order = match self.orders.get(&(tier, mode)) {
            Some(order) => order,
            None => return Vec::new(),
        };
        if !with_image {
            return order.iter().collect();
        }
        let (vision, text): (Vec<&Candidate>, Vec<&Candidate>) =
            order.iter().partition(|c| c.vision);
        vision.into_iter().chain(text).collect()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        use Mode::{Chat, Code};
        use Provider::*;

        Self::new(vec![
            Candidate::new(OpenRouter, "meta-llama/llama-3.2-11b-vision-instruct:free", "Llama 3.2 11B Vision", true, true, &[Chat]),
            Candidate::new(OpenRouter, "mistralai/mistral-7b-instruct:free", "Mistral 7B", false, true, &[Chat]),
            Candidate::new(OpenRouter, "google/gemma-2-9b-it:free", "Gemma 2 9B", false, true, &[Chat]),
            Candidate::new(HuggingFace, "Qwen/Qwen2.5-Coder-7B-Instruct", "Qwen 2.5 Coder 7B", false, true, &[Code]),
            Candidate::new(OpenRouter, "qwen/qwen-2.5-coder-32b-instruct:free", "Qwen 2.5 Coder 32B", false, false, &[Code]),
            Candidate::new(Gemini, "gemini-2.0-flash", "Gemini 2.0 Flash", true, false, &[Chat, Code]),
            Candidate::new(OpenRouter, "meta-llama/llama-3.2-90b-vision-instruct:free", "Llama 3.2 90B Vision", true, false, &[Chat]),
            Candidate::new(OpenRouter, "meta-llama/llama-3.3-70b-instruct:free", "Llama 3.3 70B", false, false, &[Chat, Code]),
            Candidate::new(Zenmux, "openai/gpt-4o-mini", "GPT-4o mini (Zenmux)", true, false, &[Chat, Code]),
            Candidate::new(OpenAi, "gpt-4o-mini", "GPT-4o mini", true, false, &[Chat, Code]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&Candidate]) -> Vec<String> {
        list.iter().map(|c| c.model.clone()).collect()
    }

    fn sample() -> ModelCatalog {
        ModelCatalog::new(vec![
            Candidate::new(Provider::OpenRouter, "free-text", "A", false, true, &[Mode::Chat]),
            Candidate::new(Provider::OpenRouter, "free-vision", "B", true, true, &[Mode::Chat]),
            Candidate::new(Provider::Gemini, "paid-text", "C", false, false, &[Mode::Chat, Mode::Code]),
            Candidate::new(Provider::OpenAi, "paid-vision", "D", true, false, &[Mode::Chat]),
        ])
    }

    #[test]
    fn free_tier_only_sees_site_free_models() {
        let catalog = sample();
        assert_eq!(
            ids(&catalog.attempt_order(Tier::Free, Mode::Chat, false)),
            vec!["free-text", "free-vision"]
        );
        assert!(catalog.attempt_order(Tier::Free, Mode::Code, false).is_empty());
    }

    #[test]
    fn paid_tiers_try_premium_first() {
        let catalog = sample();
        assert_eq!(
            ids(&catalog.attempt_order(Tier::Pro, Mode::Chat, false)),
            vec!["paid-text", "paid-vision", "free-text", "free-vision"]
        );
        assert_eq!(
            ids(&catalog.attempt_order(Tier::Admin, Mode::Code, false)),
            vec!["paid-text"]
        );
    }

    #[test]
    fn images_move_vision_models_forward() {
        let catalog = sample();
        assert_eq!(
            ids(&catalog.attempt_order(Tier::Pro, Mode::Chat, true)),
            vec!["paid-vision", "free-vision", "paid-text", "free-text"]
        );
    }

    #[test]
    fn mode_flag_defaults_to_chat() {
        assert_eq!(Mode::from_flag(Some("code")), Mode::Code);
        assert_eq!(Mode::from_flag(Some(" CODE ")), Mode::Code);
        assert_eq!(Mode::from_flag(Some("poetry")), Mode::Chat);
        assert_eq!(Mode::from_flag(None), Mode::Chat);
    }

    #[test]
    fn catalog_file_uses_camel_case_fields() {
        let raw = r#"{"candidates":[{"provider":"openrouter","id":"x/y:free","name":"Y","siteFree":true}]}"#;
        let file: CatalogFile = serde_json::from_str(raw).unwrap();
        let c = &file.candidates[0];
        assert_eq!(c.provider, Provider::OpenRouter);
        assert!(c.site_free);
        assert!(!c.vision);
        assert_eq!(c.modes, vec![Mode::Chat]);
    }

    #[test]
    fn default_catalog_has_free_chat_and_code_paths() {
        let catalog = ModelCatalog::default();
        assert!(!catalog.attempt_order(Tier::Free, Mode::Chat, false).is_empty());
        assert!(!catalog.attempt_order(Tier::Free, Mode::Code, false).is_empty());
    }
}
