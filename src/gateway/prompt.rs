use chrono::Duration;

use crate::models::{QuotaKind, Tier};
use crate::providers::Mode;

/// 系统提示表，按 (等级, 模式) 取值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBook {
    pub chat: String,
    pub code: String,
    /// 付费等级追加的说明
    pub premium: String,
}

impl Default for PromptBook {
    fn default() -> Self {
        Self {
            chat: "You are Flux AI, a helpful assistant. Answer concisely in the language the user writes in.".to_string(),
            code: "You are Flux AI in code mode. Reply with complete, working code and a short explanation.".to_string(),
            premium: "The user has a paid plan: give thorough, well-structured answers.".to_string(),
        }
    }
}

impl PromptBook {
    pub fn system_for(&self, tier: Tier, mode: Mode) -> String {
        let base = match mode {
            Mode::Chat => &self.chat,
            Mode::Code => &self.code,
        };
        if tier.is_paid() && !self.premium.is_empty() {
            format!("{}\n{}", base, self.premium)
        } else {
            base.clone()
        }
    }
}

/// 以回复正文返回给前端的提示文字
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notices {
    pub fallback_reply: String,
    pub configuration_missing: String,
    pub maintenance: String,
    pub invalid_attachment: String,
    pub empty_message: String,
}

impl Notices {
    pub fn with_fallback(fallback_reply: &str) -> Self {
        Self {
            fallback_reply: fallback_reply.to_string(),
            configuration_missing: "The AI service is not configured yet. Please contact the administrator.".to_string(),
            maintenance: "Flux AI is under maintenance. Please come back a little later.".to_string(),
            invalid_attachment: "Only images (PNG, JPEG, WebP, GIF) can be attached.".to_string(),
            empty_message: "Please type a message or attach an image.".to_string(),
        }
    }

    pub fn quota_exceeded(&self, kind: QuotaKind, tier: Tier, window: Duration) -> String {
        let what = match kind {
            QuotaKind::Message => "message",
            QuotaKind::Image => "image",
        };
        let upgrade = if tier == Tier::Free {
            " Upgrade to PRO for higher limits."
        } else {
            ""
        };
        format!(
            "You have reached the {} {} limit. The limit resets every {}.{}",
            tier,
            what,
            describe_window(window),
            upgrade
        )
    }
}

fn describe_window(window: Duration) -> String {
    let minutes = window.num_minutes();
    if minutes >= 60 && minutes % 60 == 0 {
        match minutes / 60 {
            1 => "hour".to_string(),
            h => format!("{} hours", h),
        }
    } else if minutes >= 1 {
        format!("{} minutes", minutes)
    } else {
        format!("{} seconds", window.num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_tiers_get_premium_suffix() {
        let book = PromptBook::default();
        assert_eq!(book.system_for(Tier::Free, Mode::Chat), book.chat);
        assert!(book.system_for(Tier::Pro, Mode::Code).starts_with(&book.code));
        assert!(book.system_for(Tier::Ultra, Mode::Chat).ends_with(&book.premium));
    }

    #[test]
    fn quota_notice_names_kind_and_window() {
        let notices = Notices::with_fallback("busy");
        let text = notices.quota_exceeded(QuotaKind::Image, Tier::Free, Duration::hours(1));
        assert!(text.contains("FREE image limit"));
        assert!(text.contains("every hour"));
        assert!(text.contains("Upgrade"));

        let text = notices.quota_exceeded(QuotaKind::Message, Tier::Pro, Duration::minutes(90));
        assert!(text.contains("every 90 minutes"));
        assert!(!text.contains("Upgrade"));
    }
}
