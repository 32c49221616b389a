// 网关：准入 → 选择提示与候选 → 上游回退
// 所有业务失败都转成回复文本，不作为 HTTP 错误返回

pub(crate) mod fallback;
mod prompt;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};

pub use fallback::{Success, run_fallback};
pub use prompt::{Notices, PromptBook};

use crate::cache::{Admission, MemoryQuotaStore, QuotaRequest, QuotaStore, UserStore};
use crate::config::Config;
use crate::error::GatewayError;
use crate::models::{ChatExchange, QuotaKind, QuotaTable, Tier};
use crate::providers::{ChatBackend, ChatPrompt, ModelCatalog, Mode};
use crate::utils::ImageAttachment;

// 纯图片请求时发给模型的文字
const IMAGE_ONLY_TEXT: &str = "Describe this image.";

/// 请求方身份。`verified` 表示 uid 来自服务端签发的令牌
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub verified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub text: String,
    /// data URI
    pub image: Option<String>,
    pub declared_tier: Option<Tier>,
    pub mode: Option<Mode>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    Answered { model: String },
    QuotaExceeded(QuotaKind),
    Exhausted { attempts: usize },
    ConfigurationMissing,
    Maintenance,
    InvalidInput,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub reply: String,
    pub conversation_id: Option<String>,
    pub tier: Tier,
    pub outcome: ChatOutcome,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub window: Duration,
    pub quotas: QuotaTable,
    pub admin_uids: Vec<String>,
    pub refund_on_failure: bool,
    pub prompts: PromptBook,
    pub notices: Notices,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: Duration::seconds(config.rate_limit_window_secs as i64),
            quotas: config.quotas.clone(),
            admin_uids: config.admin_uids.clone(),
            refund_on_failure: config.refund_on_failure,
            prompts: config.prompts.clone(),
            notices: Notices::with_fallback(&config.fallback_reply),
        }
    }
}

/// 一次已完成的扣减，退还时用来定位
#[derive(Debug, Clone, Copy)]
struct Debit {
    used_local: bool,
    window_reset_at: DateTime<Utc>,
}

pub struct Gateway {
    settings: GatewaySettings,
    catalog: Arc<ModelCatalog>,
    backend: Arc<dyn ChatBackend>,
    quota: Arc<dyn QuotaStore>,
    // 主限流存储不可用时退回进程内计数
    local_quota: MemoryQuotaStore,
    users: Arc<dyn UserStore>,
    maintenance: AtomicBool,
}

impl Gateway {
    pub fn new(
        settings: GatewaySettings,
        catalog: Arc<ModelCatalog>,
        backend: Arc<dyn ChatBackend>,
        quota: Arc<dyn QuotaStore>,
        users: Arc<dyn UserStore>,
        maintenance: bool,
    ) -> Self {
        Self {
            settings,
            catalog,
            backend,
            quota,
            local_quota: MemoryQuotaStore::new(),
            users,
            maintenance: AtomicBool::new(maintenance),
        }
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Relaxed)
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::Relaxed);
        tracing::warn!("Maintenance mode {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    pub fn local_quota(&self) -> &MemoryQuotaStore {
        &self.local_quota
    }

    /// uid 是否在 `ADMIN_UIDS` 中；不代表调用方已验证
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.settings.admin_uids.iter().any(|id| id == user_id)
    }

    /// 有效等级：已验证的管理员恒为 ADMIN；其余取存储中的等级，
    /// 客户端声明的等级只能降低、不能提升
    pub async fn resolve_tier(&self, caller: &Caller, declared: Option<Tier>) -> Tier {
        if caller.verified && self.is_admin(&caller.user_id) {
            return Tier::Admin;
        }

        let stored = if caller.verified {
            match self.users.get_user_tier(&caller.user_id).await {
                Ok(tier) => tier,
                Err(e) => {
                    let e = GatewayError::from(e);
                    tracing::warn!("Tier lookup for {} degraded to FREE: {}", caller.user_id, e);
                    Tier::Free
                }
            }
        } else {
            Tier::Free
        };

        match declared {
            Some(tier) if tier < stored => tier,
            _ => stored,
        }
    }

    /// 检查并扣减配额，返回这次扣减落在哪个存储、哪个窗口
    async fn admit(
        &self,
        user_id: &str,
        tier: Tier,
        with_image: bool,
        now: DateTime<Utc>,
    ) -> Result<Debit, GatewayError> {
        let request = QuotaRequest {
            with_image,
            limits: self.settings.quotas.limits_for(tier),
            window: self.settings.window,
        };

        let (admission, used_local) = match self.quota.try_consume(user_id, request, now).await {
            Ok(admission) => (admission, false),
            Err(e) => {
                tracing::warn!("Quota store unavailable, using local counters: {}", e);
                let admission = self.local_quota.try_consume(user_id, request, now).await?;
                (admission, true)
            }
        };

        match admission {
            Admission::Admitted(bucket) => {
                tracing::debug!(
                    "Admitted {} ({}): {} messages, {} images in window",
                    user_id,
                    tier,
                    bucket.message_count,
                    bucket.image_count
                );
                Ok(Debit {
                    used_local,
                    window_reset_at: bucket.window_reset_at,
                })
            }
            Admission::Rejected { kind, .. } => Err(GatewayError::QuotaExceeded { kind }),
        }
    }

    async fn refund(&self, user_id: &str, with_image: bool, debit: Debit) {
        let result = if debit.used_local {
            self.local_quota
                .refund(user_id, with_image, debit.window_reset_at)
                .await
        } else {
            self.quota
                .refund(user_id, with_image, debit.window_reset_at)
                .await
        };
        if let Err(e) = result {
            tracing::warn!("Failed to refund quota for {}: {}", user_id, e);
        }
    }

    pub async fn handle_chat(&self, caller: &Caller, request: ChatRequest) -> ChatReply {
        self.handle_chat_at(caller, request, Utc::now()).await
    }

    pub async fn handle_chat_at(
        &self,
        caller: &Caller,
        request: ChatRequest,
        now: DateTime<Utc>,
    ) -> ChatReply {
        let notices = &self.settings.notices;
        let reply = |text: &str, tier: Tier, outcome: ChatOutcome| ChatReply {
            reply: text.to_string(),
            conversation_id: None,
            tier,
            outcome,
        };

        if self.is_maintenance() {
            return reply(&notices.maintenance, Tier::Free, ChatOutcome::Maintenance);
        }

        let image = match request.image.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => match ImageAttachment::parse(raw) {
                Ok(image) => Some(image),
                Err(e) => {
                    tracing::info!("Rejected attachment from {}: {}", caller.user_id, e);
                    return reply(&notices.invalid_attachment, Tier::Free, ChatOutcome::InvalidInput);
                }
            },
            None => None,
        };
        let text = request.text.trim();
        if text.is_empty() && image.is_none() {
            return reply(&notices.empty_message, Tier::Free, ChatOutcome::InvalidInput);
        }
        let with_image = image.is_some();

        let tier = self.resolve_tier(caller, request.declared_tier).await;
        let mode = request.mode.unwrap_or(Mode::Chat);
        let candidates = self.catalog.attempt_order(tier, mode, with_image);

        if !candidates.iter().any(|c| self.backend.is_configured(c.provider)) {
            tracing::error!(
                "{} for tier {} mode {:?}",
                GatewayError::ConfigurationMissing,
                tier,
                mode
            );
            return reply(&notices.configuration_missing, tier, ChatOutcome::ConfigurationMissing);
        }

        let debit = match self.admit(&caller.user_id, tier, with_image, now).await {
            Ok(debit) => Some(debit),
            Err(GatewayError::QuotaExceeded { kind }) => {
                tracing::info!("Quota exceeded for {} ({}): {:?}", caller.user_id, tier, kind);
                let text = notices.quota_exceeded(kind, tier, self.settings.window);
                return reply(&text, tier, ChatOutcome::QuotaExceeded(kind));
            }
            Err(e) => {
                // 本地兜底也失败时放行，不让存储问题挡住用户
                tracing::error!("Admission failed open for {}: {}", caller.user_id, e);
                None
            }
        };

        let prompt = ChatPrompt {
            system: self.settings.prompts.system_for(tier, mode),
            text: if text.is_empty() {
                IMAGE_ONLY_TEXT.to_string()
            } else {
                text.to_string()
            },
            image,
        };

        match run_fallback(self.backend.as_ref(), &candidates, &prompt).await {
            Ok(success) => {
                let conversation_id = request
                    .conversation_id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

                if caller.verified {
                    let exchange = ChatExchange {
                        user: prompt.text.clone(),
                        assistant: success.reply.clone(),
                        model: Some(success.candidate.model.clone()),
                        at: now,
                    };
                    if let Err(e) = self
                        .users
                        .append_exchange(&caller.user_id, &conversation_id, exchange)
                        .await
                    {
                        tracing::warn!("History not saved for {}: {}", caller.user_id, e);
                    }
                }

                ChatReply {
                    reply: success.reply,
                    conversation_id: Some(conversation_id),
                    tier,
                    outcome: ChatOutcome::Answered {
                        model: success.candidate.name.clone(),
                    },
                }
            }
            Err(GatewayError::UpstreamUnavailable { attempts }) => {
                if let Some(debit) = debit.filter(|_| self.settings.refund_on_failure) {
                    self.refund(&caller.user_id, with_image, debit).await;
                }
                reply(&notices.fallback_reply, tier, ChatOutcome::Exhausted { attempts })
            }
            Err(e) => {
                tracing::error!("Unexpected gateway error: {}", e);
                reply(&notices.fallback_reply, tier, ChatOutcome::Exhausted { attempts: 0 })
            }
        }
    }
}
