use crate::error::GatewayError;
use crate::providers::{Candidate, ChatBackend, ChatPrompt};

/// 回退循环的成功结果
#[derive(Debug)]
pub struct Success<'a> {
    pub reply: String,
    pub candidate: &'a Candidate,
    /// 从 0 开始的候选序号
    pub position: usize,
}

/// 按顺序逐个尝试候选，第一个成功即返回；不重试、不并发
pub async fn run_fallback<'a>(
    backend: &dyn ChatBackend,
    candidates: &[&'a Candidate],
    prompt: &ChatPrompt,
) -> Result<Success<'a>, GatewayError> {
    let mut attempts = 0;

    for (position, candidate) in candidates.iter().copied().enumerate() {
        if !backend.is_configured(candidate.provider) {
            tracing::debug!(
                "Skipping {} ({}): provider has no API key",
                candidate.model,
                candidate.provider
            );
            continue;
        }

        attempts += 1;
        match backend.complete(candidate, prompt).await {
            Ok(reply) => {
                if position > 0 {
                    tracing::info!(
                        "Fallback succeeded on candidate #{} {} ({})",
                        position + 1,
                        candidate.model,
                        candidate.provider
                    );
                } else {
                    tracing::debug!("Upstream {} answered", candidate.model);
                }
                return Ok(Success {
                    reply,
                    candidate,
                    position,
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Candidate {} ({}) failed: {}, trying next",
                    candidate.model,
                    candidate.provider,
                    e
                );
            }
        }
    }

    tracing::error!(
        "All {} upstream candidates failed ({} attempted)",
        candidates.len(),
        attempts
    );
    Err(GatewayError::UpstreamUnavailable { attempts })
}
