use axum::extract::{Extension, Json, State};

use crate::{
    AppState,
    error::AppError,
    gateway::{Caller, ChatOutcome, ChatRequest},
    middleware::Identity,
    providers::Mode,
};

use super::model::{ChatBody, ChatResponse};

#[axum::debug_handler]
pub async fn chat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, AppError> {
    let uid = body.uid.trim();
    let caller = match (identity.subject(), uid) {
        (Some(subject), "") => Caller {
            user_id: subject.to_string(),
            verified: true,
        },
        (None, "") => return Err(AppError::BadRequest("uid is required".to_string())),
        (_, uid) => Caller {
            user_id: uid.to_string(),
            verified: identity.is(uid),
        },
    };

    // 无法识别的等级视为未声明
    let declared_tier = body.tier.as_deref().and_then(|t| t.parse().ok());

    let request = ChatRequest {
        text: body.message.unwrap_or_default(),
        image: body.file,
        declared_tier,
        mode: Some(Mode::from_flag(body.mode.as_deref())),
        conversation_id: body.chat_id,
    };

    let reply = state.gateway.handle_chat(&caller, request).await;
    let model = match reply.outcome {
        ChatOutcome::Answered { model } => Some(model),
        _ => None,
    };

    Ok(Json(ChatResponse {
        reply: reply.reply,
        chat_id: reply.conversation_id,
        model,
        tier: reply.tier,
    }))
}
