use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    pub exp: i64,    // 过期时间
    pub iat: i64,    // 签发时间
}

/// 为 uid 签发身份令牌，返回 (token, 过期时间戳)
pub fn generate_token(
    user_id: &str,
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = (now + Duration::seconds(config.jwt_expiration().as_secs() as i64)).timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    tracing::debug!("Issued identity token for user: {}", user_id);
    Ok((token, expiration))
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// 比较管理员凭证。先做摘要，比较耗时与输入长度无关
pub fn admin_token_matches(presented: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// 前端上传的 data URI 图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// 完整 data URI，OpenAI 格式直接透传
    pub uri: String,
    pub mime: String,
    /// base64 数据部分，Gemini inline_data 使用
    pub data: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("attachment is not a data URI")]
    NotDataUri,

    #[error("attachment is not base64 encoded")]
    NotBase64,

    #[error("unsupported attachment type {0}")]
    NotImage(String),

    #[error("attachment is empty")]
    Empty,
}

impl ImageAttachment {
    /// 解析 `data:image/png;base64,....`
    pub fn parse(uri: &str) -> Result<Self, AttachmentError> {
        let uri = uri.trim();
        let rest = uri.strip_prefix("data:").ok_or(AttachmentError::NotDataUri)?;
        let (meta, data) = rest.split_once(',').ok_or(AttachmentError::NotDataUri)?;
        let mime = meta
            .strip_suffix(";base64")
            .ok_or(AttachmentError::NotBase64)?
            .to_ascii_lowercase();
        if !mime.starts_with("image/") {
            return Err(AttachmentError::NotImage(mime));
        }
        if data.is_empty() {
            return Err(AttachmentError::Empty);
        }
        Ok(Self {
            uri: uri.to_string(),
            mime,
            data: data.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base64_image_uri() {
        let image = ImageAttachment::parse("data:image/JPEG;base64,/9j/4AAQ").unwrap();
        assert_eq!(image.mime, "image/jpeg");
        assert_eq!(image.data, "/9j/4AAQ");
        assert!(image.uri.starts_with("data:image/JPEG"));
    }

    #[test]
    fn rejects_non_image_payloads() {
        assert_eq!(
            ImageAttachment::parse("https://example.com/cat.png"),
            Err(AttachmentError::NotDataUri)
        );
        assert_eq!(
            ImageAttachment::parse("data:image/png,rawbytes"),
            Err(AttachmentError::NotBase64)
        );
        assert_eq!(
            ImageAttachment::parse("data:application/pdf;base64,JVBER"),
            Err(AttachmentError::NotImage("application/pdf".into()))
        );
        assert_eq!(
            ImageAttachment::parse("data:image/png;base64,"),
            Err(AttachmentError::Empty)
        );
    }

    #[test]
    fn attachment_errors_describe_the_problem() {
        let err: Box<dyn std::error::Error> =
            Box::new(ImageAttachment::parse("data:text/plain;base64,aGk=").unwrap_err());
        assert_eq!(err.to_string(), "unsupported attachment type text/plain");
        assert_eq!(AttachmentError::Empty.to_string(), "attachment is empty");
    }

    #[test]
    fn admin_token_comparison() {
        assert!(admin_token_matches("s3cret", "s3cret"));
        assert!(!admin_token_matches("s3cret!", "s3cret"));
        assert!(!admin_token_matches("", ""));
    }

    #[test]
    fn token_round_trip_keeps_subject() {
        let config = Config::for_tests();
        let (token, exp) = generate_token("u1", &config).unwrap();
        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.exp, exp);

        let mut other = Config::for_tests();
        other.jwt_secret = "another-secret".to_string();
        assert!(verify_token(&token, &other).is_err());
    }
}
