//! 从请求中提取凭证
//!
//! 管理员密钥只从 `X-Admin-Key` 头读取；API 密钥优先取 `X-API-Key` 头，
//! 其次是查询参数 `api_key`，最后由处理器从请求体的 `api_key` 字段补充。
//! 提取本身从不失败，是否有效由编排器判断。

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::gateway::PresentedCredentials;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY: &str = "api_key";

/// 请求携带的凭证
#[derive(Debug, Clone, Default)]
pub struct Credentials(pub PresentedCredentials);

#[async_trait]
impl<S> FromRequestParts<S> for Credentials
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Credentials(extract_credentials(&parts.headers, parts.uri.query())))
    }
}

/// 从请求头和查询串提取凭证
pub fn extract_credentials(headers: &HeaderMap, query: Option<&str>) -> PresentedCredentials {
    let api_key = header_value(headers, API_KEY_HEADER).or_else(|| query.and_then(query_api_key));

    PresentedCredentials {
        admin_key: header_value(headers, ADMIN_KEY_HEADER),
        api_key,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn query_api_key(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == API_KEY_QUERY)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_takes_precedence_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("ltk_header"));

        let credentials = extract_credentials(&headers, Some("api_key=ltk_query"));
        assert_eq!(credentials.api_key.as_deref(), Some("ltk_header"));
        assert!(credentials.admin_key.is_none());
    }

    #[test]
    fn test_query_parameter_is_decoded() {
        let credentials =
            extract_credentials(&HeaderMap::new(), Some("include_inactive=true&api_key=ltk_a%2Db"));
        assert_eq!(credentials.api_key.as_deref(), Some("ltk_a-b"));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("  "));

        let credentials = extract_credentials(&headers, Some("api_key="));
        assert_eq!(credentials, PresentedCredentials::default());
    }
}
