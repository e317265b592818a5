use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::error::StepError;

/// Parsed shape of a well-formed XSTS response. Real traffic occasionally
/// arrives truncated mid-body (proxies and flaky mobile-network middleboxes
/// both do this to Xbox Live responses in the wild), so this is only the
/// happy path — [`parse_xsts_response`] below is what callers should use.
#[derive(Debug, Deserialize)]
struct XstsOkBody {
    #[serde(rename = "Token")]
    token: String,
    #[serde(rename = "NotAfter")]
    not_after: DateTime<Utc>,
    #[serde(rename = "DisplayClaims")]
    display_claims: DisplayClaims,
}

#[derive(Debug, Deserialize)]
struct DisplayClaims {
    xui: Vec<XuiClaim>,
}

#[derive(Debug, Deserialize)]
struct XuiClaim {
    #[serde(default)]
    uhs: String,
    #[serde(default, rename = "xid")]
    xid: String,
}

#[derive(Debug, Deserialize)]
struct XstsErrBody {
    #[serde(rename = "XErr")]
    xerr: serde_json::Value,
    #[serde(default, rename = "Message")]
    message: String,
}

/// Result of successfully extracting an XSTS token from a response body,
/// regardless of whether it took the clean path or the regex fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct XstsTokenInfo {
    pub token: String,
    pub not_after: DateTime<Utc>,
    pub user_hash: String,
    pub xuid: String,
    /// True when `user_hash`/`token` were recovered by the regex fallback
    /// rather than parsed as well-formed JSON.
    pub derived: bool,
}

/// Parses an XSTS authorize response, tolerating the truncated and
/// BOM-prefixed bodies Xbox Live is known to return under load. Tries, in
/// order: (1) clean JSON parse, (2) progressively truncating trailing bytes
/// back to the last `}` and retrying, (3) regex extraction of the `Token`,
/// `uhs` and `xid` fields directly out of the raw text. Only once all three
/// fail does it surface a [`StepError::Json`].
pub(crate) fn parse_xsts_response(status: reqwest::StatusCode, raw: &str) -> Result<XstsTokenInfo, StepError> {
    let cleaned = strip_bom_and_trim(raw);

    if !status.is_success() {
        if let Ok(err_body) = serde_json::from_str::<XstsErrBody>(cleaned) {
            return Err(StepError::Xbox {
                xerr: err_body.xerr.to_string().trim_matches('"').to_string(),
                message: err_body.message,
            });
        }
        return Err(StepError::HttpStatus(status, truncate_for_log(cleaned)));
    }

    if let Some(info) = try_clean_parse(cleaned) {
        return Ok(info);
    }

    if let Some(info) = try_truncated_parse(cleaned) {
        return Ok(info);
    }

    if let Some(info) = try_regex_fallback(cleaned) {
        return Ok(info);
    }

    Err(StepError::Json(format!(
        "unrecoverable XSTS body ({} bytes): {}",
        cleaned.len(),
        truncate_for_log(cleaned)
    )))
}

fn strip_bom_and_trim(raw: &str) -> &str {
    raw.trim_start_matches('\u{feff}').trim()
}

fn try_clean_parse(text: &str) -> Option<XstsTokenInfo> {
    let body: XstsOkBody = serde_json::from_str(text).ok()?;
    to_token_info(body, false)
}

/// Xbox Live truncations observed in the wild cut the response mid-array;
/// walking backward to each successive `}` and retrying a full parse
/// recovers any body that was merely cut short, not corrupted in the middle.
fn try_truncated_parse(text: &str) -> Option<XstsTokenInfo> {
    let bytes = text.as_bytes();
    let mut end = bytes.len();
    while let Some(pos) = text[..end].rfind('}') {
        let candidate = &text[..=pos];
        if let Ok(body) = serde_json::from_str::<XstsOkBody>(candidate) {
            if let Some(info) = to_token_info(body, true) {
                return Some(info);
            }
        }
        end = pos;
        if end == 0 {
            break;
        }
    }
    None
}

fn to_token_info(body: XstsOkBody, derived: bool) -> Option<XstsTokenInfo> {
    let claim = body.display_claims.xui.first()?;
    if claim.uhs.is_empty() {
        return None;
    }
    Some(XstsTokenInfo {
        token: body.token,
        not_after: body.not_after,
        user_hash: claim.uhs.clone(),
        xuid: claim.xid.clone(),
        derived,
    })
}

/// Last resort: pull the `Token`, `uhs` and `xid` values straight out of the
/// raw text with regexes, ignoring JSON structure entirely. Anything this
/// recovers is flagged `derived = true` so operators can see how often the
/// hardened path is actually kicking in.
fn try_regex_fallback(text: &str) -> Option<XstsTokenInfo> {
    let token_re = Regex::new(r#""Token"\s*:\s*"([^"]+)""#).ok()?;
    let uhs_re = Regex::new(r#""uhs"\s*:\s*"([^"]*)""#).ok()?;
    let xid_re = Regex::new(r#""xid"\s*:\s*"([^"]*)""#).ok()?;
    let not_after_re = Regex::new(r#""NotAfter"\s*:\s*"([^"]+)""#).ok()?;

    let token = token_re.captures(text)?.get(1)?.as_str().to_string();
    let user_hash = uhs_re.captures(text)?.get(1)?.as_str().to_string();
    if user_hash.is_empty() {
        return None;
    }
    let xuid = xid_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let not_after = not_after_re
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| DateTime::parse_from_rfc3339(m.as_str()).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(4));

    Some(XstsTokenInfo {
        token,
        not_after,
        user_hash,
        xuid,
        derived: true,
    })
}

fn truncate_for_log(text: &str) -> String {
    const MAX: usize = 300;
    if text.len() <= MAX {
        text.to_string()
    } else {
        format!("{}...", &text[..MAX])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> String {
        r#"{"Token":"TOKEN_VALUE_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "DisplayClaims":{"xui":[{"uhs":"userhash1234","xid":"1234567890"}]},
            "NotAfter":"2030-01-01T00:00:00.0000000Z"}"#
            .to_string()
    }

    #[test]
    fn parses_clean_body() {
        let info = parse_xsts_response(reqwest::StatusCode::OK, &sample_body()).unwrap();
        assert!(!info.derived);
        assert_eq!(info.user_hash, "userhash1234");
        assert_eq!(info.xuid, "1234567890");
    }

    #[test]
    fn strips_bom_before_parsing() {
        let body = format!("\u{feff}{}", sample_body());
        let info = parse_xsts_response(reqwest::StatusCode::OK, &body).unwrap();
        assert_eq!(info.user_hash, "userhash1234");
    }

    #[test]
    fn recovers_from_truncated_trailing_bytes() {
        let body = sample_body();
        let truncated = &body[..body.len() - 20];
        let info = parse_xsts_response(reqwest::StatusCode::OK, truncated).unwrap();
        assert_eq!(info.user_hash, "userhash1234");
    }

    #[test]
    fn falls_back_to_regex_extraction_on_malformed_structure() {
        let garbled = r#"{"Token":"abc123xyz","DisplayClaims":{"xui":[{"uhs":"userhash1234","xid":"1234567890" BROKEN"#;
        let info = parse_xsts_response(reqwest::StatusCode::OK, garbled).unwrap();
        assert!(info.derived);
        assert_eq!(info.user_hash, "userhash1234");
        assert_eq!(info.token, "abc123xyz");
    }

    #[test]
    fn reports_xbox_error_body_on_non_success_status() {
        let err_body = r#"{"Identity":"0","XErr":2148916233,"Message":"","Redirect":""}"#;
        let result = parse_xsts_response(reqwest::StatusCode::UNAUTHORIZED, err_body);
        match result {
            Err(StepError::Xbox { xerr, .. }) => assert_eq!(xerr, "2148916233"),
            other => panic!("expected Xbox error, got {:?}", other),
        }
    }

    #[test]
    fn unrecoverable_garbage_surfaces_json_error() {
        let result = parse_xsts_response(reqwest::StatusCode::OK, "not json at all");
        assert!(matches!(result, Err(StepError::Json(_))));
    }
}
