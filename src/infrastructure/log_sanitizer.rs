// 日志脱敏模块 - 审计日志中不得出现完整账号、卡号、用户ID和会话ID

use regex::Regex;
use std::sync::LazyLock;

pub const MASKED: &str = "***MASKED***";

const USER_AGENT_MAX_CHARS: usize = 100;

// 账号/卡号类查询参数（值整体替换）
static SENSITIVE_QUERY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(accountNumber|cardNumber)=[^&]*").unwrap());

// User-Agent 中的 IPv4 地址
static IPV4_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+\.\d+\.\d+").unwrap());

/// 10 位以上纯数字的路径段视为账号
fn is_account_like(segment: &str) -> bool {
    segment.len() >= 10 && segment.bytes().all(|b| b.is_ascii_digit())
}

/// 脱敏请求路径（可带查询串）
pub fn sanitize_path(path_and_query: &str) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let masked_path = path
        .split('/')
        .map(|segment| if is_account_like(segment) { MASKED } else { segment })
        .collect::<Vec<_>>()
        .join("/");

    match query {
        Some(q) => {
            let masked_query = SENSITIVE_QUERY_REGEX.replace_all(q, |caps: &regex::Captures| {
                format!("{}={}", &caps[1], MASKED)
            });
            format!("{}?{}", masked_path, masked_query)
        }
        None => masked_path,
    }
}

/// 用户ID：保留前3位和后3位
pub fn mask_user_id(user_id: Option<&str>) -> String {
    let Some(id) = user_id.filter(|s| !s.is_empty()) else {
        return "anonymous".to_string();
    };
    let chars: Vec<char> = id.chars().collect();
    if chars.len() > 6 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 3..].iter().collect();
        format!("{}***{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

/// 会话ID：只保留后8位
pub fn mask_session_id(session_id: Option<&str>) -> String {
    let Some(id) = session_id.filter(|s| !s.is_empty()) else {
        return "none".to_string();
    };
    let chars: Vec<char> = id.chars().collect();
    if chars.len() > 8 {
        let suffix: String = chars[chars.len() - 8..].iter().collect();
        format!("***{}", suffix)
    } else {
        "***".to_string()
    }
}

pub fn sanitize_user_agent(user_agent: Option<&str>) -> String {
    let Some(ua) = user_agent.filter(|s| !s.is_empty()) else {
        return "unknown".to_string();
    };
    IPV4_REGEX
        .replace_all(ua, "XXX.XXX.XXX.XXX")
        .chars()
        .take(USER_AGENT_MAX_CHARS)
        .collect()
}
