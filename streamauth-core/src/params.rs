//! Parameter normalization shared by the protocol authenticators

use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// Decode a form-encoded value (`+` is a space).
pub fn url_decode(value: &str) -> Option<String> {
    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Decode a value, keeping the raw text when it is not valid percent-encoding.
pub fn decode_or_raw(value: &str) -> String {
    url_decode(value).unwrap_or_else(|| value.to_string())
}

fn strip_query_marker(key: &str) -> &str {
    key.strip_prefix('?').unwrap_or(key)
}

/// Parse a connect-time query string (`?a=1&b=2`) into a decoded map.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let query = strip_query_marker(query.trim());
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Parse `key=value` argument strings. Any argument without `=` makes the
/// whole set invalid.
pub fn parse_pairs(args: &[String]) -> Option<HashMap<String, String>> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Normalize a raw connect-parameter map: decode every value and drop a
/// leading `?` from keys.
pub fn decode_params(params: &HashMap<String, String>) -> HashMap<String, String> {
    params
        .iter()
        .map(|(key, value)| (strip_query_marker(key).to_string(), decode_or_raw(value)))
        .collect()
}

/// Client-agent allow-list for RTMP connections.
///
/// Patterns are separated by `;` and matched as case-insensitive substrings of
/// the agent string. `*` alone allows every agent; a trailing `*` on a pattern
/// is treated as a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAllowList {
    patterns: Option<Vec<String>>,
}

impl AgentAllowList {
    pub const ALLOW_ALL: &'static str = "*";

    pub fn parse(list: &str) -> Self {
        if list.trim() == Self::ALLOW_ALL {
            return Self { patterns: None };
        }
        let patterns: Vec<String> = list
            .split(';')
            .map(|p| p.trim().trim_end_matches('*').trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .collect();
        if patterns.is_empty() {
            Self { patterns: None }
        } else {
            Self {
                patterns: Some(patterns),
            }
        }
    }

    #[must_use]
    pub const fn allows_all(&self) -> bool {
        self.patterns.is_none()
    }

    /// Whether `agent` is allowed. A missing agent only passes an allow-all list.
    pub fn allows(&self, agent: Option<&str>) -> bool {
        let Some(patterns) = &self.patterns else {
            return true;
        };
        let Some(agent) = agent else {
            return false;
        };
        let agent = agent.to_uppercase();
        patterns.iter().any(|p| agent.contains(p.as_str()))
    }
}

impl Default for AgentAllowList {
    fn default() -> Self {
        Self { patterns: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("a%20b+c").as_deref(), Some("a b c"));
        assert_eq!(url_decode("%E2%9C%93").as_deref(), Some("✓"));
        assert_eq!(decode_or_raw("%FF%FE"), "%FF%FE");
    }

    #[test]
    fn test_parse_query_string() {
        let map = parse_query_string("?username=al%20ice&password=s3cret&token=");
        assert_eq!(map.get("username").map(String::as_str), Some("al ice"));
        assert_eq!(map.get("password").map(String::as_str), Some("s3cret"));
        assert_eq!(map.get("token").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_pairs() {
        let args = vec!["username=bob".to_string(), "password=a=b".to_string()];
        let map = parse_pairs(&args).unwrap();
        assert_eq!(map["username"], "bob");
        assert_eq!(map["password"], "a=b");

        assert!(parse_pairs(&["username".to_string()]).is_none());
    }

    #[test]
    fn test_decode_params_strips_marker() {
        let raw = HashMap::from([("?username".to_string(), "j%40ne".to_string())]);
        let decoded = decode_params(&raw);
        assert_eq!(decoded["username"], "j@ne");
    }

    #[test]
    fn test_agent_allow_list() {
        assert!(AgentAllowList::parse("*").allows(Some("anything")));
        assert!(AgentAllowList::parse("*").allows(None));

        let win = AgentAllowList::parse("WIN*");
        assert!(win.allows(Some("WIN 11,2,202,235")));
        assert!(win.allows(Some("win 32,0,0,1")));

        let strict = AgentAllowList::parse("WIN");
        assert!(!strict.allows(Some("LNX 1,0")));
        assert!(!strict.allows(None));

        let multi = AgentAllowList::parse(" FMLE ; lnx ");
        assert!(multi.allows(Some("LNX 9,0,124,2")));
        assert!(multi.allows(Some("FMLE/3.0 (compatible; FMSc/1.0)")));
        assert!(!multi.allows(Some("MAC 10,0")));
    }
}
