use serde_json::json;
use sha2::{Digest, Sha256};

use taskgate_common::ExecutionRequest;

/// Cache key schema version; bump when the canonical form changes.
const KEY_VERSION: &str = "v1";

/// Content-addressed identity of a semantically equivalent request.
/// Key format: `agent-exec:v1:{agent}:{provider}:{model}:u:{user}:h:{sha256}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_key(&self) -> &str {
        &self.0
    }

    /// Companion key for the single-flight lock.
    pub fn lock_key(&self) -> String {
        format!("lock:{}", self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the fingerprint for a request. Pure and deterministic.
///
/// The digest covers the canonical JSON of `{message, parameters}`;
/// `parameters` is a `BTreeMap`, so serialization is key-sorted and
/// insertion order never changes the hash. Message text is significant
/// verbatim: whitespace and case are part of the identity, since a
/// paraphrased request must miss the cache.
pub fn build(request: &ExecutionRequest) -> Fingerprint {
    let canonical = json!({
        "message": request.message,
        "parameters": request.parameters,
    })
    .to_string();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());

    Fingerprint(format!(
        "agent-exec:{KEY_VERSION}:{}:{}:{}:u:{}:h:{}",
        request.agent, request.provider, request.model, request.user_id, digest
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use taskgate_common::CachePolicy;

    fn make_request() -> ExecutionRequest {
        ExecutionRequest {
            agent: "summarizer".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            user_id: "u1".to_string(),
            message: "Summarize this.".to_string(),
            parameters: BTreeMap::new(),
            cache: CachePolicy::default(),
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(build(&make_request()), build(&make_request()));
    }

    #[test]
    fn test_parameter_order_does_not_matter() {
        let mut a = make_request();
        a.parameters.insert("a".to_string(), "1".to_string());
        a.parameters.insert("b".to_string(), "2".to_string());

        let mut b = make_request();
        b.parameters.insert("b".to_string(), "2".to_string());
        b.parameters.insert("a".to_string(), "1".to_string());

        assert_eq!(build(&a), build(&b));
    }

    #[test]
    fn test_any_field_changes_fingerprint() {
        let base = build(&make_request());

        let mut req = make_request();
        req.agent = "translator".to_string();
        assert_ne!(build(&req), base);

        let mut req = make_request();
        req.provider = "claude".to_string();
        assert_ne!(build(&req), base);

        let mut req = make_request();
        req.model = "gpt-4o".to_string();
        assert_ne!(build(&req), base);

        let mut req = make_request();
        req.user_id = "u2".to_string();
        assert_ne!(build(&req), base);

        let mut req = make_request();
        req.message = "Summarize that.".to_string();
        assert_ne!(build(&req), base);

        let mut req = make_request();
        req.parameters.insert("tone".to_string(), "formal".to_string());
        assert_ne!(build(&req), base);
    }

    #[test]
    fn test_parameter_value_changes_fingerprint() {
        let mut a = make_request();
        a.parameters.insert("tone".to_string(), "formal".to_string());
        let mut b = make_request();
        b.parameters.insert("tone".to_string(), "casual".to_string());
        assert_ne!(build(&a), build(&b));
    }

    #[test]
    fn test_whitespace_is_significant() {
        // Message text is verbatim identity: no trimming, no case folding.
        let mut a = make_request();
        a.message = "Summarize this.".to_string();
        let mut b = make_request();
        b.message = " Summarize this. ".to_string();
        assert_ne!(build(&a), build(&b));

        let mut c = make_request();
        c.message = "summarize this.".to_string();
        assert_ne!(build(&a), build(&c));
    }

    #[test]
    fn test_cache_policy_is_not_part_of_identity() {
        let a = make_request();
        let mut b = make_request();
        b.cache.force_refresh = true;
        b.cache.use_cache = false;
        assert_eq!(build(&a), build(&b));
    }

    #[test]
    fn test_key_shape() {
        let fp = build(&make_request());
        assert!(fp.as_key().starts_with("agent-exec:v1:summarizer:openai:gpt-4o-mini:u:u1:h:"));
        assert_eq!(fp.lock_key(), format!("lock:{}", fp.as_key()));
    }
}
