//! Tenant scope and retrieval filter construction.
//!
//! Every ingested chunk carries `userId` and `conversationId` metadata.
//! At query time the same pair is turned into an equality filter so that a
//! search never returns chunks from another tenant.
//!
//! | userId | conversationId | filter |
//! |--------|----------------|--------|
//! | set    | set            | `userId == u && conversationId == c` |
//! | set    | empty          | `userId == u` |
//! | empty  | set            | `conversationId == c` |
//! | empty  | empty          | none (unrestricted) |
//!
//! An empty scope silently widens the search to every tenant. Callers that
//! expose search to end users should log or reject that case.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::filter::{parse, Expression, FilterParseError};
use crate::models::Metadata;

pub const USER_ID_KEY: &str = "userId";
pub const CONVERSATION_ID_KEY: &str = "conversationId";

/// The `(userId, conversationId)` pair used to partition stored chunks.
///
/// Blank strings are normalised to `None` on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantScope {
    user_id: Option<String>,
    conversation_id: Option<String>,
}

impl TenantScope {
    pub fn new(user_id: Option<String>, conversation_id: Option<String>) -> Self {
        Self {
            user_id: non_blank(user_id),
            conversation_id: non_blank(conversation_id),
        }
    }

    pub fn unscoped() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn is_unscoped(&self) -> bool {
        self.user_id.is_none() && self.conversation_id.is_none()
    }

    /// Read the scope from chunk metadata or a message's metadata map.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self::new(
            metadata.get(USER_ID_KEY).and_then(value_to_string),
            metadata.get(CONVERSATION_ID_KEY).and_then(value_to_string),
        )
    }

    /// Read the scope from a per-request advisor context.
    pub fn from_context(context: &HashMap<String, Value>) -> Self {
        Self::new(
            context.get(USER_ID_KEY).and_then(value_to_string),
            context.get(CONVERSATION_ID_KEY).and_then(value_to_string),
        )
    }

    /// Write both tenant keys into `metadata`; absent fields become JSON `null`.
    pub fn write_metadata(&self, metadata: &mut Metadata) {
        metadata.insert(USER_ID_KEY.to_string(), opt_to_value(&self.user_id));
        metadata.insert(
            CONVERSATION_ID_KEY.to_string(),
            opt_to_value(&self.conversation_id),
        );
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn opt_to_value(value: &Option<String>) -> Value {
    value
        .as_ref()
        .map(|v| Value::String(v.clone()))
        .unwrap_or(Value::Null)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Build the tenant equality filter for `scope`.
pub fn build_filter(scope: &TenantScope) -> Option<Expression> {
    let user = scope
        .user_id()
        .map(|u| Expression::eq(USER_ID_KEY, u));
    let conversation = scope
        .conversation_id()
        .map(|c| Expression::eq(CONVERSATION_ID_KEY, c));

    match (user, conversation) {
        (Some(u), Some(c)) => Some(u.and(c)),
        (Some(u), None) => Some(u),
        (None, Some(c)) => Some(c),
        (None, None) => None,
    }
}

/// Build the tenant filter and conjoin a caller-supplied raw expression.
///
/// A blank `raw` is ignored. With an empty scope the raw expression alone
/// is used.
pub fn build_filter_with(
    scope: &TenantScope,
    raw: Option<&str>,
) -> Result<Option<Expression>, FilterParseError> {
    let computed = build_filter(scope);
    let raw = match raw.filter(|r| !r.trim().is_empty()) {
        Some(text) => Some(parse(text)?),
        None => None,
    };

    Ok(match (computed, raw) {
        (Some(c), Some(r)) => Some(c.and(r)),
        (Some(c), None) => Some(c),
        (None, r) => r,
    })
}
