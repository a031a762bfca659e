//! Normalization of provider webhook deliveries into `CanonicalEvent`s.

use std::fmt;
use std::str::FromStr;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::event::CanonicalEvent;

pub const GITHUB_EVENT_HEADER: &str = "X-GitHub-Event";
pub const GITLAB_EVENT_HEADER: &str = "X-Gitlab-Event";

/// Payload dialect of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    GitLab,
}

impl ProviderKind {
    pub fn event_header(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => GITHUB_EVENT_HEADER,
            ProviderKind::GitLab => GITLAB_EVENT_HEADER,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::GitHub => f.write_str("github"),
            ProviderKind::GitLab => f.write_str("gitlab"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "github" => Ok(ProviderKind::GitHub),
            "gitlab" => Ok(ProviderKind::GitLab),
            other => Err(EngineError::Config(format!("unknown provider '{}'", other))),
        }
    }
}

/// What an inbound delivery turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    Event(CanonicalEvent),
    /// Health probe answering a ping request for the given hook.
    Ping { hook_id: i64 },
}

/// Parse the body of a webhook delivery according to the provider's dialect.
pub fn parse_payload(kind: ProviderKind, headers: &HeaderMap, body: &[u8]) -> Result<InboundPayload> {
    let event_type = headers
        .get(kind.event_header())
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            EngineError::InvalidPayload(format!("missing {} header", kind.event_header()))
        })?;

    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| EngineError::InvalidPayload(format!("could not parse JSON body: {}", e)))?;

    debug!(provider = %kind, event_type, "parsing webhook payload");
    match kind {
        ProviderKind::GitHub => parse_github(event_type, &payload),
        ProviderKind::GitLab => parse_gitlab(event_type, &payload).map(InboundPayload::Event),
    }
}

fn str_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn i64_at(value: &Value, pointer: &str) -> Option<i64> {
    value.pointer(pointer).and_then(|v| v.as_i64())
}

fn require_str(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| EngineError::InvalidPayload(format!("missing field {}", pointer)))
}

fn branch_from_ref(git_ref: &str) -> String {
    git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(git_ref)
        .to_string()
}

fn parse_github(event_type: &str, payload: &Value) -> Result<InboundPayload> {
    let owner_id = i64_at(payload, "/repository/owner/id")
        .or_else(|| i64_at(payload, "/organization/id"))
        .unwrap_or_default();

    let event = match event_type {
        "ping" => {
            let hook_id = i64_at(payload, "/hook_id")
                .or_else(|| i64_at(payload, "/hook/id"))
                .ok_or_else(|| EngineError::InvalidPayload("ping without hook_id".into()))?;
            return Ok(InboundPayload::Ping { hook_id });
        }
        "push" => CanonicalEvent {
            event: "push".into(),
            action: String::new(),
            repo: require_str(payload, "/repository/name")?,
            branch: branch_from_ref(&require_str(payload, "/ref")?),
            commit: str_at(payload, "/after"),
            user: str_at(payload, "/pusher/name"),
            user_email: str_at(payload, "/pusher/email"),
            owner_id,
            ..CanonicalEvent::default()
        },
        "pull_request" => CanonicalEvent {
            event: "pull_request".into(),
            action: str_at(payload, "/action"),
            repo: require_str(payload, "/repository/name")?,
            branch: require_str(payload, "/pull_request/head/ref")?,
            dest_branch: str_at(payload, "/pull_request/base/ref"),
            commit: str_at(payload, "/pull_request/head/sha"),
            user: str_at(payload, "/pull_request/user/login"),
            user_email: str_at(payload, "/pull_request/user/email"),
            pull_request_title: str_at(payload, "/pull_request/title"),
            pull_request_url: str_at(payload, "/pull_request/html_url"),
            labels: payload
                .pointer("/pull_request/labels")
                .and_then(|l| l.as_array())
                .map(|labels| {
                    labels
                        .iter()
                        .filter_map(|l| l.get("name").and_then(|n| n.as_str()))
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            owner_id,
        },
        "release" => CanonicalEvent {
            event: "release".into(),
            action: str_at(payload, "/action"),
            repo: require_str(payload, "/repository/name")?,
            branch: require_str(payload, "/release/tag_name")?,
            commit: str_at(payload, "/release/target_commitish"),
            user: str_at(payload, "/release/author/login"),
            owner_id,
            ..CanonicalEvent::default()
        },
        other => return Err(EngineError::UnsupportedEvent(other.to_string())),
    };

    Ok(InboundPayload::Event(event))
}

fn parse_gitlab(event_type: &str, payload: &Value) -> Result<CanonicalEvent> {
    let owner_id = i64_at(payload, "/user_id")
        .or_else(|| i64_at(payload, "/user/id"))
        .or_else(|| i64_at(payload, "/project/namespace_id"))
        .unwrap_or_default();

    let event = match event_type {
        "Push Hook" => CanonicalEvent {
            event: "push".into(),
            action: String::new(),
            repo: require_str(payload, "/project/name")?,
            branch: branch_from_ref(&require_str(payload, "/ref")?),
            commit: str_at(payload, "/checkout_sha"),
            user: str_at(payload, "/user_name"),
            user_email: str_at(payload, "/user_email"),
            owner_id,
            ..CanonicalEvent::default()
        },
        "Merge Request Hook" => CanonicalEvent {
            event: "merge_request".into(),
            action: str_at(payload, "/object_attributes/action"),
            repo: require_str(payload, "/project/name")?,
            branch: require_str(payload, "/object_attributes/source_branch")?,
            dest_branch: str_at(payload, "/object_attributes/target_branch"),
            commit: str_at(payload, "/object_attributes/last_commit/id"),
            user: str_at(payload, "/user/name"),
            user_email: str_at(payload, "/user/email"),
            pull_request_title: str_at(payload, "/object_attributes/title"),
            pull_request_url: str_at(payload, "/object_attributes/url"),
            labels: payload
                .get("labels")
                .and_then(|l| l.as_array())
                .map(|labels| {
                    labels
                        .iter()
                        .filter_map(|l| l.get("id").and_then(|id| id.as_i64()))
                        .map(|id| id.to_string())
                        .collect()
                })
                .unwrap_or_default(),
            owner_id,
        },
        "Release Hook" => CanonicalEvent {
            event: "release".into(),
            action: str_at(payload, "/action"),
            repo: require_str(payload, "/project/name")?,
            branch: require_str(payload, "/tag")?,
            commit: str_at(payload, "/commit/id"),
            user: str_at(payload, "/commit/author/name"),
            user_email: str_at(payload, "/commit/author/email"),
            owner_id,
            ..CanonicalEvent::default()
        },
        other => return Err(EngineError::UnsupportedEvent(other.to_string())),
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn github_push_is_normalized() {
        let body = json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "repository": { "name": "api", "owner": { "id": 42 } },
            "pusher": { "name": "octocat", "email": "octo@example.com" }
        });
        let parsed = parse_payload(
            ProviderKind::GitHub,
            &headers("x-github-event", "push"),
            body.to_string().as_bytes(),
        )
        .unwrap();

        let InboundPayload::Event(event) = parsed else {
            panic!("expected an event");
        };
        assert_eq!(event.event, "push");
        assert_eq!(event.action, "");
        assert_eq!(event.branch, "main");
        assert_eq!(event.repo, "api");
        assert_eq!(event.commit, "abc123");
        assert_eq!(event.user_email, "octo@example.com");
        assert_eq!(event.owner_id, 42);
    }

    #[test]
    fn github_pull_request_carries_action_and_labels() {
        let body = json!({
            "action": "opened",
            "repository": { "name": "api", "owner": { "id": 42 } },
            "pull_request": {
                "title": "Add thing",
                "html_url": "https://github.com/acme/api/pull/1",
                "head": { "ref": "feature", "sha": "def456" },
                "base": { "ref": "main" },
                "user": { "login": "octocat" },
                "labels": [{ "name": "ci" }, { "name": "urgent" }]
            }
        });
        let parsed = parse_payload(
            ProviderKind::GitHub,
            &headers("x-github-event", "pull_request"),
            body.to_string().as_bytes(),
        )
        .unwrap();

        let InboundPayload::Event(event) = parsed else {
            panic!("expected an event");
        };
        assert_eq!(event.composite_key(), "pull_request.opened");
        assert_eq!(event.branch, "feature");
        assert_eq!(event.dest_branch, "main");
        assert_eq!(event.labels, vec!["ci", "urgent"]);
    }

    #[test]
    fn github_ping_yields_hook_id() {
        let body = json!({ "zen": "Keep it logically awesome.", "hook_id": 99 });
        let parsed = parse_payload(
            ProviderKind::GitHub,
            &headers("x-github-event", "ping"),
            body.to_string().as_bytes(),
        )
        .unwrap();
        assert_eq!(parsed, InboundPayload::Ping { hook_id: 99 });
    }

    #[test]
    fn gitlab_merge_request_is_normalized() {
        let body = json!({
            "object_kind": "merge_request",
            "user": { "id": 7, "name": "Jane", "email": "jane@example.com" },
            "project": { "name": "web" },
            "object_attributes": {
                "action": "open",
                "source_branch": "feature",
                "target_branch": "main",
                "title": "MR",
                "url": "https://gitlab.example.com/acme/web/-/merge_requests/3",
                "last_commit": { "id": "0123" }
            },
            "labels": [{ "id": 5 }, { "id": 8 }]
        });
        let parsed = parse_payload(
            ProviderKind::GitLab,
            &headers("x-gitlab-event", "Merge Request Hook"),
            body.to_string().as_bytes(),
        )
        .unwrap();

        let InboundPayload::Event(event) = parsed else {
            panic!("expected an event");
        };
        assert_eq!(event.event, "merge_request");
        assert_eq!(event.action, "open");
        assert_eq!(event.commit, "0123");
        assert_eq!(event.labels, vec!["5", "8"]);
        assert_eq!(event.owner_id, 7);
    }

    #[test]
    fn unknown_event_and_bad_json_are_rejected() {
        let err = parse_payload(
            ProviderKind::GitHub,
            &headers("x-github-event", "star"),
            b"{}",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedEvent(ref e) if e == "star"));

        let err = parse_payload(
            ProviderKind::GitLab,
            &headers("x-gitlab-event", "Push Hook"),
            b"not json",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));

        let err = parse_payload(ProviderKind::GitHub, &HeaderMap::new(), b"{}").unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
    }

    fn parse_event(kind: ProviderKind, event_type: &'static str, body: Value) -> CanonicalEvent {
        let parsed = parse_payload(
            kind,
            &headers(kind_header(kind), event_type),
            body.to_string().as_bytes(),
        )
        .unwrap();
        match parsed {
            InboundPayload::Event(event) => event,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    fn kind_header(kind: ProviderKind) -> &'static str {
        match kind {
            ProviderKind::GitHub => "x-github-event",
            ProviderKind::GitLab => "x-gitlab-event",
        }
    }

    #[test]
    fn github_release_uses_tag_and_target() {
        let event = parse_event(
            ProviderKind::GitHub,
            "release",
            json!({
                "action": "published",
                "repository": { "name": "api", "owner": { "id": 42 } },
                "release": {
                    "tag_name": "v1.0.0",
                    "target_commitish": "main",
                    "author": { "login": "octocat" }
                }
            }),
        );
        assert_eq!(event.composite_key(), "release.published");
        assert_eq!(event.branch, "v1.0.0");
        assert_eq!(event.commit, "main");
        assert_eq!(event.user, "octocat");
        assert_eq!(event.owner_id, 42);
    }

    #[test]
    fn github_owner_falls_back_to_organization() {
        let event = parse_event(
            ProviderKind::GitHub,
            "push",
            json!({
                "ref": "refs/heads/main",
                "repository": { "name": "api" },
                "organization": { "id": 77 }
            }),
        );
        assert_eq!(event.owner_id, 77);
    }

    #[test]
    fn gitlab_push_is_normalized() {
        let event = parse_event(
            ProviderKind::GitLab,
            "Push Hook",
            json!({
                "object_kind": "push",
                "ref": "refs/heads/develop",
                "checkout_sha": "fe12ab",
                "user_id": 9,
                "user_name": "Jane",
                "user_email": "jane@example.com",
                "project": { "name": "web", "namespace_id": 3 }
            }),
        );
        assert_eq!(event.event, "push");
        assert_eq!(event.action, "");
        assert_eq!(event.repo, "web");
        assert_eq!(event.branch, "develop");
        assert_eq!(event.commit, "fe12ab");
        assert_eq!(event.user, "Jane");
        assert_eq!(event.user_email, "jane@example.com");
        // user_id wins over the namespace
        assert_eq!(event.owner_id, 9);
    }

    #[test]
    fn gitlab_release_uses_tag_and_namespace_owner() {
        let event = parse_event(
            ProviderKind::GitLab,
            "Release Hook",
            json!({
                "object_kind": "release",
                "action": "create",
                "tag": "v2.1.0",
                "commit": { "id": "c0ffee", "author": { "name": "Jane", "email": "jane@example.com" } },
                "project": { "name": "web", "namespace_id": 3 }
            }),
        );
        assert_eq!(event.composite_key(), "release.create");
        assert_eq!(event.branch, "v2.1.0");
        assert_eq!(event.commit, "c0ffee");
        assert_eq!(event.owner_id, 3);
    }

    #[test]
    fn gitlab_owner_chain_prefers_user_id_then_user() {
        let mut body = json!({
            "ref": "refs/heads/main",
            "user_id": 1,
            "user": { "id": 2 },
            "project": { "name": "web", "namespace_id": 3 }
        });
        assert_eq!(parse_event(ProviderKind::GitLab, "Push Hook", body.clone()).owner_id, 1);

        body.as_object_mut().unwrap().remove("user_id");
        assert_eq!(parse_event(ProviderKind::GitLab, "Push Hook", body.clone()).owner_id, 2);

        body.as_object_mut().unwrap().remove("user");
        assert_eq!(parse_event(ProviderKind::GitLab, "Push Hook", body.clone()).owner_id, 3);

        body["project"] = json!({ "name": "web" });
        assert_eq!(parse_event(ProviderKind::GitLab, "Push Hook", body).owner_id, 0);
    }

    #[test]
    fn gitlab_system_hook_is_unsupported() {
        let err = parse_payload(
            ProviderKind::GitLab,
            &headers("x-gitlab-event", "System Hook"),
            br#"{"event_name": "project_create"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedEvent(ref e) if e == "System Hook"));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn provider_kind_from_str() {
        assert_eq!("GitHub".parse::<ProviderKind>().unwrap(), ProviderKind::GitHub);
        assert_eq!("gitlab".parse::<ProviderKind>().unwrap(), ProviderKind::GitLab);
        assert!("bitbucket".parse::<ProviderKind>().is_err());
    }
}
