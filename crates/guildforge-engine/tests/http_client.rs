//! Integration tests for the platform HTTP client using wiremock.
//!
//! These tests pin the REST paths, payloads and error mapping the engine
//! relies on.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use guildforge_core::{ResourceAttributes, ResourceId, ResourceKind, TenantId};
use guildforge_engine::{
    Capabilities, ClientError, HttpResourceClient, LiveSnapshot, ResourceClient, ResourceDraft,
};

const TENANT: TenantId = TenantId::new(42);

// =============================================================================
// Test Helpers
// =============================================================================

async fn setup() -> (MockServer, HttpResourceClient) {
    let server = MockServer::start().await;
    let client = HttpResourceClient::new(server.uri(), Some("secret".to_string())).unwrap();
    (server, client)
}

fn attributes(name: &str, position: u32) -> ResourceAttributes {
    ResourceAttributes {
        name: name.to_string(),
        position,
        permission_template: None,
        parent_id: None,
    }
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn list_decodes_string_ids_and_defaults() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/tenants/42/channels"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "900000000000000001",
                "kind": "channel",
                "name": "general",
                "position": 0,
                "parent_id": "77"
            },
            {
                "id": "5",
                "kind": "channel",
                "name": "bot-log",
                "position": 1,
                "managed_by": "auditbot"
            }
        ])))
        .mount(&server)
        .await;

    let channels = client.list(TENANT, ResourceKind::Channel).await.unwrap();

    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].id, ResourceId::new(900_000_000_000_000_001));
    assert_eq!(channels[0].parent_id, Some(ResourceId::new(77)));
    assert!(channels[0].managed_by.is_none());
    assert!(!channels[0].is_default);
    assert_eq!(channels[1].managed_by.as_deref(), Some("auditbot"));
}

#[tokio::test]
async fn list_failure_makes_snapshot_unavailable() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/tenants/42/roles"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": "maintenance"})))
        .mount(&server)
        .await;

    let err = LiveSnapshot::capture(&client, TENANT).await.unwrap_err();

    assert_eq!(err.http_status_code(), 502);
    assert!(err.is_pre_mutation());
    assert!(err.to_string().contains("maintenance"));
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test]
async fn create_posts_attributes_and_returns_id() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/tenants/42/channels"))
        .and(body_json(json!({
            "name": "general",
            "position": 0,
            "parent_id": "77"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "1234"})))
        .expect(1)
        .mount(&server)
        .await;

    let draft = ResourceDraft {
        kind: ResourceKind::Channel,
        attributes: ResourceAttributes {
            parent_id: Some(ResourceId::new(77)),
            ..attributes("general", 0)
        },
    };
    let id = client.create(TENANT, &draft).await.unwrap();

    assert_eq!(id, ResourceId::new(1234));
}

#[tokio::test]
async fn create_rejection_is_api_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/tenants/42/roles"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "name too long"})))
        .mount(&server)
        .await;

    let draft = ResourceDraft {
        kind: ResourceKind::Role,
        attributes: attributes("Staff", 0),
    };
    let err = client.create(TENANT, &draft).await.unwrap_err();

    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "name too long");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn update_patches_resource() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/tenants/42/categories/9"))
        .and(body_json(json!({
            "name": "Support",
            "position": 2,
            "permission_template": "staff-only"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let attrs = ResourceAttributes {
        permission_template: Some("staff-only".to_string()),
        ..attributes("Support", 2)
    };
    client
        .update(TENANT, ResourceKind::Category, ResourceId::new(9), &attrs)
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_of_missing_resource_is_not_found() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/tenants/42/roles/3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client
        .delete(TENANT, ResourceKind::Role, ResourceId::new(3))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn move_child_puts_parent() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/tenants/42/channels/11/parent"))
        .and(body_json(json!({"parent_id": null})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .move_child(TENANT, ResourceId::new(11), None)
        .await
        .unwrap();
}

// =============================================================================
// Prerequisite Queries
// =============================================================================

#[tokio::test]
async fn capabilities_and_writability() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/tenants/42/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "manage_roles": false,
            "manage_channels": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tenants/42/channels/8/writable"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"writable": true})))
        .mount(&server)
        .await;

    let caps = client.capabilities(TENANT).await.unwrap();
    assert_eq!(
        caps,
        Capabilities {
            manage_roles: false,
            manage_channels: true
        }
    );
    assert!(client.can_write(TENANT, ResourceId::new(8)).await.unwrap());
}

#[tokio::test]
async fn forbidden_is_mapped() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/tenants/42/capabilities"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "missing scope"})))
        .mount(&server)
        .await;

    let err = client.capabilities(TENANT).await.unwrap_err();
    assert!(matches!(err, ClientError::Forbidden(ref m) if m == "missing scope"));
}

#[tokio::test]
async fn undecodable_body_is_decode_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/tenants/42/categories"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.list(TENANT, ResourceKind::Category).await.unwrap_err();
    assert!(matches!(err, ClientError::Decode(_)));
}
