//! End-to-end workflow tests against the simulated OpenStack platform.

mod common;

use serde_json::json;

use common::{fast_config, harness, harness_with, seed_active};
use resource_orchestrator::constants::{attrib, events, steps};
use resource_orchestrator::models::{LinkType, NewResource, ResourceKind};
use resource_orchestrator::remote::{RemoteOp, StatusRecord};
use resource_orchestrator::state_machine::ResourceState;
use resource_orchestrator::sync::Synchronizer;
use resource_orchestrator::tree::{render, ResourceTreeBuilder};
use resource_orchestrator::workflow::{CreateRequest, ResourceAction, UpdateFields};
use resource_orchestrator::OrchestratorError;

#[tokio::test]
async fn test_volume_create_waits_until_available() {
    let h = harness();
    h.platform.script_next_create(
        ResourceKind::Volume,
        &[None, Some("creating"), Some("creating"), Some("available")],
    );

    let result = h
        .orchestrator
        .create_resource(
            &h.container,
            CreateRequest::new(ResourceKind::Volume, "data").with_attrib(json!({ "size": 20 })),
        )
        .await
        .unwrap();

    let volume = result.resource;
    assert_eq!(volume.state, ResourceState::Active);
    assert!(volume.active);
    assert!(volume.valid_ext_id().is_some());
    assert_eq!(volume.attr_str(attrib::REMOTE_STATUS), Some("available"));
    assert_eq!(h.platform.count(RemoteOp::Create), 1);
    assert_eq!(
        result.outcome.executed_steps(),
        vec![
            steps::CREATE_RESOURCE_PRE_STEP,
            steps::PROVISION_REMOTE_STEP,
            steps::LINK_RESOURCES_STEP,
            steps::CREATE_RESOURCE_POST_STEP,
        ]
    );
    assert!(!result.outcome.progress.is_empty());
}

#[tokio::test]
async fn test_delete_of_vanished_entity_skips_remote_delete() {
    let h = harness();
    let volume = h.create_volume("data", 10).await;
    let ext_id = volume.ext_id.clone().unwrap();
    assert!(h.platform.remove(&ext_id));

    let deleted = h
        .orchestrator
        .delete_resource(&h.container, volume.id)
        .await
        .unwrap()
        .resource;

    assert_eq!(deleted.state, ResourceState::Expunged);
    assert!(!deleted.active);
    assert_eq!(h.platform.count(RemoteOp::Delete), 0);
}

#[tokio::test]
async fn test_boot_volume_error_fails_server_create() {
    let h = harness();
    h.platform
        .script_next_create(ResourceKind::Volume, &[Some("creating"), Some("error")]);

    let err = h
        .orchestrator
        .create_resource(
            &h.container,
            CreateRequest::new(ResourceKind::Server, "web")
                .with_attrib(json!({ "flavor": "m1.small", "boot_volume": { "size": 10 } })),
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, OrchestratorError::RemoteOperation { status_code: None, .. }),
        "unexpected error {err:?}"
    );

    let server = h
        .container
        .find_resource_by_name(ResourceKind::Server, "web", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.state, ResourceState::Building);

    let volume = h
        .container
        .find_resource_by_name(ResourceKind::Volume, "web-boot_volume", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(volume.state, ResourceState::Error);

    let server_creates = h
        .platform
        .calls()
        .into_iter()
        .filter(|c| c.op == RemoteOp::Create && c.kind == Some(ResourceKind::Server))
        .count();
    assert_eq!(server_creates, 0);
}

#[tokio::test]
async fn test_server_with_boot_volume_links_and_blocks_volume_delete() {
    let h = harness();
    let server = h
        .orchestrator
        .create_resource(
            &h.container,
            CreateRequest::new(ResourceKind::Server, "web")
                .with_attrib(json!({ "flavor": "m1.small", "boot_volume": { "size": 10 } })),
        )
        .await
        .unwrap()
        .resource;
    assert_eq!(server.state, ResourceState::Active);

    let volume_id = server.attr("boot_volume").and_then(|v| v.as_i64()).unwrap();
    let volume = h.reload(volume_id).await;
    assert_eq!(volume.name, "web-boot_volume");
    assert_eq!(volume.state, ResourceState::Active);
    assert_eq!(
        server.attr_str("boot_volume_ext_id"),
        volume.ext_id.as_deref()
    );

    let links = h.container.links(server.id).await.unwrap();
    assert!(links.iter().any(|l| l.link_type == LinkType::Volume
        && l.start_resource_id == server.id
        && l.end_resource_id == volume_id));

    let err = h
        .orchestrator
        .delete_resource(&h.container, volume_id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(h.reload(volume_id).await.state, ResourceState::Active);

    h.orchestrator
        .delete_resource(&h.container, server.id)
        .await
        .unwrap();
    assert!(h.container.links(volume_id).await.unwrap().is_empty());

    let volume = h
        .orchestrator
        .delete_resource(&h.container, volume_id)
        .await
        .unwrap()
        .resource;
    assert_eq!(volume.state, ResourceState::Expunged);
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let h = harness();
    let first = h.create_volume("data", 10).await;
    let second = h.create_volume("data", 10).await;

    assert_eq!(first.id, second.id);
    assert_eq!(first.ext_id, second.ext_id);
    assert_eq!(h.platform.count(RemoteOp::Create), 1);
}

#[tokio::test]
async fn test_retry_after_failed_create_reuses_remote_entity() {
    let h = harness();
    h.platform
        .script_next_create(ResourceKind::Volume, &[Some("creating"), Some("error")]);
    let request = CreateRequest::new(ResourceKind::Volume, "data").with_attrib(json!({ "size": 10 }));

    assert!(h
        .orchestrator
        .create_resource(&h.container, request.clone())
        .await
        .is_err());
    let failed = h
        .container
        .find_resource_by_name(ResourceKind::Volume, "data", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.state, ResourceState::Error);
    let ext_id = failed.ext_id.clone().unwrap();

    // Operator fixed the volume by hand
    h.platform.set_status(&ext_id, Some("available"));

    let retried = h
        .orchestrator
        .create_resource(&h.container, request)
        .await
        .unwrap()
        .resource;
    assert_eq!(retried.id, failed.id);
    assert_eq!(retried.ext_id.as_deref(), Some(ext_id.as_str()));
    assert_eq!(retried.state, ResourceState::Active);
    assert_eq!(h.platform.count(RemoteOp::Create), 1);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = harness();
    let volume = h.create_volume("data", 10).await;

    h.orchestrator
        .delete_resource(&h.container, volume.id)
        .await
        .unwrap();
    let again = h
        .orchestrator
        .delete_resource(&h.container, volume.id)
        .await
        .unwrap();

    assert_eq!(again.resource.state, ResourceState::Expunged);
    assert_eq!(h.platform.count(RemoteOp::Delete), 1);
}

#[tokio::test]
async fn test_action_is_invoked_once_across_resume() {
    let mut config = fast_config();
    config.polling.max_attempts = 3;
    let h = harness_with(config);
    let server = h.create_server("web").await;
    let ext_id = server.ext_id.clone().unwrap();
    h.platform.script_action("migrate", &[Some("MIGRATING")]);

    let definition = h
        .orchestrator
        .action_task(&h.container, server.id, ResourceAction::Migrate, json!({}))
        .await
        .unwrap();
    let task_id = definition.task_id;

    let err = h.orchestrator.run(&h.container, definition).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Timeout { .. }), "unexpected error {err:?}");
    assert_eq!(h.reload(server.id).await.state, ResourceState::Updating);

    h.platform.set_status(&ext_id, Some("ACTIVE"));
    let resumed = h
        .orchestrator
        .resume_task(&h.container, task_id)
        .await
        .unwrap();

    assert_eq!(resumed.outcome.resumed_from, 1);
    assert_eq!(h.platform.action_count("migrate"), 1);
    assert_eq!(resumed.resource.state, ResourceState::Active);
}

#[tokio::test]
async fn test_stack_create_discovers_children_and_delete_cascades() {
    let h = harness();
    h.platform.push_create_id("STK1");
    h.platform.insert(
        StatusRecord::new("SRV1", ResourceKind::Server)
            .with_name("app-1")
            .with_parent("STK1")
            .with_status("ACTIVE"),
    );
    h.platform.insert(
        StatusRecord::new("NET1", ResourceKind::Network)
            .with_name("app-net")
            .with_parent("STK1")
            .with_status("ACTIVE"),
    );

    let stack = h
        .orchestrator
        .create_resource(&h.container, CreateRequest::new(ResourceKind::Stack, "app"))
        .await
        .unwrap()
        .resource;
    assert_eq!(stack.ext_id.as_deref(), Some("STK1"));

    let children = h.container.children(stack.id).await.unwrap();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|c| c.state == ResourceState::Active));
    let stack_links = h
        .container
        .links(stack.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|l| l.link_type == LinkType::Stack)
        .count();
    assert_eq!(stack_links, 2);

    h.platform
        .script_delete(ResourceKind::Stack, &[Some("DELETE_IN_PROGRESS")]);
    let deleted = h
        .orchestrator
        .delete_resource(&h.container, stack.id)
        .await
        .unwrap()
        .resource;

    assert_eq!(deleted.state, ResourceState::Expunged);
    for child in children {
        assert_eq!(h.reload(child.id).await.state, ResourceState::Expunged);
    }
    assert_eq!(h.platform.count(RemoteOp::Delete), 1);
    assert!(h.container.links(stack.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_rename_reaches_remote_entity() {
    let h = harness();
    let volume = h.create_volume("data", 10).await;

    let updated = h
        .orchestrator
        .update_resource(&h.container, volume.id, UpdateFields::name("data-renamed"))
        .await
        .unwrap()
        .resource;

    assert_eq!(updated.name, "data-renamed");
    assert_eq!(updated.state, ResourceState::Active);
    let record = h.platform.record(volume.ext_id.as_deref().unwrap()).unwrap();
    assert_eq!(record.name.as_deref(), Some("data-renamed"));
}

#[tokio::test]
async fn test_extend_volume_records_new_size() {
    let h = harness();
    let volume = h.create_volume("data", 10).await;
    h.platform
        .script_action("extend", &[Some("extending"), Some("available")]);

    let extended = h
        .orchestrator
        .run_action(&h.container, volume.id, ResourceAction::ExtendVolume, json!({ "size": 40 }))
        .await
        .unwrap()
        .resource;

    assert_eq!(extended.state, ResourceState::Active);
    assert_eq!(extended.attr_u64("size"), Some(40));
    assert_eq!(h.platform.action_count("extend"), 1);
}

#[tokio::test]
async fn test_unsupported_action_is_rejected_before_remote_call() {
    let h = harness();
    let volume = h.create_volume("data", 10).await;

    let err = h
        .orchestrator
        .run_action(&h.container, volume.id, ResourceAction::Migrate, json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(h.reload(volume.id).await.state, ResourceState::Active);
    assert_eq!(h.platform.count(RemoteOp::Action), 0);
}

#[tokio::test]
async fn test_independent_tasks_run_concurrently() {
    let h = harness();
    let mut definitions = Vec::new();
    for name in ["a", "b", "c"] {
        let request = CreateRequest::new(ResourceKind::Volume, name).with_attrib(json!({ "size": 5 }));
        definitions.push(h.orchestrator.create_task(&h.container, &request).await.unwrap());
    }

    let outcomes = h.orchestrator.run_all(definitions).await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(Result::is_ok));

    let mut ext_ids = Vec::new();
    for name in ["a", "b", "c"] {
        let volume = h
            .container
            .find_resource_by_name(ResourceKind::Volume, name, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(volume.state, ResourceState::Active);
        ext_ids.push(volume.ext_id.unwrap());
    }
    ext_ids.sort();
    ext_ids.dedup();
    assert_eq!(ext_ids.len(), 3);
}

#[tokio::test]
async fn test_task_lifecycle_events_are_published() {
    let h = harness();
    let mut receiver = h.orchestrator.events().subscribe();

    h.create_volume("data", 10).await;

    let mut names = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        names.push(event.name);
    }
    assert_eq!(names.first().map(String::as_str), Some(events::TASK_STARTED));
    assert_eq!(names.last().map(String::as_str), Some(events::TASK_COMPLETED));
    assert_eq!(
        names.iter().filter(|n| n.as_str() == events::STEP_COMPLETED).count(),
        4
    );
}

#[tokio::test]
async fn test_synchronize_then_tree_reflects_remote_inventory() {
    let h = harness();
    let project = seed_active(&h.container, NewResource::new("ops", ResourceKind::Project)).await;
    let created = h.create_volume("kept", 10).await;
    let orphan = seed_active(
        &h.container,
        NewResource::new("orphan", ResourceKind::Volume)
            .with_parent(project.id)
            .with_ext_id("V-GONE"),
    )
    .await;

    let summary = Synchronizer::new()
        .run(&h.container, ResourceKind::Volume)
        .await
        .unwrap();
    assert_eq!(summary.marked_error, vec![orphan.id]);
    assert!(summary.registered.is_empty());
    assert_eq!(h.reload(created.id).await.state, ResourceState::Active);

    let roots = ResourceTreeBuilder::new().build(&h.container).await.unwrap();
    let ops = roots.iter().find(|n| n.id == project.id).unwrap();
    assert_eq!(ops.find(orphan.id).map(|n| n.state), Some(ResourceState::Error));
    assert!(render(&roots).contains("orphan [volume]"));
}
