mod common;

use caseflow::subscriptions::{Subscription, SubscriptionCache};
use caseflow::workflow::{
    ChildWorkflowSnapshot, DefinitionRegistry, RuntimeStatus, StateMachine, Transition, WorkflowEvent,
    UPDATE_CONTEXT_EVENT,
};
use caseflow::{OrchestratorError, OrchestratorResult, ProjectScope, WorkflowDefinition, WorkflowRuntime};
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Refuses every event
struct FrozenStateMachine;

impl StateMachine for FrozenStateMachine {
    fn transition(
        &self,
        _definition: &WorkflowDefinition,
        runtime: &WorkflowRuntime,
        _event: &WorkflowEvent,
    ) -> OrchestratorResult<Transition> {
        Err(OrchestratorError::Precondition(format!("runtime {} is frozen", runtime.id)))
    }
}

async fn note_context(h: &Harness, runtime_id: &str, note: &str) {
    let mut context = h.orchestrator.get_runtime(runtime_id, &scope()).await.unwrap().context;
    context.extra.insert("note".to_string(), json!(note));
    h.orchestrator
        .send_event(
            runtime_id,
            UPDATE_CONTEXT_EVENT,
            Some(json!({ "context": context.to_value().unwrap() })),
            &scope(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn create_starts_runtime_at_initial_state() {
    let h = harness().await;

    let runtime = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();

    assert_eq!(runtime.state, "collecting");
    assert_eq!(runtime.status, RuntimeStatus::Active);
    assert_eq!(runtime.workflow_definition_id, PARENT_DEFINITION);
    assert_eq!(runtime.project_id, "proj-a");
    assert!(runtime.business_id.is_some());
    assert!(runtime.end_user_id.is_none());

    let stored = h.orchestrator.get_runtime(&runtime.id, &scope()).await.unwrap();
    assert_eq!(stored.context.entity_str("companyName"), Some("Acme Ltd"));
    assert!(stored.context.child_workflows.is_empty());
}

#[tokio::test]
async fn create_uses_latest_definition_version() {
    let mut v2 = parent_definition();
    v2.id = "kyb-parent-v2".to_string();
    v2.version = 2;
    let h = harness_with(vec![parent_definition(), v2, child_definition()]).await;

    let runtime = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();

    assert_eq!(runtime.workflow_definition_id, "kyb-parent-v2");
    assert_eq!(runtime.workflow_definition_version, 2);
}

#[tokio::test]
async fn create_reports_every_schema_violation() {
    let h = harness().await;
    let mut input = business_input("Acme Ltd");
    input.entity.data.remove("companyName");
    input.entity.data.insert("country".to_string(), json!("G"));

    let err = h.orchestrator.create(input, &scope()).await.unwrap_err();

    match err {
        OrchestratorError::Validation(issues) => {
            assert_eq!(issues.len(), 2);
            assert!(issues.iter().any(|issue| issue.path == "/country"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn create_requires_both_crm_fields() {
    let h = harness().await;
    let mut input = business_input("Acme Ltd");
    input.salesforce_object_name = Some("Account".to_string());

    let err = h.orchestrator.create(input.clone(), &scope()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(ref issues) if issues.len() == 1));

    input.salesforce_record_id = Some("001XX000003DHPh".to_string());
    let runtime = h.orchestrator.create(input, &scope()).await.unwrap();
    assert_eq!(runtime.salesforce_object_name.as_deref(), Some("Account"));
    assert_eq!(runtime.salesforce_record_id.as_deref(), Some("001XX000003DHPh"));
}

#[tokio::test]
async fn unknown_definition_is_not_found() {
    let h = harness().await;
    let mut input = business_input("Acme Ltd");
    input.workflow_definition_name = "missing".to_string();

    let err = h.orchestrator.create(input, &scope()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn runtimes_are_invisible_to_other_tenants() {
    let h = harness().await;
    let runtime = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();
    let other = ProjectScope::single("proj-b");

    let err = h.orchestrator.get_runtime(&runtime.id, &other).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let err = h
        .orchestrator
        .create_child_entity(&runtime.id, ubo("Ada"), &other)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    // a caller allowed on both projects sees it
    let shared = ProjectScope::new(vec!["proj-b".to_string(), "proj-a".to_string()], "proj-b");
    assert!(h.orchestrator.get_runtime(&runtime.id, &shared).await.is_ok());
}

#[tokio::test]
async fn create_refuses_a_project_outside_the_allowed_set() {
    let h = harness().await;
    let mut input = business_input("Acme Ltd");
    input.entity.id = Some("biz-acme".to_string());
    let stray = ProjectScope::new(vec!["proj-a".to_string()], "proj-z");

    let err = h.orchestrator.create(input.clone(), &stray).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Precondition(_)));

    // nothing was written: the same business id is still free
    let runtime = h.orchestrator.create(input, &scope()).await.unwrap();
    assert_eq!(runtime.business_id.as_deref(), Some("biz-acme"));
    assert_eq!(runtime.project_id, "proj-a");
}

#[tokio::test]
async fn child_entity_is_linked_and_indexed() {
    let h = harness().await;
    let parent = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();

    let child = h
        .orchestrator
        .create_child_entity(&parent.id, ubo("Ada"), &scope())
        .await
        .unwrap();

    assert_eq!(child.parent_runtime_id.as_deref(), Some(parent.id.as_str()));
    assert_eq!(child.workflow_definition_id, CHILD_DEFINITION);
    assert_eq!(child.state, "pending");
    let entity = child.context.entity.as_ref().unwrap();
    assert_eq!(entity.data["additionalInfo"]["companyName"], json!("Acme Ltd"));
    assert_eq!(entity.data["additionalInfo"]["customerCompany"], json!("Example Bank"));
    assert!(child.context.documents.is_empty());

    let end_user_id = child.end_user_id.clone().unwrap();
    let linked = h
        .orchestrator
        .storage()
        .linked_businesses(&end_user_id, "ubo")
        .await
        .unwrap();
    assert_eq!(linked, vec![parent.business_id.clone().unwrap()]);

    let parent = h.orchestrator.get_runtime(&parent.id, &scope()).await.unwrap();
    let snapshot = &parent.context.child_workflows[CHILD_DEFINITION][&child.id];
    assert_eq!(snapshot.entity_id, end_user_id);
    assert_eq!(snapshot.state, "pending");
    assert_eq!(parent.state, "collecting");
}

#[tokio::test]
async fn child_entity_needs_a_business_parent() {
    let h = harness().await;
    let mut input = business_input("Acme Ltd");
    input.entity.kind = caseflow::workflow::EntityKind::Individual;
    let individual = h.orchestrator.create(input, &scope()).await.unwrap();

    let err = h
        .orchestrator
        .create_child_entity(&individual.id, ubo("Ada"), &scope())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Precondition(_)));
    let unchanged = h.orchestrator.get_runtime(&individual.id, &scope()).await.unwrap();
    assert!(unchanged.context.child_workflows.is_empty());
    assert_eq!(unchanged.lock_version, individual.lock_version);
}

#[tokio::test]
async fn child_entity_needs_a_child_definition() {
    let mut parent = parent_definition();
    parent.config.child_entity_definition_id = None;
    let h = harness_with(vec![parent, child_definition()]).await;
    let runtime = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();

    let err = h
        .orchestrator
        .create_child_entity(&runtime.id, ubo("Ada"), &scope())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Precondition(_)));
    assert!(h.orchestrator.storage().list_children(&runtime.id, &scope()).await.unwrap().is_empty());
}

#[tokio::test]
async fn child_definition_of_another_project_is_not_found() {
    let mut child = child_definition();
    child.project_id = Some("proj-b".to_string());
    let h = harness_with(vec![parent_definition(), child]).await;
    let runtime = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();

    let err = h
        .orchestrator
        .create_child_entity(&runtime.id, ubo("Ada"), &scope())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert!(h.orchestrator.storage().list_children(&runtime.id, &scope()).await.unwrap().is_empty());
    let unchanged = h.orchestrator.get_runtime(&runtime.id, &scope()).await.unwrap();
    assert!(unchanged.context.child_workflows.is_empty());

    // a caller allowed on the owning project may use it
    let both = ProjectScope::new(vec!["proj-a".to_string(), "proj-b".to_string()], "proj-a");
    let attached = h.orchestrator.create_child_entity(&runtime.id, ubo("Ada"), &both).await.unwrap();
    assert_eq!(attached.project_id, "proj-a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_children_are_both_kept() {
    let h = harness().await;
    let parent = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();

    let first = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let parent_id = parent.id.clone();
        tokio::spawn(async move { orchestrator.create_child_entity(&parent_id, ubo("Ada"), &scope()).await })
    };
    let second = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let parent_id = parent.id.clone();
        tokio::spawn(async move { orchestrator.create_child_entity(&parent_id, ubo("Grace"), &scope()).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    let parent = h.orchestrator.get_runtime(&parent.id, &scope()).await.unwrap();
    let bucket = &parent.context.child_workflows[CHILD_DEFINITION];
    assert_eq!(bucket.len(), 2);
    assert!(bucket.contains_key(&first.id));
    assert!(bucket.contains_key(&second.id));
}

#[tokio::test]
async fn create_then_delete_restores_child_index() {
    let h = harness().await;
    let parent = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();
    let before = parent.context.to_value().unwrap().get("childWorkflows").cloned();

    let child = h
        .orchestrator
        .create_child_entity(&parent.id, ubo("Ada"), &scope())
        .await
        .unwrap();
    let entity_id = child.end_user_id.clone().unwrap();

    let parent = h
        .orchestrator
        .delete_child_entities(&parent.id, &[entity_id], "officer-1", &scope())
        .await
        .unwrap();

    assert_eq!(parent.context.to_value().unwrap().get("childWorkflows").cloned(), before);
    let err = h.orchestrator.get_runtime(&child.id, &scope()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn delete_only_prunes_targeted_children() {
    let h = harness().await;
    let parent = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();
    let ada = h
        .orchestrator
        .create_child_entity(&parent.id, ubo("Ada"), &scope())
        .await
        .unwrap();
    let grace = h
        .orchestrator
        .create_child_entity(&parent.id, ubo("Grace"), &scope())
        .await
        .unwrap();

    // A bucket maintained by another process, shaped however it likes
    let mut context = h.orchestrator.get_runtime(&parent.id, &scope()).await.unwrap().context;
    let mut external: ChildWorkflowSnapshot = serde_json::from_value(json!({
        "entityId": "external-entity",
        "state": "screening",
        "status": "active",
        "hits": [{ "list": "sanctions" }]
    }))
    .unwrap();
    external.extra.insert("reviewer".to_string(), json!("ops"));
    context.upsert_child("aml-v1", "aml-runtime", external);
    h.orchestrator
        .send_event(
            &parent.id,
            UPDATE_CONTEXT_EVENT,
            Some(json!({ "context": context.to_value().unwrap() })),
            &scope(),
        )
        .await
        .unwrap();
    let untouched = h.orchestrator.get_runtime(&parent.id, &scope()).await.unwrap().context.child_workflows["aml-v1"]
        .clone();

    let parent = h
        .orchestrator
        .delete_child_entities(&parent.id, &[ada.end_user_id.clone().unwrap()], "officer-1", &scope())
        .await
        .unwrap();

    let index = &parent.context.child_workflows;
    assert_eq!(index[CHILD_DEFINITION].keys().collect::<Vec<_>>(), vec![&grace.id]);
    assert_eq!(index["aml-v1"], untouched);
    assert_eq!(
        serde_json::to_string(&index["aml-v1"]).unwrap(),
        serde_json::to_string(&untouched).unwrap()
    );

    let children = h.orchestrator.storage().list_children(&parent.id, &scope()).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, grace.id);
}

#[tokio::test]
async fn delete_prunes_the_index_of_whichever_parent_owns_the_child() {
    let h = harness().await;
    let first = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();
    let second = h.orchestrator.create(business_input("Globex plc"), &scope()).await.unwrap();
    let kept = h
        .orchestrator
        .create_child_entity(&second.id, ubo("Grace"), &scope())
        .await
        .unwrap();
    let moved = h
        .orchestrator
        .create_child_entity(&second.id, ubo("Ada"), &scope())
        .await
        .unwrap();

    let first = h
        .orchestrator
        .delete_child_entities(&first.id, &[moved.end_user_id.clone().unwrap()], "officer-1", &scope())
        .await
        .unwrap();
    assert!(first.context.child_workflows.is_empty());

    let err = h.orchestrator.get_runtime(&moved.id, &scope()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let second = h.orchestrator.get_runtime(&second.id, &scope()).await.unwrap();
    let bucket = &second.context.child_workflows[CHILD_DEFINITION];
    assert_eq!(bucket.keys().collect::<Vec<_>>(), vec![&kept.id]);
    assert_eq!(second.state, "collecting");
}

#[tokio::test]
async fn events_drive_the_state_machine_and_webhooks() {
    let h = harness().await;
    let runtime = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();

    let err = h
        .orchestrator
        .send_event(&runtime.id, "APPROVE", None, &scope())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Precondition(_)));

    let review = h.orchestrator.send_event(&runtime.id, "SUBMIT", None, &scope()).await.unwrap();
    assert_eq!(review.state, "review");
    assert_eq!(review.status, RuntimeStatus::Active);

    let approved = h.orchestrator.send_event(&runtime.id, "APPROVE", None, &scope()).await.unwrap();
    assert_eq!(approved.state, "approved");
    assert_eq!(approved.status, RuntimeStatus::Completed);
    assert!(approved.resolved_at.is_some());

    assert_eq!(
        h.webhooks.deliveries(),
        vec![
            (WORKFLOW_HOOK.to_string(), "workflow.state.changed".to_string()),
            (WORKFLOW_HOOK.to_string(), "workflow.state.changed".to_string()),
            (WORKFLOW_HOOK.to_string(), "workflow.completed".to_string()),
        ]
    );
    let completed = h.webhooks.payloads().pop().unwrap();
    assert_eq!(completed.environment, "test");
    assert_eq!(completed.api_version, 2);
    assert_eq!(completed.workflow_runtime_id, runtime.id);
    assert_eq!(completed.state, "approved");

    let err = h
        .orchestrator
        .send_event(&runtime.id, "REJECT", None, &scope())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Precondition(_)));
}

#[tokio::test]
async fn customer_subscriptions_are_overridden_per_event() {
    let h = harness().await;
    h.orchestrator
        .storage()
        .save_customer(
            "proj-a",
            "Example Bank",
            &[caseflow::subscriptions::Subscription::webhook(
                "http://hooks.test/customer",
                &["workflow.state.changed", "workflow.context.changed"],
            )],
        )
        .await
        .unwrap();

    let runtime = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();
    h.orchestrator.send_event(&runtime.id, "SUBMIT", None, &scope()).await.unwrap();
    h.orchestrator
        .create_child_entity(&runtime.id, ubo("Ada"), &scope())
        .await
        .unwrap();

    // state changes go to the workflow hook only; context changes still reach the customer
    assert_eq!(
        h.webhooks.deliveries(),
        vec![
            (WORKFLOW_HOOK.to_string(), "workflow.state.changed".to_string()),
            ("http://hooks.test/customer".to_string(), "workflow.context.changed".to_string()),
        ]
    );
}

#[tokio::test]
async fn failed_transition_rolls_back_child_rows() {
    let h = harness_customized(vec![parent_definition(), child_definition()], |orchestrator| {
        orchestrator.with_state_machine(Arc::new(FrozenStateMachine))
    })
    .await;
    let parent = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();

    let err = h
        .orchestrator
        .create_child_entity(&parent.id, ubo("Ada"), &scope())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Precondition(_)));
    assert!(h.orchestrator.storage().list_children(&parent.id, &scope()).await.unwrap().is_empty());
    let parent_after = h.orchestrator.get_runtime(&parent.id, &scope()).await.unwrap();
    assert!(parent_after.context.child_workflows.is_empty());
    assert_eq!(parent_after.lock_version, parent.lock_version);
}

#[tokio::test]
async fn customer_subscription_changes_apply_after_invalidation() {
    let cache = Arc::new(SubscriptionCache::new(Duration::from_secs(300)));
    let injected = Arc::clone(&cache);
    let h = harness_customized(vec![parent_definition(), child_definition()], move |orchestrator| {
        orchestrator.with_subscription_cache(injected)
    })
    .await;
    let storage = h.orchestrator.storage();
    let old_hook = "http://hooks.test/old";
    let new_hook = "http://hooks.test/new";

    storage
        .save_customer("proj-a", "Example Bank", &[Subscription::webhook(old_hook, &["workflow.context.changed"])])
        .await
        .unwrap();
    let runtime = h.orchestrator.create(business_input("Acme Ltd"), &scope()).await.unwrap();
    note_context(&h, &runtime.id, "first").await;

    storage
        .save_customer("proj-a", "Example Bank", &[Subscription::webhook(new_hook, &["workflow.context.changed"])])
        .await
        .unwrap();
    note_context(&h, &runtime.id, "second").await;

    cache.invalidate("proj-a").await;
    note_context(&h, &runtime.id, "third").await;

    let urls: Vec<String> = h.webhooks.deliveries().into_iter().map(|(url, _)| url).collect();
    assert_eq!(urls, vec![old_hook, old_hook, new_hook]);
}

#[tokio::test]
async fn definitions_reload_from_storage() {
    let h = harness().await;
    let registry = h.orchestrator.registry();

    let mut updated = parent_definition();
    updated.config.subscriptions.clear();
    h.orchestrator.storage().save_definition(&updated).await.unwrap();
    assert_eq!(registry.get(PARENT_DEFINITION).unwrap().definition.config.subscriptions.len(), 1);

    registry.reload_definition(PARENT_DEFINITION).await.unwrap();
    assert!(registry.get(PARENT_DEFINITION).unwrap().definition.config.subscriptions.is_empty());

    let mut private = parent_definition();
    private.id = "kyb-parent-proj-b".to_string();
    private.version = 7;
    private.project_id = Some("proj-b".to_string());
    h.orchestrator.storage().save_definition(&private).await.unwrap();

    let fresh = DefinitionRegistry::new(h.orchestrator.storage().clone());
    fresh.init_from_storage().await.unwrap();
    assert_eq!(fresh.latest_by_name("kyb_parent", &scope()).unwrap().definition.id, PARENT_DEFINITION);
    assert_eq!(
        fresh
            .latest_by_name("kyb_parent", &ProjectScope::single("proj-b"))
            .unwrap()
            .definition
            .id,
        "kyb-parent-proj-b"
    );
}

#[tokio::test]
async fn shared_definition_versions_are_unique_per_name() {
    let h = harness().await;
    let registry = h.orchestrator.registry();

    let mut duplicate = parent_definition();
    duplicate.id = "kyb-parent-v1-copy".to_string();
    assert!(registry.register(duplicate).await.is_err());
    assert!(registry.get("kyb-parent-v1-copy").is_none());
    assert_eq!(registry.latest_by_name("kyb_parent", &scope()).unwrap().definition.id, PARENT_DEFINITION);

    // the same name and version may still be owned by a project
    let mut owned = parent_definition();
    owned.id = "kyb-parent-v1-proj-a".to_string();
    owned.project_id = Some("proj-a".to_string());
    registry.register(owned).await.unwrap();
    assert_eq!(
        registry.latest_by_name("kyb_parent", &scope()).unwrap().definition.id,
        "kyb-parent-v1-proj-a"
    );
    assert_eq!(
        registry
            .latest_by_name("kyb_parent", &ProjectScope::single("proj-b"))
            .unwrap()
            .definition
            .id,
        PARENT_DEFINITION
    );
}
