// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutation reconciler against the in-memory store.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::{json, Value};
use treeview_core::{
    build, Actor, BuildContext, Effect, Filter, KeyKind, MemoryRowStore, Mutation,
    MutationCommand, ParentRef, ReconcileError, Reconciler, Role, Row, RowKey, RowStore,
    ViewConfig, ViewDefinition,
};
use treeview_dry_tests::{
    outline_config, outline_view, projects_schema, task, task_store, tasks_schema,
    RecordingStore, ScriptedEvaluator, StoreCall, TASKS,
};

fn admin() -> Actor {
    Actor::user(1, Role::ADMIN)
}

fn seeded() -> RecordingStore<MemoryRowStore> {
    RecordingStore::new(task_store(vec![
        task(1, None, "A"),
        task(2, Some(1), "B"),
        task(3, Some(2), "C"),
    ]))
}

fn reparent(id: i64, parent: ParentRef) -> MutationCommand {
    MutationCommand::Reparent {
        id: RowKey::Int(id),
        parent,
    }
}

fn row(store: &RecordingStore<MemoryRowStore>, id: i64) -> Row {
    store.inner().get_row(TASKS, &RowKey::Int(id)).unwrap().unwrap()
}

#[test]
fn read_only_fails_before_touching_the_store() {
    let store = seeded();
    let eval = ScriptedEvaluator::new();
    let mut config = outline_config();
    config.read_only = true;
    let view = outline_view(config);

    let err = Reconciler::new(&view, &store, &eval)
        .reconcile(&MutationCommand::Delete { id: RowKey::Int(1) }, &admin())
        .unwrap_err();

    assert_eq!(err, ReconcileError::ReadOnly);
    assert_eq!(err.to_string(), "Read only mode");
    assert!(store.calls().is_empty());
}

#[test]
fn weak_role_without_ownership_is_not_authorized() {
    let store = seeded();
    let eval = ScriptedEvaluator::new();
    let view = outline_view(outline_config());

    let err = Reconciler::new(&view, &store, &eval)
        .reconcile(&reparent(2, ParentRef::Root), &Actor::public(Role::PUBLIC))
        .unwrap_err();

    assert_eq!(err, ReconcileError::NotAuthorized);
    assert!(store.calls().is_empty());
}

#[test]
fn ownership_lets_owners_write_and_store_rejects_others() {
    let mut schema = tasks_schema();
    schema.ownership_field = Some("owner".into());
    let store = MemoryRowStore::new().with_table(
        schema.clone(),
        vec![
            task(1, None, "mine").with("owner", 7),
            task(2, None, "theirs").with("owner", 8),
        ],
    );
    let eval = ScriptedEvaluator::new();
    let view = ViewDefinition::new("outline", outline_config(), schema).unwrap();
    let reconciler = Reconciler::new(&view, &store, &eval);
    let user = Actor::user(7, Role::USER);

    let rename = |id: i64| MutationCommand::Rename {
        id: RowKey::Int(id),
        topic: "renamed".into(),
    };
    assert_eq!(
        reconciler.reconcile(&rename(1), &user),
        Ok(Effect::Updated { id: RowKey::Int(1) })
    );
    assert_eq!(
        reconciler.reconcile(&rename(2), &user),
        Err(ReconcileError::NotAuthorized)
    );
}

#[test]
fn both_root_forms_write_a_null_parent() {
    let eval = ScriptedEvaluator::new();
    let view = outline_view(outline_config());
    for parent in [ParentRef::Root, ParentRef::Omitted] {
        let store = seeded();
        let reconciler = Reconciler::new(&view, &store, &eval);
        assert_eq!(
            reconciler.plan(&reparent(3, parent.clone()), &admin()).unwrap(),
            Mutation::Update {
                key: RowKey::Int(3),
                delta: Row::new().with("parent", Value::Null),
            }
        );
        reconciler.reconcile(&reparent(3, parent), &admin()).unwrap();
        assert_eq!(row(&store, 3).get("parent"), Some(&Value::Null));
        assert_eq!(store.writes().len(), 1);
    }
}

#[test]
fn reparent_onto_itself_is_rejected() {
    let store = seeded();
    let eval = ScriptedEvaluator::new();
    let view = outline_view(outline_config());

    let err = Reconciler::new(&view, &store, &eval)
        .reconcile(&reparent(2, ParentRef::Key(RowKey::Int(2))), &admin())
        .unwrap_err();

    assert_eq!(err.kind(), "validation");
    assert!(store.writes().is_empty());
}

#[test]
fn reorder_on_numeric_field_sets_both_fields_in_one_update() {
    let store = seeded();
    let eval = ScriptedEvaluator::new();
    let mut config = outline_config();
    config.order_field = Some("position".into());
    let view = outline_view(config);

    let cmd = MutationCommand::from_route(
        "drag_drop",
        &json!({"id": "3", "parent_id": "1", "order_number": 4}),
        KeyKind::Integer,
    )
    .unwrap();
    Reconciler::new(&view, &store, &eval)
        .reconcile(&cmd, &admin())
        .unwrap();

    assert_eq!(
        store.writes(),
        vec![StoreCall::Update {
            table: TASKS.into(),
            key: RowKey::Int(3),
            delta: Row::new().with("parent", 1).with("position", 4),
        }]
    );
}

#[test]
fn reorder_on_text_field_only_reparents() {
    let store = seeded();
    let eval = ScriptedEvaluator::new();
    let mut config = outline_config();
    config.order_field = Some("rank".into());
    let view = outline_view(config);

    let cmd = MutationCommand::ReorderAndReparent {
        id: RowKey::Int(3),
        parent: ParentRef::Key(RowKey::Int(1)),
        order: json!(2),
    };
    let plan = Reconciler::new(&view, &store, &eval)
        .plan(&cmd, &admin())
        .unwrap();

    assert_eq!(
        plan,
        Mutation::Update {
            key: RowKey::Int(3),
            delta: Row::new().with("parent", 1),
        }
    );
}

#[test]
fn non_numeric_order_on_integer_field_is_validation() {
    let store = seeded();
    let eval = ScriptedEvaluator::new();
    let mut config = outline_config();
    config.order_field = Some("position".into());
    let view = outline_view(config);

    let cmd = MutationCommand::ReorderAndReparent {
        id: RowKey::Int(3),
        parent: ParentRef::Omitted,
        order: json!("soon"),
    };
    let err = Reconciler::new(&view, &store, &eval)
        .reconcile(&cmd, &admin())
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Validation(_)));
    assert!(store.writes().is_empty());
}

#[test]
fn delete_leaves_children_dangling_and_rebuild_promotes_them() {
    let store = seeded();
    let eval = ScriptedEvaluator::new();
    let view = outline_view(outline_config());

    let effect = Reconciler::new(&view, &store, &eval)
        .reconcile(&MutationCommand::Delete { id: RowKey::Int(2) }, &admin())
        .unwrap();
    assert_eq!(effect, Effect::Deleted { id: RowKey::Int(2) });
    assert_eq!(
        store.writes(),
        vec![StoreCall::Delete {
            table: TASKS.into(),
            filter: Filter::key("id", &RowKey::Int(2)),
        }]
    );
    assert_eq!(row(&store, 3).get("parent"), Some(&json!(2)));

    let rows = store.inner().rows(TASKS).unwrap();
    let actor = admin();
    let forest = build(&rows, &view.linkage, &[], &BuildContext::new(&eval, &actor));
    let roots: Vec<_> = forest.roots.iter().map(|n| n.id.clone()).collect();
    assert_eq!(roots, vec![RowKey::Int(1), RowKey::Int(3)]);
}

#[test]
fn add_child_title_and_parent_override_formula_output() {
    let store = seeded();
    let eval = ScriptedEvaluator::new().with(
        "defaults",
        json!({"title": "from formula", "parent": 3, "rank": "b", "done": false}),
    );
    let mut config = outline_config();
    config.field_values_formula = Some("defaults".into());
    let view = outline_view(config);

    let effect = Reconciler::new(&view, &store, &eval)
        .reconcile(
            &MutationCommand::AddChild {
                topic: "New".into(),
                parent: ParentRef::Key(RowKey::Int(1)),
                root_value: None,
            },
            &admin(),
        )
        .unwrap();

    assert_eq!(
        effect,
        Effect::Inserted {
            id: RowKey::Int(4),
            title: "New".into()
        }
    );
    let inserted = row(&store, 4);
    assert_eq!(inserted.get("title"), Some(&json!("New")));
    assert_eq!(inserted.get("parent"), Some(&json!(1)));
    assert_eq!(inserted.get("rank"), Some(&json!("b")));
    let reads: Vec<_> = store
        .calls()
        .into_iter()
        .filter(|c| matches!(c, StoreCall::GetRow(..)))
        .collect();
    assert_eq!(reads, vec![StoreCall::GetRow(TASKS.into(), RowKey::Int(1))]);
}

#[test]
fn add_child_with_missing_parent_is_not_found() {
    let store = seeded();
    let eval = ScriptedEvaluator::new().with("defaults", json!({}));
    let mut config = outline_config();
    config.field_values_formula = Some("defaults".into());
    let view = outline_view(config);

    let err = Reconciler::new(&view, &store, &eval)
        .reconcile(
            &MutationCommand::AddChild {
                topic: "New".into(),
                parent: ParentRef::Key(RowKey::Int(42)),
                root_value: None,
            },
            &admin(),
        )
        .unwrap_err();

    assert_eq!(err.kind(), "not_found");
    assert!(store.writes().is_empty());
}

#[test]
fn add_child_fills_root_relation_unless_formula_set_it() {
    let schema = tasks_schema();
    let store = MemoryRowStore::new()
        .with_table(
            projects_schema(),
            vec![
                Row::new().with("id", 1).with("name", "P1"),
                Row::new().with("id", 2).with("name", "P2"),
            ],
        )
        .with_table(schema.clone(), Vec::new());
    let mut config = ViewConfig::new("title", "parent");
    config.root_relation_field = Some("project".into());
    config.field_values_formula = Some("defaults".into());
    let view = ViewDefinition::new("outline", config, schema).unwrap();
    let add = |root: &str| MutationCommand::AddChild {
        topic: "T".into(),
        parent: ParentRef::Root,
        root_value: Some(json!(root)),
    };

    let plain = ScriptedEvaluator::new().with("defaults", json!({"project": null}));
    let effect = Reconciler::new(&view, &store, &plain)
        .reconcile(&add("1"), &admin())
        .unwrap();
    let Effect::Inserted { id, .. } = effect else {
        panic!("expected insert, got {effect:?}");
    };
    let row = store.get_row(TASKS, &id).unwrap().unwrap();
    assert_eq!(row.get("project"), Some(&json!(1)));
    assert_eq!(row.get("parent"), Some(&Value::Null));

    let preset = ScriptedEvaluator::new().with("defaults", json!({"project": 2}));
    let planned = Reconciler::new(&view, &store, &preset)
        .plan(&add("1"), &admin())
        .unwrap();
    let Mutation::Insert { values, .. } = planned else {
        panic!("expected insert plan");
    };
    assert_eq!(values.get("project"), Some(&json!(2)));
}

#[test]
fn store_faults_map_to_store_kind() {
    let store = seeded();
    store.set_fail_writes(true);
    let eval = ScriptedEvaluator::new();
    let view = outline_view(outline_config());

    let err = Reconciler::new(&view, &store, &eval)
        .reconcile(&reparent(3, ParentRef::Root), &admin())
        .unwrap_err();

    assert_eq!(err.kind(), "store");
    assert_eq!(store.writes().len(), 1);
}

#[test]
fn rename_writes_title_only() {
    let store = seeded();
    let eval = ScriptedEvaluator::new();
    let view = outline_view(outline_config());

    let cmd =
        MutationCommand::from_route("edit_node", &json!({"id": 2, "topic": "Bee"}), KeyKind::Integer)
            .unwrap();
    Reconciler::new(&view, &store, &eval)
        .reconcile(&cmd, &admin())
        .unwrap();

    let renamed = row(&store, 2);
    assert_eq!(renamed.get("title"), Some(&json!("Bee")));
    assert_eq!(renamed.get("parent"), Some(&json!(1)));
}
