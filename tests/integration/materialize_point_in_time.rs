#![allow(missing_docs)]

use std::sync::Arc;

use penumbra::{
    Authorizations, DeleteMode, Direction, ElementId, ElementLocation, ElementType, FetchHints,
    Graph, GraphOptions, MemoryStore, MetadataEntry, MutationOp, MutationStore, PenumbraError,
    PropertyValue, Result, SecurityError, User, Visibility,
};

fn user(tokens: &[&str]) -> User {
    User::new("reader", Authorizations::new(tokens.iter().copied()))
}

fn age(graph: &Graph, end_time: Option<u64>, reader: &User) -> Result<Option<PropertyValue>> {
    let element = graph
        .materialize(
            ElementType::Vertex,
            &ElementId::from("v1"),
            &FetchHints::all(),
            end_time,
            reader,
        )?
        .expect("vertex exists");
    Ok(element.property_value("age")?.cloned())
}

#[test]
fn point_in_time_reads_follow_the_log() -> Result<()> {
    let graph = Graph::in_memory()?;
    let writer = User::anonymous();
    let v1 = graph
        .prepare_vertex("v1", Visibility::empty())
        .timestamp(1)
        .save(&writer)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "age", 30i64, Visibility::empty())
        .timestamp(2)
        .save(&writer)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "age", 31i64, Visibility::empty())
        .timestamp(3)
        .save(&writer)?;

    assert_eq!(age(&graph, Some(2), &writer)?, Some(PropertyValue::Int(30)));
    assert_eq!(age(&graph, Some(3), &writer)?, Some(PropertyValue::Int(31)));
    assert_eq!(age(&graph, None, &writer)?, Some(PropertyValue::Int(31)));
    assert!(graph
        .materialize(ElementType::Vertex, &ElementId::from("v1"), &FetchHints::all(), Some(0), &writer)?
        .is_none());
    Ok(())
}

#[test]
fn unreadable_mutations_leave_no_trace() -> Result<()> {
    let graph = Graph::in_memory()?;
    let admin = user(&["secret"]);
    let v1 = graph.prepare_vertex("v1", Visibility::empty()).save(&admin)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "age", 30i64, Visibility::new("secret"))
        .save(&admin)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "age", 31i64, Visibility::empty())
        .save(&admin)?;

    let public = User::anonymous();
    let element = graph.vertex("v1", &FetchHints::all(), &public)?.expect("vertex");
    let ages: Vec<_> = element
        .properties_named("age")?
        .map(|p| p.value().clone())
        .collect();
    assert_eq!(ages, vec![PropertyValue::Int(31)]);

    let cleared = graph.vertex("v1", &FetchHints::all(), &admin)?.expect("vertex");
    assert_eq!(cleared.properties_named("age")?.count(), 2);
    Ok(())
}

#[test]
fn element_visibility_gates_the_whole_element() -> Result<()> {
    let graph = Graph::in_memory()?;
    let admin = user(&["a", "b"]);
    graph
        .prepare_vertex("v1", Visibility::new("a&b"))
        .set_property("k1", "name", "x", Visibility::empty())
        .save(&admin)?;
    assert!(graph.vertex("v1", &FetchHints::all(), &user(&["a"]))?.is_none());
    assert!(graph.vertex("v1", &FetchHints::all(), &admin)?.is_some());
    Ok(())
}

#[test]
fn hide_then_unhide_restores_the_element() -> Result<()> {
    let graph = Graph::in_memory()?;
    let ops = user(&["ops"]);
    let v1 = graph.prepare_vertex("v1", Visibility::empty()).save(&ops)?;
    graph
        .alter_element(&v1)
        .mark_hidden(Visibility::new("ops"))
        .save(&ops)?;

    assert!(graph.vertex("v1", &FetchHints::all(), &ops)?.is_none());
    let hidden = graph
        .vertex("v1", &FetchHints::all_including_hidden(), &ops)?
        .expect("hidden vertex with include_hidden");
    assert!(hidden.is_hidden());
    assert_eq!(hidden.hidden_visibilities(), &[Visibility::new("ops")]);
    // readers who cannot see the marker are unaffected
    assert!(graph.vertex("v1", &FetchHints::all(), &User::anonymous())?.is_some());

    graph
        .alter_element(&v1)
        .mark_visible(Visibility::new("ops"))
        .save(&ops)?;
    let restored = graph.vertex("v1", &FetchHints::all(), &ops)?.expect("visible again");
    assert!(!restored.is_hidden());
    Ok(())
}

#[test]
fn hidden_properties_need_include_hidden() -> Result<()> {
    let graph = Graph::in_memory()?;
    let u = User::anonymous();
    let v1 = graph
        .prepare_vertex("v1", Visibility::empty())
        .set_property("k1", "name", "alice", Visibility::empty())
        .save(&u)?;
    graph
        .alter_element(&v1)
        .mark_property_hidden("k1", "name", Visibility::empty(), Visibility::empty())
        .save(&u)?;
    let plain = graph.vertex("v1", &FetchHints::all(), &u)?.expect("vertex");
    assert!(plain.property("name")?.is_none());
    let full = graph
        .vertex("v1", &FetchHints::all_including_hidden(), &u)?
        .expect("vertex");
    assert!(full.property("name")?.expect("hidden property").is_hidden());
    Ok(())
}

#[test]
fn accessors_outside_fetch_hints_fail() -> Result<()> {
    let graph = Graph::in_memory()?;
    let u = User::anonymous();
    graph
        .prepare_vertex("v1", Visibility::empty())
        .set_property("k1", "name", "alice", Visibility::empty())
        .save(&u)?;
    let bare = graph.vertex("v1", &FetchHints::none(), &u)?.expect("vertex");
    assert!(matches!(bare.properties(), Err(PenumbraError::MissingFetchHint(_))));
    assert!(matches!(
        bare.edge_infos(Direction::Out),
        Err(PenumbraError::MissingFetchHint(_))
    ));
    assert!(matches!(
        bare.edge_label_counts(Direction::Both),
        Err(PenumbraError::MissingFetchHint(_))
    ));
    assert!(matches!(
        bare.extended_data_table_names(),
        Err(PenumbraError::MissingFetchHint(_))
    ));

    let names_only = FetchHints::builder().property_names(["age"]).build();
    let partial = graph.vertex("v1", &names_only, &u)?.expect("vertex");
    assert!(matches!(
        partial.property("name"),
        Err(PenumbraError::MissingFetchHint(_))
    ));
    Ok(())
}

#[test]
fn metadata_follows_its_own_visibility() -> Result<()> {
    let graph = Graph::in_memory()?;
    let admin = user(&["audit"]);
    graph
        .prepare_vertex("v1", Visibility::empty())
        .set_property_with_metadata(
            "k1",
            "name",
            "alice",
            Visibility::empty(),
            vec![
                MetadataEntry::new("source", "census", Visibility::empty()),
                MetadataEntry::new("confidence", 0.4f64, Visibility::new("audit")),
            ],
        )
        .save(&admin)?;
    let public = graph
        .vertex("v1", &FetchHints::properties_and_metadata(), &User::anonymous())?
        .expect("vertex");
    let name = public.property("name")?.expect("name");
    assert!(name.metadata_entry("source")?.is_some());
    assert!(name.metadata_entry("confidence")?.is_none());

    let audited = graph
        .vertex("v1", &FetchHints::properties_and_metadata(), &admin)?
        .expect("vertex");
    let name = audited.property("name")?.expect("name");
    assert_eq!(name.metadata()?.entries().len(), 2);
    Ok(())
}

#[test]
fn replay_is_deterministic() -> Result<()> {
    let graph = Graph::in_memory()?;
    let u = user(&["a"]);
    graph
        .prepare_vertex("v1", Visibility::empty())
        .set_property("k1", "b", 1i64, Visibility::new("a"))
        .set_property("k1", "a", 2i64, Visibility::empty())
        .set_extended_data("notes", "r1", "text", "hello", Visibility::empty())
        .save(&u)?;
    graph.prepare_vertex("v2", Visibility::empty()).save(&u)?;
    graph
        .prepare_edge("e1", "v1", "v2", "knows", Visibility::empty())
        .save(&u)?;
    let first = graph.vertex("v1", &FetchHints::all(), &u)?;
    let second = graph.vertex("v1", &FetchHints::all(), &u)?;
    assert_eq!(first, second);
    let first = first.expect("vertex");
    let names: Vec<_> = first.properties()?.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(
        first.extended_data_table_names()?.iter().collect::<Vec<_>>(),
        vec!["notes"]
    );
    assert_eq!(first.edge_label_counts(Direction::Out)?.get("knows"), Some(&1));
    Ok(())
}

#[test]
fn recreate_after_delete_starts_clean() -> Result<()> {
    let graph = Graph::in_memory()?;
    let u = User::anonymous();
    let v1 = graph
        .prepare_vertex("v1", Visibility::empty())
        .set_property("k1", "name", "old", Visibility::empty())
        .save(&u)?;
    graph.delete_element(&v1, DeleteMode::Soft, &u)?;
    assert!(graph.vertex("v1", &FetchHints::all(), &u)?.is_none());

    graph.prepare_vertex("v1", Visibility::empty()).save(&u)?;
    let reborn = graph.vertex("v1", &FetchHints::all(), &u)?.expect("re-created");
    assert!(reborn.properties()?.is_empty());
    Ok(())
}

#[test]
fn writes_after_delete_are_an_invariant_violation() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let loc = ElementLocation::vertex("v1", Visibility::empty());
    store.append_mutations(
        &loc,
        vec![MutationOp::UpdateVertex {
            visibility: Visibility::empty(),
        }],
        1,
    )?;
    store.append_mutations(
        &loc,
        vec![MutationOp::Delete {
            mode: DeleteMode::Hard,
            visibility: Visibility::empty(),
        }],
        2,
    )?;
    store.append_mutations(
        &loc,
        vec![MutationOp::MarkHidden {
            visibility: Visibility::empty(),
        }],
        3,
    )?;

    let strict = Graph::open(GraphOptions::new(store.clone()))?;
    let err = strict
        .vertex("v1", &FetchHints::all(), &User::anonymous())
        .unwrap_err();
    assert!(matches!(err, PenumbraError::InvariantViolation { .. }));

    let lenient = Graph::open(GraphOptions::new(store).strict_invariants(false))?;
    assert!(lenient
        .vertex("v1", &FetchHints::all(), &User::anonymous())?
        .is_none());
    Ok(())
}

#[test]
fn writer_rules() -> Result<()> {
    let graph = Graph::in_memory()?;
    let limited = user(&["a"]);
    let err = graph
        .prepare_vertex("v1", Visibility::empty())
        .set_property("k1", "name", "x", Visibility::new("b"))
        .save(&limited)
        .unwrap_err();
    assert!(matches!(
        err,
        PenumbraError::Security(SecurityError::UnauthorizedWrite { .. })
    ));

    let permissive = Graph::open(
        GraphOptions::new(Arc::new(MemoryStore::new())).enforce_write_visibility(false),
    )?;
    permissive
        .prepare_vertex("v1", Visibility::empty())
        .set_property("k1", "name", "x", Visibility::new("b"))
        .save(&limited)?;

    let err = graph
        .alter_element(&ElementLocation::vertex("missing", Visibility::empty()))
        .set_property("k1", "name", "x", Visibility::empty())
        .save(&limited)
        .unwrap_err();
    assert!(matches!(err, PenumbraError::NotFound(_)));
    Ok(())
}

#[test]
fn edge_visibility_change_moves_projections() -> Result<()> {
    let graph = Graph::in_memory()?;
    let admin = user(&["x"]);
    graph.prepare_vertex("v1", Visibility::empty()).save(&admin)?;
    graph.prepare_vertex("v2", Visibility::empty()).save(&admin)?;
    let e1 = graph
        .prepare_edge("e1", "v1", "v2", "knows", Visibility::empty())
        .save(&admin)?;
    graph
        .alter_element(&e1)
        .alter_visibility(Visibility::new("x"))
        .save(&admin)?;

    let public = User::anonymous();
    let v1 = graph.vertex("v1", &FetchHints::edge_refs(), &public)?.expect("v1");
    assert!(v1.edge_ids(Direction::Out)?.is_empty());
    assert!(graph.edge("e1", &FetchHints::none(), &public)?.is_none());

    let v1 = graph.vertex("v1", &FetchHints::edge_refs(), &admin)?.expect("v1");
    let infos = v1.edge_infos(Direction::Out)?;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].visibility, Visibility::new("x"));
    Ok(())
}
