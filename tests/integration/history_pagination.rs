#![allow(missing_docs)]

use std::sync::Arc;

use penumbra::{
    Authorizations, ElementLocation, Graph, GraphOptions, HistoricalEvent, HistoricalEventId,
    HistoricalEventKind, HistoricalEventsFetchHints, MemoryStore, MutationOp, MutationStore,
    PenumbraError, PropertyValue, Result, SnapshotMarkers, SortDirection, User, Visibility,
};

fn names(events: &[HistoricalEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind().name()).collect()
}

fn all_events(
    graph: &Graph,
    location: &ElementLocation,
    hints: &HistoricalEventsFetchHints,
    reader: &User,
) -> Result<Vec<HistoricalEvent>> {
    graph.historical_events(location, None, hints, reader)
}

/// Seeds v1 with a creation plus `updates` property writes, one per timestamp.
fn seeded(updates: i64) -> Result<(Graph, ElementLocation)> {
    let graph = Graph::in_memory()?;
    let u = User::anonymous();
    let v1 = graph
        .prepare_vertex("v1", Visibility::empty())
        .timestamp(1)
        .save(&u)?;
    for n in 0..updates {
        graph
            .alter_element(&v1)
            .set_property("k1", "age", 30 + n, Visibility::empty())
            .timestamp(2 + n as u64)
            .save(&u)?;
    }
    Ok((graph, v1))
}

#[test]
fn end_to_end_history_carries_previous_values() -> Result<()> {
    let (graph, v1) = seeded(2)?;
    let events = all_events(
        &graph,
        &v1,
        &HistoricalEventsFetchHints::default(),
        &User::anonymous(),
    )?;
    assert_eq!(names(&events), vec!["add_vertex", "add_property", "add_property"]);
    assert_eq!(events[2].timestamp(), 3);
    assert_eq!(events[2].value()?, Some(&PropertyValue::Int(31)));
    assert_eq!(events[2].previous_value()?, Some(&PropertyValue::Int(30)));
    assert_eq!(events[1].previous_value()?, None);
    Ok(())
}

#[test]
fn value_accessors_require_their_hints() -> Result<()> {
    let (graph, v1) = seeded(1)?;
    let hints = HistoricalEventsFetchHints::builder()
        .include_property_values(false)
        .include_previous_property_values(false)
        .build();
    let events = all_events(&graph, &v1, &hints, &User::anonymous())?;
    assert!(matches!(events[1].value(), Err(PenumbraError::MissingFetchHint(_))));
    assert!(matches!(
        events[1].previous_value(),
        Err(PenumbraError::MissingFetchHint(_))
    ));
    Ok(())
}

#[test]
fn ascending_pages_concatenate_to_the_full_stream() -> Result<()> {
    let (graph, v1) = seeded(9)?;
    let u = User::anonymous();
    let full = all_events(&graph, &v1, &HistoricalEventsFetchHints::default(), &u)?;
    assert_eq!(full.len(), 10);

    let page_hints = HistoricalEventsFetchHints::builder().limit(3).build();
    let mut paged = Vec::new();
    let mut cursor: Option<HistoricalEventId> = None;
    loop {
        let page = graph.historical_events(&v1, cursor.as_ref(), &page_hints, &u)?;
        if page.is_empty() {
            break;
        }
        for event in &page {
            if let Some(last) = &cursor {
                assert!(event.id() > last);
            }
        }
        cursor = page.last().map(|e| e.id().clone());
        paged.extend(page);
    }
    assert_eq!(paged, full);
    Ok(())
}

#[test]
fn descending_pages_walk_backwards() -> Result<()> {
    let (graph, v1) = seeded(4)?;
    let u = User::anonymous();
    let hints = HistoricalEventsFetchHints::builder()
        .sort_direction(SortDirection::Descending)
        .limit(2)
        .build();
    let first = graph.historical_events(&v1, None, &hints, &u)?;
    let stamps: Vec<_> = first.iter().map(HistoricalEvent::timestamp).collect();
    assert_eq!(stamps, vec![5, 4]);
    let second = graph.historical_events(&v1, Some(first[1].id()), &hints, &u)?;
    let stamps: Vec<_> = second.iter().map(HistoricalEvent::timestamp).collect();
    assert_eq!(stamps, vec![3, 2]);
    Ok(())
}

#[test]
fn cursor_survives_text_round_trip() -> Result<()> {
    let (graph, v1) = seeded(3)?;
    let u = User::anonymous();
    let hints = HistoricalEventsFetchHints::builder().limit(2).build();
    let first = graph.historical_events(&v1, None, &hints, &u)?;
    let text = first[1].id().to_string();
    assert_eq!(text, "2:v:v1:0");
    let cursor: HistoricalEventId = text.parse()?;
    let next = graph.historical_events(&v1, Some(&cursor), &hints, &u)?;
    assert_eq!(next[0].timestamp(), 3);
    assert!("2:x:v1:0".parse::<HistoricalEventId>().is_err());
    Ok(())
}

#[test]
fn time_window_is_inclusive() -> Result<()> {
    let (graph, v1) = seeded(4)?;
    let hints = HistoricalEventsFetchHints::builder()
        .start_time(2)
        .end_time(3)
        .build();
    let events = all_events(&graph, &v1, &hints, &User::anonymous())?;
    let stamps: Vec<_> = events.iter().map(HistoricalEvent::timestamp).collect();
    assert_eq!(stamps, vec![2, 3]);
    Ok(())
}

#[test]
fn unreadable_mutations_never_become_events() -> Result<()> {
    let graph = Graph::in_memory()?;
    let admin = User::new("admin", Authorizations::new(["secret"]));
    let v1 = graph.prepare_vertex("v1", Visibility::empty()).save(&admin)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "age", 30i64, Visibility::new("secret"))
        .save(&admin)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "age", 31i64, Visibility::empty())
        .save(&admin)?;

    let events = all_events(
        &graph,
        &v1,
        &HistoricalEventsFetchHints::default(),
        &User::anonymous(),
    )?;
    assert_eq!(names(&events), vec!["add_vertex", "add_property"]);
    assert_eq!(events[1].value()?, Some(&PropertyValue::Int(31)));
    // the secret write sits at a different (key, name, visibility)
    assert_eq!(events[1].previous_value()?, None);

    let full = all_events(&graph, &v1, &HistoricalEventsFetchHints::default(), &admin)?;
    assert_eq!(full.len(), 3);
    Ok(())
}

#[test]
fn hide_and_unhide_both_appear_in_order() -> Result<()> {
    let graph = Graph::in_memory()?;
    let ops = User::new("ops", Authorizations::new(["ops"]));
    let v1 = graph.prepare_vertex("v1", Visibility::empty()).save(&ops)?;
    graph
        .alter_element(&v1)
        .mark_hidden(Visibility::new("ops"))
        .save(&ops)?;
    graph
        .alter_element(&v1)
        .mark_visible(Visibility::new("ops"))
        .save(&ops)?;
    let events = all_events(&graph, &v1, &HistoricalEventsFetchHints::default(), &ops)?;
    assert_eq!(names(&events), vec!["add_vertex", "mark_hidden", "mark_visible"]);
    let public = all_events(
        &graph,
        &v1,
        &HistoricalEventsFetchHints::default(),
        &User::anonymous(),
    )?;
    assert_eq!(names(&public), vec!["add_vertex"]);
    Ok(())
}

#[test]
fn repeated_snapshots_collapse() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let v1 = ElementLocation::vertex("v1", Visibility::empty());
    let snapshot = |vis: &str| MutationOp::UpdateVertex {
        visibility: Visibility::new(vis),
    };
    store.append_mutations(&v1, vec![snapshot("")], 1)?;
    store.append_mutations(&v1, vec![snapshot("")], 2)?;
    store.append_mutations(&v1, vec![snapshot("a")], 3)?;
    let graph = Graph::open(GraphOptions::new(store))?;
    let reader = User::new("r", Authorizations::new(["a"]));
    let events = all_events(&graph, &v1, &HistoricalEventsFetchHints::default(), &reader)?;
    let stamps: Vec<_> = events.iter().map(HistoricalEvent::timestamp).collect();
    assert_eq!(stamps, vec![1, 3]);
    assert!(events
        .iter()
        .all(|e| matches!(e.kind(), HistoricalEventKind::AddVertex { .. })));
    Ok(())
}

#[test]
fn every_batch_markers_do_not_add_events() -> Result<()> {
    let graph = Graph::open(
        GraphOptions::new(Arc::new(MemoryStore::new()))
            .snapshot_markers(SnapshotMarkers::EveryBatch),
    )?;
    let u = User::new("w", Authorizations::new(["a"]));
    let v1 = graph.prepare_vertex("v1", Visibility::empty()).save(&u)?;
    for n in 0..3i64 {
        graph
            .alter_element(&v1)
            .set_property("k1", "n", n, Visibility::empty())
            .save(&u)?;
    }
    let v1 = graph
        .alter_element(&v1)
        .alter_visibility(Visibility::new("a"))
        .save(&u)?;
    graph
        .alter_element(&v1)
        .set_property("k1", "n", 9i64, Visibility::empty())
        .save(&u)?;

    let events = all_events(&graph, &v1, &HistoricalEventsFetchHints::default(), &u)?;
    assert_eq!(
        names(&events),
        vec![
            "add_vertex",
            "add_property",
            "add_property",
            "add_property",
            "alter_visibility",
            "add_property",
        ]
    );
    Ok(())
}

#[test]
fn edge_history_tracks_label_changes() -> Result<()> {
    let graph = Graph::in_memory()?;
    let u = User::anonymous();
    graph.prepare_vertex("v1", Visibility::empty()).save(&u)?;
    graph.prepare_vertex("v2", Visibility::empty()).save(&u)?;
    let e1 = graph
        .prepare_edge("e1", "v1", "v2", "knows", Visibility::empty())
        .save(&u)?;
    let e1 = graph.alter_element(&e1).alter_edge_label("likes").save(&u)?;
    graph.delete_element(&e1, penumbra::DeleteMode::Hard, &u)?;

    let events = all_events(&graph, &e1, &HistoricalEventsFetchHints::default(), &u)?;
    assert_eq!(names(&events), vec!["add_edge", "alter_edge_label", "delete_edge"]);
    match events[2].kind() {
        HistoricalEventKind::DeleteEdge { label, .. } => assert_eq!(label, "likes"),
        other => panic!("unexpected {other:?}"),
    }

    let v1 = ElementLocation::vertex("v1", Visibility::empty());
    let projections = all_events(&graph, &v1, &HistoricalEventsFetchHints::default(), &u)?;
    assert_eq!(
        names(&projections),
        vec![
            "add_vertex",
            "add_edge_to_vertex",
            "delete_edge_to_vertex",
            "add_edge_to_vertex",
            "delete_edge_to_vertex",
        ]
    );
    Ok(())
}
