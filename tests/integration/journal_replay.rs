#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use penumbra::config::StoreConfig;
use penumbra::{
    EngineConfig, FetchHints, Graph, GraphOptions, HistoricalEventsFetchHints, JournalOptions,
    JournalStore, MutationStore, PenumbraError, PropertyValue, Result, StoreRegistry, User,
    Visibility,
};
use tempfile::tempdir;

fn journal_graph(path: &std::path::Path) -> Result<Graph> {
    let store = JournalStore::open(path, JournalOptions::default())?;
    Graph::open(GraphOptions::new(Arc::new(store)))
}

#[test]
fn reopened_journal_reproduces_reads_and_history() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("graph.journal");
    let u = User::anonymous();

    let (before, history_before) = {
        let graph = journal_graph(&path)?;
        let v1 = graph
            .prepare_vertex("v1", Visibility::empty())
            .set_property("k1", "name", "alice", Visibility::empty())
            .save(&u)?;
        graph.prepare_vertex("v2", Visibility::empty()).save(&u)?;
        graph
            .prepare_edge("e1", "v1", "v2", "knows", Visibility::empty())
            .save(&u)?;
        graph
            .alter_element(&v1)
            .set_property("k1", "name", "alicia", Visibility::empty())
            .save(&u)?;
        let history = graph.historical_events(&v1, None, &HistoricalEventsFetchHints::default(), &u)?;
        (graph.vertex("v1", &FetchHints::all(), &u)?, history)
    };

    let graph = journal_graph(&path)?;
    let after = graph.vertex("v1", &FetchHints::all(), &u)?;
    assert_eq!(before, after);
    let element = after.expect("vertex survives reopen");
    assert_eq!(
        element.property_value("name")?,
        Some(&PropertyValue::from("alicia"))
    );
    let v1 = element.location().clone();
    let history_after =
        graph.historical_events(&v1, None, &HistoricalEventsFetchHints::default(), &u)?;
    assert_eq!(history_before, history_after);
    Ok(())
}

#[test]
fn clock_resumes_after_persisted_timestamps() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("clock.journal");
    let far = 40_000_000_000_000u64;
    {
        let graph = journal_graph(&path)?;
        graph
            .prepare_vertex("v1", Visibility::empty())
            .timestamp(far)
            .save(&User::anonymous())?;
    }
    let graph = journal_graph(&path)?;
    assert_eq!(graph.store().max_timestamp(), Some(far));
    let v1 = graph
        .vertex("v1", &FetchHints::none(), &User::anonymous())?
        .expect("vertex");
    graph
        .alter_element(v1.location())
        .mark_hidden(Visibility::empty())
        .save(&User::anonymous())?;
    let hidden = graph
        .vertex("v1", &FetchHints::all_including_hidden(), &User::anonymous())?
        .expect("vertex");
    assert!(hidden.timestamp() > far);
    Ok(())
}

#[test]
fn torn_tail_is_discarded_on_open() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("torn.journal");
    {
        let graph = journal_graph(&path)?;
        graph
            .prepare_vertex("v1", Visibility::empty())
            .save(&User::anonymous())?;
    }
    let intact_len = std::fs::metadata(&path)?.len();
    {
        let mut file = OpenOptions::new().append(true).open(&path)?;
        // frame header promising more bytes than follow
        file.write_all(&[0, 0, 1, 0, 0xde, 0xad, 0xbe, 0xef, 1, 2, 3])?;
    }

    let graph = journal_graph(&path)?;
    assert!(graph
        .vertex("v1", &FetchHints::all(), &User::anonymous())?
        .is_some());
    assert_eq!(std::fs::metadata(&path)?.len(), intact_len);

    graph
        .prepare_vertex("v2", Visibility::empty())
        .save(&User::anonymous())?;
    drop(graph);
    let graph = journal_graph(&path)?;
    assert!(graph
        .vertex("v2", &FetchHints::all(), &User::anonymous())?
        .is_some());
    Ok(())
}

#[test]
fn config_selects_the_journal_store() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("configured.journal");
    let config = EngineConfig {
        store: StoreConfig {
            kind: "journal".into(),
            path: Some(path.clone()),
            sync: false,
        },
        ..EngineConfig::default()
    };
    let registry = StoreRegistry::with_defaults();
    {
        let graph = Graph::from_config(&config, &registry)?;
        graph
            .prepare_vertex("v1", Visibility::empty())
            .save(&User::anonymous())?;
    }
    assert!(path.exists());
    let graph = Graph::from_config(&config, &registry)?;
    assert!(graph
        .vertex("v1", &FetchHints::none(), &User::anonymous())?
        .is_some());

    let unknown = EngineConfig {
        store: StoreConfig {
            kind: "cassandra".into(),
            ..StoreConfig::default()
        },
        ..EngineConfig::default()
    };
    assert!(matches!(
        Graph::from_config(&unknown, &registry),
        Err(PenumbraError::Config(_))
    ));
    Ok(())
}
