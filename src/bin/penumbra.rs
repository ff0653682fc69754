//! Binary entry point for the Penumbra inspection CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use penumbra::{
    Authorizations, Direction, Element, ElementId, ElementLocation, ElementType, EngineConfig,
    FetchHints, Graph, GraphOptions, HistoricalEvent, HistoricalEventId, HistoricalEventKind,
    HistoricalEventsFetchHints, JournalOptions, JournalStore, SortDirection, StoreRegistry,
    Timestamp, User, Visibility,
};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "penumbra",
    version,
    about = "Inspect visibility-gated element history",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "PENUMBRA_CONFIG",
        help = "Engine config (defaults to <config dir>/penumbra/config.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("element").required(true).args(["vertex", "edge"])))]
struct Target {
    #[arg(long, value_name = "FILE", help = "Journal to read instead of the configured store")]
    journal: Option<PathBuf>,

    #[arg(long, value_name = "ID", help = "Vertex id")]
    vertex: Option<String>,

    #[arg(long, value_name = "ID", help = "Edge id")]
    edge: Option<String>,

    #[arg(
        long,
        value_name = "a,b",
        default_value = "",
        help = "Comma-separated authorization tokens"
    )]
    auths: Authorizations,

    #[arg(long, default_value = "cli", help = "User name recorded in logs")]
    user: String,
}

impl Target {
    fn element(&self) -> (ElementType, ElementId) {
        match (&self.vertex, &self.edge) {
            (Some(id), _) => (ElementType::Vertex, ElementId::from(id.as_str())),
            (None, Some(id)) => (ElementType::Edge, ElementId::from(id.as_str())),
            // clap's required group guarantees one of the two
            (None, None) => (ElementType::Vertex, ElementId::from("")),
        }
    }

    fn user(&self) -> User {
        User::new(self.user.clone(), self.auths.clone())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the historical events of one element")]
    History {
        #[command(flatten)]
        target: Target,

        #[arg(long, help = "Newest events first")]
        desc: bool,

        #[arg(long, help = "Maximum events to print")]
        limit: Option<usize>,

        #[arg(long, value_name = "CURSOR", help = "Resume after this event id")]
        after: Option<HistoricalEventId>,

        #[arg(long, value_name = "MS", help = "Inclusive lower timestamp bound")]
        start: Option<Timestamp>,

        #[arg(long, value_name = "MS", help = "Inclusive upper timestamp bound")]
        end: Option<Timestamp>,
    },
    #[command(about = "Print the state of one element at a point in time")]
    Show {
        #[command(flatten)]
        target: Target,

        #[arg(long, value_name = "MS", help = "Materialize as of this timestamp")]
        at: Option<Timestamp>,

        #[arg(long, help = "Include hidden elements and properties")]
        hidden: bool,
    },
    #[command(about = "Evaluate a visibility expression against authorizations")]
    CheckVisibility {
        #[arg(value_name = "EXPR")]
        expression: String,

        #[arg(long, value_name = "a,b", default_value = "")]
        auths: Authorizations,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_env("PENUMBRA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.clone())?;
    match cli.command {
        Command::History {
            target,
            desc,
            limit,
            after,
            start,
            end,
        } => {
            let graph = open_graph(&config, target.journal.as_ref())?;
            let user = target.user();
            let (element_type, id) = target.element();
            let mut hints = HistoricalEventsFetchHints::builder();
            if desc {
                hints = hints.sort_direction(SortDirection::Descending);
            }
            if let Some(limit) = limit.or(config.history.default_limit) {
                hints = hints.limit(limit);
            }
            if let Some(start) = start {
                hints = hints.start_time(start);
            }
            if let Some(end) = end {
                hints = hints.end_time(end);
            }
            let location = locate(&graph, element_type, &id, &user)?;
            let events = graph.historical_events(&location, after.as_ref(), &hints.build(), &user)?;
            match cli.format {
                OutputFormat::Json => {
                    let next = events.last().map(|event| event.id().to_string());
                    let body = json!({ "events": events, "next_cursor": next });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                OutputFormat::Text => {
                    for event in &events {
                        print_event_text(event);
                    }
                }
            }
        }
        Command::Show { target, at, hidden } => {
            let graph = open_graph(&config, target.journal.as_ref())?;
            let user = target.user();
            let (element_type, id) = target.element();
            let hints = if hidden {
                FetchHints::all_including_hidden()
            } else {
                FetchHints::all()
            };
            let element = graph.materialize(element_type, &id, &hints, at, &user)?;
            match (cli.format, element) {
                (OutputFormat::Json, element) => {
                    let body = match element {
                        Some(element) => element_json(&element)?,
                        None => serde_json::Value::Null,
                    };
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                (OutputFormat::Text, Some(element)) => print_element_text(&element)?,
                (OutputFormat::Text, None) => {
                    println!("{element_type} {id} not found");
                    std::process::exit(2);
                }
            }
        }
        Command::CheckVisibility { expression, auths } => {
            let visibility = Visibility::new(expression);
            let readable = penumbra::security::can_read(&visibility, &auths)?;
            match cli.format {
                OutputFormat::Json => println!(
                    "{}",
                    json!({
                        "visibility": visibility,
                        "authorizations": auths.sorted(),
                        "readable": readable,
                    })
                ),
                OutputFormat::Text => println!("{}", if readable { "readable" } else { "denied" }),
            }
        }
    }
    Ok(())
}

fn open_graph(config: &EngineConfig, journal: Option<&PathBuf>) -> penumbra::Result<Graph> {
    let Some(path) = journal else {
        return Graph::from_config(config, &StoreRegistry::with_defaults());
    };
    let store = JournalStore::open(
        path,
        JournalOptions {
            create: false,
            sync: false,
        },
    )?;
    Graph::open(
        GraphOptions::new(Arc::new(store))
            .visibility_cache_capacity(config.visibility.cache_capacity)
            .strict_invariants(config.history.strict_invariants),
    )
}

/// Resolves the element's current location, falling back to a bare one for
/// deleted or unreadable elements.
fn locate(
    graph: &Graph,
    element_type: ElementType,
    id: &ElementId,
    user: &User,
) -> penumbra::Result<ElementLocation> {
    let lookup = FetchHints::builder().include_hidden(true).build();
    Ok(match graph.materialize(element_type, id, &lookup, None, user)? {
        Some(element) => element.location().clone(),
        None => ElementLocation {
            element_type,
            id: id.clone(),
            visibility: Visibility::empty(),
            edge: None,
        },
    })
}

fn format_timestamp(ts: Timestamp) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts) * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
}

fn print_event_text(event: &HistoricalEvent) {
    let mut line = format!(
        "{}  {}  {}",
        event.id(),
        format_timestamp(event.timestamp()),
        event.kind().name()
    );
    if let Some(property) = event.kind().property() {
        line.push_str(&format!(" {}[{}]", property.name, property.key));
    }
    match event.kind() {
        HistoricalEventKind::AddProperty {
            value: Some(value), ..
        } => line.push_str(&format!(" = {value}")),
        HistoricalEventKind::AlterVisibility { previous, visibility } => {
            line.push_str(&format!(" {previous:?} -> {visibility:?}"))
        }
        HistoricalEventKind::AlterEdgeLabel { previous, label } => {
            line.push_str(&format!(" {previous} -> {label}"))
        }
        _ => {}
    }
    println!("{line}");
}

fn print_element_text(element: &Element) -> penumbra::Result<()> {
    println!(
        "{} {} visibility={:?} updated={}{}",
        element.element_type(),
        element.id(),
        element.visibility().as_str(),
        format_timestamp(element.timestamp()),
        if element.is_hidden() { " (hidden)" } else { "" }
    );
    if let Some(edge) = element.edge_endpoints() {
        println!("  {} -[{}]-> {}", edge.out_vertex_id, edge.label, edge.in_vertex_id);
    }
    for property in element.properties()? {
        println!(
            "  {}[{}] = {} visibility={:?}{}",
            property.name(),
            property.key(),
            property.value(),
            property.visibility().as_str(),
            if property.is_hidden() { " (hidden)" } else { "" }
        );
    }
    if element.element_type() == ElementType::Vertex {
        for info in element.edge_infos(Direction::Both)? {
            println!(
                "  {} {} [{}] {}",
                info.direction, info.edge_id, info.label, info.other_vertex_id
            );
        }
    }
    Ok(())
}

fn element_json(element: &Element) -> penumbra::Result<serde_json::Value> {
    let properties: Vec<_> = element
        .properties()?
        .iter()
        .map(|property| {
            json!({
                "key": property.key(),
                "name": property.name(),
                "value": property.value(),
                "visibility": property.visibility(),
                "timestamp": property.timestamp(),
                "hidden": property.is_hidden(),
            })
        })
        .collect();
    let edges = if element.element_type() == ElementType::Vertex {
        element.edge_infos(Direction::Both)?
    } else {
        Vec::new()
    };
    Ok(json!({
        "element_type": element.element_type(),
        "id": element.id(),
        "visibility": element.visibility(),
        "timestamp": element.timestamp(),
        "hidden": element.is_hidden(),
        "edge": element.edge_endpoints(),
        "properties": properties,
        "edges": edges,
        "extended_data_tables": element.extended_data_table_names()?,
    }))
}
