// crates/dagcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dagcore::{ExecutionEvent, GraphDefinition, NodeDefinition, NodeEvent};
use dagnodes::ReqwestClient;
use dagruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dag")]
#[command(about = "API DAG engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph definition file
    Run {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Abort the run after this many seconds
        #[arg(short, long)]
        timeout_secs: Option<u64>,

        /// Print the provenance chain of this node after the run
        #[arg(short, long)]
        provenance: Option<String>,

        /// Header sent with every HTTP request, as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a graph definition file and print its layers
    Validate {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create an example graph definition
    Init {
        /// Output file path
        #[arg(short, long, default_value = "graph.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            timeout_secs,
            provenance,
            headers,
            ..
        } => {
            run_graph(&file, timeout_secs, provenance, &headers).await?;
        }

        Commands::Validate { file } => {
            validate_graph(&file)?;
        }

        Commands::Nodes => {
            list_nodes()?;
        }

        Commands::Init { output } => {
            create_example_graph(&output)?;
        }
    }

    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected `Name: value`, got '{}'", raw)),
    }
}

fn standard_registry(headers: &[(String, String)]) -> Result<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    if headers.is_empty() {
        dagnodes::register_all(&mut registry);
    } else {
        let client = headers
            .iter()
            .fold(ReqwestClient::builder(), |builder, (name, value)| {
                builder.default_header(name.as_str(), value.as_str())
            })
            .build()?;
        dagnodes::register_all_with_client(&mut registry, Arc::new(client));
    }
    Ok(registry)
}

fn load_definition(file: &Path) -> Result<GraphDefinition> {
    tracing::debug!(file = %file.display(), "Reading graph definition");
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))
}

async fn run_graph(
    file: &Path,
    timeout_secs: Option<u64>,
    provenance: Option<String>,
    headers: &[(String, String)],
) -> Result<()> {
    println!("🚀 Loading graph from: {}", file.display());
    let definition = load_definition(file)?;

    println!("📋 Graph: {}", definition.name);
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Edges: {}", definition.edges.len());
    println!();

    let mut config = RuntimeConfig::default();
    if let Some(secs) = timeout_secs {
        config = config.with_max_execution_time(Duration::from_secs(secs));
    }
    let runtime = FlowRuntime::with_registry(standard_registry(headers)?, config);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let graph = runtime.load(&definition)?;
    let executor = runtime.executor(graph);
    let result = executor.execute().await?;

    let chain = match &provenance {
        Some(node_id) => Some(executor.get_provenance(node_id).await?),
        None => None,
    };

    // Closing every sender ends the listener once it has drained
    drop(executor);
    drop(runtime);
    let _ = event_task.await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!(
        "   Succeeded: {}/{} nodes ({} failed)",
        result.succeeded_nodes(),
        result.total_nodes(),
        result.failed_nodes()
    );
    println!();
    println!("📤 Records:");
    println!("{}", serde_json::to_string_pretty(&result.records)?);

    if let (Some(node_id), Some(chain)) = (provenance, chain) {
        println!();
        println!("🧾 Provenance of {}:", node_id);
        for (id, record) in &chain {
            println!("   {} [{}]", id, record.status);
            println!("     Inputs:  {}", serde_json::to_string(&record.inputs.flat())?);
            println!("     Outputs: {}", serde_json::to_string(&record.outputs)?);
        }
    }

    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { graph, .. } => {
            println!("▶️  Run of '{}' started", graph);
        }
        ExecutionEvent::NodeStarted {
            node_id,
            node_type,
            layer,
            ..
        } => {
            println!("  ⚡ Starting node: {} ({}, layer {})", node_id, node_type, layer);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Attempt { .. } => {}
        },
        ExecutionEvent::RunCompleted {
            failed,
            duration_ms,
            ..
        } => {
            if failed == 0 {
                println!("✨ Run completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Run finished with {} failed node(s) in {}ms", failed, duration_ms);
            }
        }
    }
}

fn validate_graph(file: &Path) -> Result<()> {
    println!("🔍 Validating graph: {}", file.display());

    let definition = load_definition(file)?;
    let graph = standard_registry(&[])?.build_graph(&definition)?;
    let layers = graph.topological_layers()?;

    println!("✅ Graph is valid:");
    println!("   Name: {}", definition.name);
    println!("   Nodes: {}", graph.len());
    println!("   Edges: {}", graph.edges().count());
    for (depth, layer) in layers.iter().enumerate() {
        println!("   Layer {}: {}", depth, layer.join(", "));
    }

    Ok(())
}

fn list_nodes() -> Result<()> {
    println!("📦 Available Node Types:");
    println!();

    let registry = standard_registry(&[])?;
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for field in &metadata.config {
                let marker = if field.required { "*" } else { " " };
                println!("      {}{}: {}", marker, field.name, field.description);
            }
        } else {
            println!("  • {}", node_type);
        }
    }

    Ok(())
}

fn create_example_graph(output: &Path) -> Result<()> {
    let definition = GraphDefinition::new("fan-in arithmetic")
        .with_node(
            NodeDefinition::new("source1", "source")
                .with_config(serde_json::json!({"x": 5, "y": 3})),
        )
        .with_node(
            NodeDefinition::new("source2", "source")
                .with_config(serde_json::json!({"x": 2, "y": 4})),
        )
        .with_node(NodeDefinition::new("add1", "transform.sum"))
        .with_node(NodeDefinition::new("add2", "transform.sum"))
        .with_node(NodeDefinition::new("mult", "transform.product"))
        .with_edge("source1", "add1")
        .with_edge("source2", "add2")
        .with_edge("add1", "mult")
        .with_edge("add2", "mult");

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(output, json)?;

    println!("✨ Created example graph: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  dag run --file {} --provenance mult", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_flag_parsing() {
        assert_eq!(
            parse_header("Authorization: Bearer abc:123").unwrap(),
            ("Authorization".to_string(), "Bearer abc:123".to_string())
        );
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header(": value").is_err());

        let cli = Cli::try_parse_from([
            "dag", "run", "-f", "graph.json", "-H", "X-Api-Key: k1", "--header", "Accept:json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { headers, .. } => assert_eq!(
                headers,
                vec![
                    ("X-Api-Key".to_string(), "k1".to_string()),
                    ("Accept".to_string(), "json".to_string())
                ]
            ),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_headers_reach_the_http_client() {
        let registry = standard_registry(&[("X-Api-Key".to_string(), "k1".to_string())]).unwrap();
        assert!(registry.get_metadata("http.call").is_some());

        let invalid = standard_registry(&[("bad header".to_string(), "v".to_string())]);
        assert!(invalid.is_err());
    }
}
