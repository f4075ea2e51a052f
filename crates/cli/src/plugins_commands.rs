//! CLI commands for plugin manifests.

use std::path::PathBuf;

use {
    anyhow::{Context, Result},
    clap::Subcommand,
};

use {
    parlor_config::ParlorConfig,
    parlor_plugins::{FsPluginDiscoverer, MANIFEST_SUFFIX, PluginDescriptor, PluginDiscoverer},
};

#[derive(Subcommand)]
pub enum PluginAction {
    /// List discovered plugin manifests.
    List {
        /// Plugin directory (defaults to `plugins.directory` from config).
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the order plugins would be loaded in.
    Order {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

pub async fn handle_plugins(action: PluginAction, config: &ParlorConfig) -> Result<()> {
    match action {
        PluginAction::List { dir, json } => list(discoverer(dir, config)?, json).await,
        PluginAction::Order { dir } => order(discoverer(dir, config)?).await,
    }
}

fn discoverer(dir: Option<PathBuf>, config: &ParlorConfig) -> Result<FsPluginDiscoverer> {
    dir.map(FsPluginDiscoverer::new)
        .or_else(|| FsPluginDiscoverer::from_config(&config.plugins))
        .context("no plugin directory: pass --dir or set plugins.directory in the config")
}

async fn list(discoverer: FsPluginDiscoverer, json: bool) -> Result<()> {
    let report = discoverer.discover().await;

    if json {
        let plugins: Vec<serde_json::Value> = report
            .manifests
            .iter()
            .map(|(path, m)| {
                serde_json::json!({
                    "name": m.name,
                    "version": m.version,
                    "category": m.category,
                    "priority": m.priority,
                    "dependencies": m.dependencies,
                    "kind": m.kind(),
                    "description": m.description,
                    "path": path,
                })
            })
            .collect();
        let errors: Vec<serde_json::Value> = report
            .errors
            .iter()
            .map(|(path, e)| serde_json::json!({ "path": path, "error": e.to_string() }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "plugins": plugins,
                "errors": errors,
            }))?
        );
        return Ok(());
    }

    if report.manifests.is_empty() && report.errors.is_empty() {
        println!(
            "No plugins found. Place <name>{MANIFEST_SUFFIX} files in {}",
            discoverer.root().display()
        );
        return Ok(());
    }

    for (_, m) in &report.manifests {
        println!(
            "  {name} {version} [{category}, {priority}]",
            name = m.name,
            version = m.version,
            category = m.category,
            priority = m.priority,
        );
        if !m.description.is_empty() {
            println!("    {}", m.description);
        }
        if !m.dependencies.is_empty() {
            println!("    requires: {}", m.dependencies.join(", "));
        }
    }
    for (path, e) in &report.errors {
        eprintln!("  ✗ {}: {e}", path.display());
    }
    Ok(())
}

async fn order(discoverer: FsPluginDiscoverer) -> Result<()> {
    let report = discoverer.discover().await;
    for (path, e) in &report.errors {
        eprintln!("skipping {}: {e}", path.display());
    }

    let descriptors = report
        .manifests
        .iter()
        .map(|(_, m)| m.descriptor())
        .collect::<Result<Vec<PluginDescriptor>, _>>()?;
    let order = parlor_plugins::resolver::load_order(&descriptors)?;

    for (position, index) in order.into_iter().enumerate() {
        let d = &descriptors[index];
        println!("{:>3}. {} ({})", position + 1, d.name, d.priority);
    }
    Ok(())
}
