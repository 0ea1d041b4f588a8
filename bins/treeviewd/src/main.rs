// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tree view daemon (treeviewd)
//!
//! Serves tree views over HTTP: `GET /views/:view/tree` renders a view under
//! the query-string filter state and `POST /views/:view/{drag_drop, add_node,
//! delete_node, edit_node}` applies mutations. Rows live in memory, seeded
//! from a JSON data file; view configs live in the config directory.
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use treeview_app_core::{PathEvaluator, SavedView, ViewConfigService, ViewRegistry};
use treeview_config_fs::FsConfigStore;
use treeview_core::{MemoryRowStore, Role, TableSeed};

mod app;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tree view daemon")]
struct Args {
    /// Port for the HTTP API
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// JSON seed file: `{"tables": [...], "views": {...}}`
    #[arg(long)]
    data: Option<PathBuf>,

    /// Directory holding view configs (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Role number given to callers without an `x-role` header
    #[arg(long, default_value_t = Role::PUBLIC.0)]
    public_role: u32,
}

/// Seed file contents.
#[derive(Debug, Default, Deserialize)]
struct DataFile {
    #[serde(default)]
    tables: Vec<TableSeed>,
    #[serde(default)]
    views: BTreeMap<String, SavedView>,
}

fn load_data(path: Option<&PathBuf>) -> Result<DataFile> {
    let Some(path) = path else {
        return Ok(DataFile::default());
    };
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    info!("Starting tree view daemon (treeviewd)...");

    let data = load_data(args.data.as_ref())?;
    let store = MemoryRowStore::from_seeds(data.tables);

    let config_store = match &args.config_dir {
        Some(dir) => FsConfigStore::with_base(dir),
        None => FsConfigStore::new(),
    }
    .context("open config store")?;
    info!("View configs in {}", config_store.base().display());
    let service = ViewConfigService::new(config_store);
    for (name, view) in &data.views {
        service
            .save_view(name, view, &store)
            .with_context(|| format!("seed view `{name}`"))?;
    }
    let views = ViewRegistry::load(&service, &store).context("load views")?;

    let state = Arc::new(app::AppState {
        store,
        views,
        evaluator: PathEvaluator::new(),
        public_role: Role(args.public_role),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP API server listening on {}", listener.local_addr()?);
    axum::serve(listener, app::router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("treeviewd stopped");
    Ok(())
}
