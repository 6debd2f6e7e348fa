/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Trestle MCP server entry point.
//!
//! Loads the server configuration, builds the LSP supervision fabric, and
//! serves MCP tool calls over stdin/stdout until the client hangs up.
//! Configuration failures exit nonzero before any server is spawned.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trestle_mcp::bridge::{CodeIntel, ToolFacade};
use trestle_mcp::config::Config;
use trestle_mcp::lsp::ServerManager;
use trestle_mcp::mcp::McpServer;

/// Command-line arguments for Trestle.
#[derive(Parser, Debug)]
#[command(name = "trestle")]
#[command(version = env!("TRESTLE_VERSION"))]
#[command(about = "Supervising bridge between MCP and LSP servers")]
struct Args {
    /// Path to the JSON configuration file. Overridden by CCLSP_CONFIG_PATH.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scan this project root at startup and spawn a server per matching
    /// extension.
    #[arg(long)]
    preload: Option<PathBuf>,

    /// With --preload, only report which servers would start.
    #[arg(long)]
    preload_dry_run: bool,
}

/// Entry point for the Trestle binary.
///
/// # Errors
///
/// Returns an error (nonzero exit) when configuration loading fails or the
/// MCP loop dies.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trestle=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref())?;
    info!("Loaded {} server definition(s)", config.servers.len());

    let manager = ServerManager::new(config);
    let intel = Arc::new(CodeIntel::new(manager));

    if let Some(root) = &args.preload {
        let commands = intel.preload_servers(root, args.preload_dry_run).await;
        info!(
            "Preload{}: {} server(s)",
            if args.preload_dry_run { " (dry run)" } else { "" },
            commands.len()
        );
    }

    let handler = ToolFacade::new(intel.clone(), tokio::runtime::Handle::current());
    let mut server = McpServer::new(handler);

    // The MCP loop uses synchronous stdio; keep it off the async workers.
    let mcp_task = tokio::task::spawn_blocking(move || server.run());

    let result = tokio::select! {
        res = mcp_task => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    info!("Shutting down LSP servers");
    intel.dispose().await;

    result
}
