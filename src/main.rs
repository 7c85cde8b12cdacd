//! Cairn CLI - Main entry point.

use cairn::cli::{Cli, ClusterCommands, Commands};
use cairn::client::ManagerClient;
use cairn::config::CairnConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Manager {
            bind_addr,
            catalog_dir,
        } => {
            let mut config = match &cli.config {
                Some(path) => CairnConfig::from_file(path)?,
                None => CairnConfig::development(),
            };
            config.manager.bind_addr = bind_addr.parse()?;
            config.manager.catalog_dir = catalog_dir;
            config.observability.log_level = cli.log_level;

            cairn::run(config).await?;
        }

        Commands::Cluster { command } => match command {
            ClusterCommands::List { addr, cluster_id } => {
                let client = ManagerClient::new(&addr);
                match client.clusters(cluster_id.as_deref()).await {
                    Ok(clusters) => {
                        for cluster in &clusters {
                            println!(
                                "{}  size={}  used={}  nodes={}{}{}",
                                cluster.id,
                                cluster.size,
                                cluster.used,
                                cluster.nodes.len(),
                                if cluster.frozen { "  [frozen]" } else { "" },
                                if cluster.paralyzed { "  [paralyzed]" } else { "" },
                            );
                            for node in &cluster.nodes {
                                println!(
                                    "  {} {}  {}",
                                    if node.master { "*" } else { " " },
                                    node.id,
                                    node.address
                                );
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("Failed to list clusters: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            ClusterCommands::Register { addr, nodes } => {
                admin_request(&addr, reqwest::Method::POST, "register", &nodes.join(",")).await;
            }
            ClusterCommands::Move {
                addr,
                source,
                target,
            } => {
                let options = format!("{},{}", source, target);
                admin_request(&addr, reqwest::Method::GET, "move", &options).await;
            }
            ClusterCommands::Balance { addr, clusters } => {
                admin_request(&addr, reqwest::Method::GET, "balance", &clusters.join(",")).await;
            }
            ClusterCommands::Unfreeze { addr, clusters } => {
                admin_request(&addr, reqwest::Method::POST, "unfreeze", &clusters.join(",")).await;
            }
            ClusterCommands::Sync { addr, cluster_id } => {
                admin_request(
                    &addr,
                    reqwest::Method::GET,
                    "sync",
                    cluster_id.as_deref().unwrap_or(""),
                )
                .await;
            }
            ClusterCommands::Check { addr } => {
                admin_request(&addr, reqwest::Method::GET, "check", "").await;
            }
            ClusterCommands::Find { addr, hash } => {
                let client = ManagerClient::new(&addr);
                match client.find(&hash).await {
                    Ok((cluster_id, address)) => {
                        println!("Cluster: {}", cluster_id);
                        println!("Address: {}", address);
                    }
                    Err(e) => {
                        eprintln!("Find failed: {}", e);
                        std::process::exit(1);
                    }
                }
            }
        },

        Commands::Version => {
            println!("Cairn v{}", env!("CARGO_PKG_VERSION"));
            println!("Control plane for a distributed, content-addressed file store");
        }
    }

    Ok(())
}

/// Fire one admin request and report the outcome.
async fn admin_request(addr: &str, method: reqwest::Method, action: &str, options: &str) {
    let client = reqwest::Client::new();
    let url = format!("{}/", addr.trim_end_matches('/'));

    let result = client
        .request(method, url)
        .header("X-Action", action)
        .header("X-Options", options)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            println!("OK");
        }
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            eprintln!("{} failed: {} {}", action, status, body);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{} failed: {}", action, e);
            std::process::exit(1);
        }
    }
}
