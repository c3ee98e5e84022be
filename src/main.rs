// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use inspect_http::{config, hub::Hub, manage, proxy};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "inspect-http")]
struct Args {
    /// Upstream origin URL, e.g. http://localhost:8888
    #[arg(long, short = 'u')]
    upstream: Option<String>,

    /// Address where the proxy listens for incoming HTTP requests
    #[arg(long, short = 'p')]
    proxy_addr: Option<String>,

    /// Address where the management event stream listens
    #[arg(long, short = 'm')]
    mng_addr: Option<String>,

    /// Optional config TOML path
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    // Load config: optional CLI path; defaults if not provided
    let cfg = if let Some(ref p) = args.config {
        config::Config::load_from_path(p).await.unwrap_or_else(|e| {
            warn!(%p, %e, "failed to load config, using defaults");
            config::Config::default()
        })
    } else {
        config::Config::default()
    };

    // CLI flags override the config file
    let upstream = args
        .upstream
        .or(cfg.general.upstream.clone())
        .ok_or_else(|| anyhow::anyhow!("no upstream configured (use --upstream or a config file)"))?;
    let upstream: hyper::Uri = upstream.parse()?;
    let proxy_addr: SocketAddr = args
        .proxy_addr
        .unwrap_or_else(|| cfg.general.proxy_listen.clone())
        .parse()?;
    let mng_addr: SocketAddr = args
        .mng_addr
        .unwrap_or_else(|| cfg.general.management_listen.clone())
        .parse()?;

    let hub = Arc::new(Hub::new());

    let proxy_server = proxy::run_proxy(proxy_addr, upstream, hub.clone());
    let mng_server = manage::run_management(mng_addr, hub);

    tokio::select! {
        res = proxy_server => {
            if let Err(e) = res {
                error!(%e, "proxy server error");
                return Err(e);
            }
        }
        res = mng_server => {
            if let Err(e) = res {
                error!(%e, "management server error");
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
