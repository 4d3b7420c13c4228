//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg};
use config::Config;
use sdnc_core::lb::LbConfig;
use sdnc_core::reconciler::LivenessOracle;
use sdnc_core::switch::ControllerParams;
use sdnc_utils::mac::MacAddr;
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    let log_level_filter = config
        .level
        .parse::<tracing::Level>()
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::INFO);

    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(config.ansi);
    let layer = if config.json {
        layer.json().boxed()
    } else {
        layer.boxed()
    };

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(log_level_filter.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();
}

// Resolves host reachability by attempting a short-lived TCP connect to port
// 7 (echo) of the host, standing in for the link-layer reachability probe
// the reconciler's original collaborator performs out of band.
struct TcpConnectOracle {
    timeout: Duration,
}

#[async_trait::async_trait]
impl LivenessOracle for TcpConnectOracle {
    async fn is_reachable(&self, ip: Ipv4Addr) -> bool {
        let addr = std::net::SocketAddr::from((ip, 7));
        matches!(
            tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

fn controller_params(config: &Config) -> ControllerParams {
    let lb_bindings = config
        .lb
        .iter()
        .map(|b| LbConfig {
            service_ip: b.service_ip,
            servers: b.servers.clone(),
            switch_dpid: b.switch_dpid,
            switch_mac: b.switch_mac,
        })
        .collect();
    let known_hosts: HashMap<Ipv4Addr, MacAddr> = config
        .known_hosts
        .iter()
        .map(|h| (h.ip, h.mac))
        .collect();

    ControllerParams {
        lb_bindings,
        learning_enabled: config.learning.enabled,
        transparent: config.learning.transparent,
        hold_down: Duration::from_secs(config.learning.hold_down_secs),
        known_hosts,
    }
}

fn main() {
    // Parse command-line parameters.
    let matches = App::new("sdnc-controller")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::with_name("ip")
                .long("ip")
                .value_name("addr")
                .help("Service IP for an ad hoc load-balancer binding."),
        )
        .arg(
            Arg::with_name("servers")
                .long("servers")
                .value_name("ip,ip,...")
                .help("Comma-separated backend server list for an ad hoc binding."),
        )
        .arg(
            Arg::with_name("switch-dpid")
                .long("switch-dpid")
                .value_name("dpid")
                .help("Datapath id the ad hoc binding attaches to."),
        )
        .arg(
            Arg::with_name("learning")
                .long("learning")
                .help("Enable the L2 learning switch."),
        )
        .arg(
            Arg::with_name("transparent")
                .long("transparent")
                .help("Run the learning switch in transparent (no LLDP filtering) mode."),
        )
        .arg(
            Arg::with_name("hold-down")
                .long("hold-down")
                .value_name("secs")
                .help("Seconds to suppress flooding after a switch connects."),
        )
        .get_matches();

    // Read configuration file, then apply ad hoc CLI overrides on top.
    let config_file = matches.value_of("config");
    let mut config = Config::load(config_file);

    if let (Some(ip), Some(servers), Some(dpid)) = (
        matches.value_of("ip"),
        matches.value_of("servers"),
        matches.value_of("switch-dpid"),
    ) {
        let service_ip = ip.parse().expect("invalid --ip");
        let servers = servers
            .split(',')
            .map(|s| s.parse().expect("invalid --servers entry"))
            .collect();
        let switch_dpid = dpid.parse().expect("invalid --switch-dpid");
        // Ad hoc CLI bindings don't know the switch's MAC ahead of
        // ConnectionUp; reverse-flow rewrites for this binding fall back to
        // the all-zero address until a config file supplies switch_mac.
        config.lb = vec![config::LbBinding {
            service_ip,
            servers,
            switch_dpid,
            switch_mac: MacAddr::ZERO,
        }];
    }
    if matches.is_present("learning") {
        config.learning.enabled = true;
    }
    if matches.is_present("transparent") {
        config.learning.transparent = true;
    }
    if let Some(secs) = matches.value_of("hold-down") {
        config.learning.hold_down_secs = secs.parse().expect("invalid --hold-down");
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    info!("starting up");

    let listen_addr = config
        .listen_addr
        .parse()
        .expect("invalid listen_addr");
    let params = controller_params(&config);
    let known_hosts: Vec<Ipv4Addr> = params.known_hosts.keys().copied().collect();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async move {
            let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(256);

            let _listener = match sdnc_core::transport::listen(listen_addr, inbound_tx.clone()).await {
                Ok(task) => task,
                Err(error) => {
                    error.log();
                    std::process::exit(1);
                }
            };

            let oracle: Arc<dyn LivenessOracle> = Arc::new(TcpConnectOracle {
                timeout: Duration::from_secs(1),
            });
            let _reconciler =
                sdnc_core::switch::spawn_reconciler_worker(known_hosts, oracle, inbound_tx);

            sdnc_core::switch::run(params, inbound_rx).await;
        });
}
