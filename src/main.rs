// SPDX-License-Identifier: AGPL-3.0-or-later

mod args;
mod session;

use clap::Parser;
use minibgp::fsm::PeerConfig;
use minibgp::path::{AsPath, Origin};
use minibgp::route::RouteAddition;

fn setup_logger(verbose: bool) {
    let config = simplelog::ConfigBuilder::new()
        .set_time_format_rfc3339()
        .build();
    simplelog::TermLogger::init(
        if verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("Failed to initialize logger");
}

fn advertised_routes(args: &args::MiniBgpd) -> Vec<RouteAddition> {
    args.advertise
        .iter()
        .map(|&prefix| RouteAddition {
            prefix,
            next_hop: args.local_addr,
            as_path: AsPath::sequence(vec![args.local_as]),
            origin: Origin::Igp,
        })
        .collect()
}

#[tokio::main]
async fn main() {
    let args = args::MiniBgpd::parse();
    setup_logger(args.verbose);
    if args.local_addr.is_ipv4() != args.neighbor.is_ipv4() {
        log::error!("local address and neighbor must be the same address family");
        std::process::exit(1);
    }
    let listener = tokio::net::TcpListener::bind((args.listen_addr, args.listen_port))
        .await
        .expect("Failed to bind to listen address");
    log::info!(
        "listening on {}:{} for neighbor {}",
        args.listen_addr,
        args.listen_port,
        args.neighbor
    );
    loop {
        let (socket, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::error!("failed to accept connection: {e}");
                continue;
            }
        };
        if remote.ip().to_canonical() != args.neighbor.to_canonical() {
            log::warn!("rejecting connection from unexpected address {}", remote.ip());
            continue;
        }
        let config = PeerConfig {
            local_as: args.local_as,
            peer_as: args.peer_as,
            router_id: args.router_id,
            local_addr: args.local_addr,
            neighbor: args.neighbor,
            hold_time: args.hold_time,
        };
        if let Err(e) = session::run(config, advertised_routes(&args), socket).await {
            log::error!("session error: {e}");
        }
        log::info!("session with {} ended, listening again", args.neighbor);
    }
}
