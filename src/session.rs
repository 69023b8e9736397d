//! BGP session driver
//!
//! Wires one connected transport to one state machine: a reader task turning
//! decoded frames into events, a ticker feeding the timers, a writer draining
//! the output queue, and a consumer draining route updates. The machine
//! itself only runs on this task, one event at a time.

// SPDX-License-Identifier: AGPL-3.0-or-later

use futures_util::{SinkExt, StreamExt};
use minibgp::fsm::{Event, Fsm, PeerConfig, State};
use minibgp::route::{RouteAddition, RouteUpdate};
use minibgp::{Codec, Error as PacketError};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] minibgp::fsm::ConfigError),
}

/// Depth of the event queue feeding the state machine
const EVENT_QUEUE_DEPTH: usize = 64;

/// Drive one accepted connection until the machine goes idle.
pub async fn run(
    config: PeerConfig,
    routes: Vec<RouteAddition>,
    socket: TcpStream,
) -> Result<(), Error> {
    let (rx, tx) = socket.into_split();
    let mut rx = FramedRead::new(rx, Codec);
    let mut tx = FramedWrite::new(tx, Codec);
    let (mut fsm, mut output_rx, mut route_rx) = Fsm::new(config)?;
    for route in routes {
        fsm.advertise(route);
    }

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let reader_tx = event_tx.clone();
    let reader = tokio::spawn(async move {
        loop {
            let event = match rx.next().await {
                Some(Ok(message)) => Event::Message(message),
                Some(Err(e)) => {
                    // Framing is broken; no NOTIFICATION can be delivered
                    log::error!("failed to decode frame from peer: {e}");
                    Event::Shutdown
                }
                None => {
                    log::info!("peer closed the connection");
                    Event::Shutdown
                }
            };
            let stop = event == Event::Shutdown;
            if reader_tx.send(event).await.is_err() || stop {
                break;
            }
        }
    });

    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if event_tx.send(Event::TimerExpired).await.is_err() {
                break;
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = output_rx.recv().await {
            log::trace!("sending {message:?}");
            if let Err(e) = tx.feed(message).await {
                log::error!("failed to send message to peer: {e}");
                break;
            }
            if let Err(e) = tx.flush().await {
                log::error!("failed to flush messages to peer: {e}");
                break;
            }
        }
    });

    let consumer = tokio::spawn(async move {
        while let Some(update) = route_rx.recv().await {
            match update {
                RouteUpdate::Addition(route) => log::info!("route added: {route}"),
                RouteUpdate::Removal(route) => log::info!("route removed: {route}"),
            }
        }
    });

    let clock = Instant::now();
    while fsm.state() != State::Idle {
        let Some(event) = event_rx.recv().await else {
            break;
        };
        fsm.event(event, clock.elapsed().as_secs()).await;
    }

    // Dropping the machine closes its queues; the writer flushes whatever is
    // left (a final NOTIFICATION at most) before the transport goes away.
    drop(fsm);
    reader.abort();
    ticker.abort();
    let _ = writer.await;
    let _ = consumer.await;
    Ok(())
}
