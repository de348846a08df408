use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use raknet::transport::{Advertisement, InMemoryPeerRegistry, RaknetListener, RaknetListenerConfig};
use raknet::{DisconnectReason, Priority, SessionHandle};
use tracing::Level;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    let filter_layer = filter::LevelFilter::from_level(Level::DEBUG);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .init();

    let bind_addr: SocketAddr = "0.0.0.0:19132".parse()?;
    let config = RaknetListenerConfig::builder()
        .bind_address(bind_addr)
        .build();
    let advertisement = Arc::new(Advertisement::new(format!(
        "MCPE;RakNet echo;766;1.21.50;0;20;{};raknet-server;Survival;1;{};{};",
        config.guid,
        bind_addr.port(),
        bind_addr.port() + 1
    )));

    let mut listener = RaknetListener::bind_with(
        config,
        Arc::new(InMemoryPeerRegistry::new()),
        advertisement,
    )
    .await?;
    tracing::info!("RakNet echo server listening on {}", listener.local_addr());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            accepted = listener.next() => match accepted {
                Some(session) => {
                    tokio::spawn(echo(session));
                }
                None => break,
            },
        }
    }

    tracing::info!("Shutting down...");
    listener.shutdown();
    Ok(())
}

async fn echo(session: Arc<SessionHandle>) {
    let peer = session.remote_addr();
    tracing::info!("[{}] New client connected", peer);

    let Some(mut incoming) = session.incoming() else {
        return;
    };
    while let Some(msg) = incoming.next().await {
        if let Err(e) = session
            .send(msg.payload, msg.reliability, msg.channel, Priority::Medium)
            .await
        {
            tracing::info!("[{}] Echo failed: {}", peer, e);
            break;
        }
    }

    session.close(DisconnectReason::Disconnected);
    tracing::info!("[{}] Connection closed: {:?}", peer, session.close_reason());
}
