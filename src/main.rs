use clap::Parser;
use uring_gateway::{
    Application, Channel, Error, InboundEvent, OutboundEvent, Result, Scope, ScopeKind,
};

#[derive(Parser)]
#[command(name = "uring-gateway")]
#[command(about = "HTTP + WebSocket echo gateway on io_uring", long_about = None)]
struct Cli {
    /// Address to bind
    #[arg(long, env = "GATEWAY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, short, env = "GATEWAY_PORT", default_value_t = 8000)]
    port: u16,
}

/// Echoes HTTP request bodies and WebSocket messages back to the client.
struct Echo;

impl Echo {
    async fn http<C: Channel>(&self, scope: &Scope, channel: &C) -> Result<()> {
        let InboundEvent::HttpRequestBody { mut body, .. } = channel.receive().await? else {
            return Err(Error::ProtocolViolation("expected a request body"));
        };
        if body.is_empty() {
            let method = scope.method.as_deref().unwrap_or("GET");
            body = format!("{method} {}\n", scope.path).into_bytes();
        }

        channel
            .send(OutboundEvent::HttpResponseStart {
                status: 200,
                headers: vec![
                    (b"content-type".to_vec(), b"text/plain".to_vec()),
                    (b"content-length".to_vec(), body.len().to_string().into_bytes()),
                ],
            })
            .await?;
        channel
            .send(OutboundEvent::HttpResponseBody { body, more: false })
            .await
    }

    async fn websocket<C: Channel>(&self, scope: &Scope, channel: &C) -> Result<()> {
        channel.receive().await?;
        channel
            .send(OutboundEvent::WebsocketAccept {
                subprotocol: scope.subprotocols.first().cloned(),
            })
            .await?;

        loop {
            match channel.receive().await? {
                InboundEvent::WebsocketReceive { payload } => {
                    channel.send(OutboundEvent::WebsocketSend { payload }).await?;
                }
                InboundEvent::WebsocketDisconnect { code } => {
                    log::debug!("{} disconnected ({code})", scope.path);
                    // Errors once the peer has already dropped the stream.
                    let _ = channel.send(OutboundEvent::WebsocketClose { code: 1000 }).await;
                    return Ok(());
                }
                _ => return Err(Error::ProtocolViolation("unexpected event")),
            }
        }
    }
}

impl Application for Echo {
    async fn call<C: Channel>(&self, scope: &Scope, channel: &C) -> Result<()> {
        match scope.kind {
            ScopeKind::Http => self.http(scope, channel).await,
            ScopeKind::WebSocket => self.websocket(scope, channel).await,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    tokio_uring::start(async move { uring_gateway::serve(Echo, &cli.host, cli.port).await })?;
    Ok(())
}
