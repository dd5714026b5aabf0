//! overlay-bridge demo CLI.
//!
//! Runs the adapter over the in-process loopback transport.
//!
//! ```text
//! echo     bind a service, dial it, echo messages back
//! http     serve HTTP/1.1 with hyper over an accepted socket, fetch a path
//! request  send one request/response exchange to a loopback responder
//! ```

use bytes::{Bytes, BytesMut};
use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use overlay_bridge::config::{load_config, AdapterConfig};
use overlay_bridge::http::{RequestEvent, RequestSpec};
use overlay_bridge::net::{ListenArgs, Server, SocketEvent};
use overlay_bridge::observability::{init_logging, init_metrics};
use overlay_bridge::transport::loopback::LoopbackResponse;
use overlay_bridge::transport::{event_queue, LoopbackProvider};
use overlay_bridge::{Adapter, AdapterError};

#[derive(Parser)]
#[command(name = "overlay-bridge")]
#[command(about = "Socket, server and request adapters over an overlay transport", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration.
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a service and echo messages from concurrent clients
    Echo {
        #[arg(short, long, default_value = "echo")]
        service: String,
        #[arg(short, long, default_value = "hello over the overlay")]
        message: String,
        /// Number of concurrent clients.
        #[arg(short = 'n', long, default_value_t = 3)]
        clients: usize,
    },
    /// Serve HTTP/1.1 over an accepted socket and fetch one path
    Http {
        #[arg(short, long, default_value = "web")]
        service: String,
        #[arg(short, long, default_value = "/")]
        path: String,
    },
    /// Send one request to a loopback responder
    Request {
        /// Full URL; the host names the service.
        #[arg(short, long, default_value = "http://api/status")]
        url: String,
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Extra headers as "Name: value".
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Request body.
        #[arg(short, long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AdapterConfig::default(),
    };
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    init_logging(&level);

    if config.observability.metrics_enabled {
        init_metrics(config.observability.metrics_address.parse()?);
    }

    tracing::info!("overlay-bridge v{} starting", env!("CARGO_PKG_VERSION"));

    let (sink, queue) = event_queue();
    let provider = Arc::new(LoopbackProvider::new(sink).with_identity("overlay-bridge-cli"));
    let (adapter, dispatcher) = Adapter::new(config, provider.clone(), queue);
    let dispatch: JoinHandle<Result<(), AdapterError>> = tokio::spawn(dispatcher.run());

    let outcome = match cli.command {
        Commands::Echo {
            service,
            message,
            clients,
        } => run_echo(&adapter, &service, &message, clients).await,
        Commands::Http { service, path } => run_http(&adapter, &service, &path).await,
        Commands::Request {
            url,
            method,
            headers,
            body,
        } => run_request(&adapter, &provider, &url, &method, &headers, body).await,
    };

    adapter.shutdown();
    dispatch.await??;
    outcome?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Bind `service` and wait for the bind outcome.
async fn bind(adapter: &Adapter, service: &str) -> Result<Server, AdapterError> {
    let mut server = adapter.server();
    let (tx, rx) = tokio::sync::oneshot::channel();
    server.listen(
        service,
        ListenArgs::callback(move |result| {
            let _ = tx.send(result);
        }),
    )?;
    rx.await.unwrap_or(Err(AdapterError::Shutdown))?;
    Ok(server)
}

async fn run_echo(
    adapter: &Adapter,
    service: &str,
    message: &str,
    clients: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = bind(adapter, service).await?;
    let address = server.address();
    tracing::info!(?address, "Echo service bound");

    let acceptor = tokio::spawn(async move {
        let mut handlers = Vec::new();
        while let Some(mut socket) = server.accept().await {
            handlers.push(tokio::spawn(async move {
                while let Some(SocketEvent::Data(chunk)) = socket.recv().await {
                    if socket.write(chunk).is_err() {
                        break;
                    }
                }
            }));
        }
        join_all(handlers).await;
    });

    let dials = (0..clients).map(|i| {
        let adapter = adapter.clone();
        let payload = format!("[{i}] {message}");
        let service = service.to_string();
        async move {
            let mut socket = adapter.dial(&service).await?;
            let written = socket.write(payload.clone())?.await?;

            let mut echoed = BytesMut::new();
            while echoed.len() < written {
                match socket.recv().await {
                    Some(SocketEvent::Data(chunk)) => echoed.extend_from_slice(&chunk),
                    _ => break,
                }
            }
            socket.close()?;
            Ok::<_, AdapterError>(String::from_utf8_lossy(&echoed).into_owned())
        }
    });

    for reply in join_all(dials).await {
        println!("{}", reply?);
    }

    adapter.shutdown();
    acceptor.await?;
    Ok(())
}

async fn run_http(adapter: &Adapter, service: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = bind(adapter, service).await?;

    let serving = tokio::spawn(async move {
        let Some(socket) = server.accept().await else {
            return;
        };
        let peer = socket.peer().caller_id.clone().unwrap_or_default();
        let handler = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
            let body = format!("{} {} from {}\n", req.method(), req.uri().path(), peer);
            async move { Ok::<_, std::convert::Infallible>(hyper::Response::new(Full::new(Bytes::from(body)))) }
        });
        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(socket), handler)
            .await
        {
            tracing::warn!(error = %e, "HTTP connection ended with error");
        }
        let _ = server.close().await;
    });

    let socket = adapter.dial(service).await?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(socket)).await?;
    let driver = tokio::spawn(connection);

    let request = hyper::Request::get(path)
        .header(hyper::header::HOST, service)
        .body(Full::new(Bytes::new()))?;
    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    println!("{status}\n{}", String::from_utf8_lossy(&body));

    drop(sender);
    let _ = driver.await;
    let _ = serving.await;
    Ok(())
}

async fn run_request(
    adapter: &Adapter,
    provider: &LoopbackProvider,
    url: &str,
    method: &str,
    headers: &[String],
    body: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut spec = RequestSpec::from_url(url, method.parse()?)?;
    for line in headers {
        spec = spec.header_line(line)?;
    }

    if let overlay_bridge::http::RequestTarget::Service(name) = &spec.target {
        provider.respond(name, |req| {
            LoopbackResponse::new(200)
                .header("Content-Type", "text/plain")
                .header("Set-Cookie", "session=loopback")
                .chunk(format!("{} {}\n", req.method, req.path))
                .chunk(req.body.clone())
        });
    }

    let mut request = adapter.request(spec).await?;
    if let Some(body) = body {
        request.send_data(body)?.await?;
    }
    request.end();

    while let Some(event) = request.next_event().await {
        match event {
            RequestEvent::Response(head) => {
                println!("{} {}", head.status.as_u16(), head.reason);
                for (name, value) in head.headers.iter() {
                    println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
                }
                println!();
            }
            RequestEvent::Data(chunk) => print!("{}", String::from_utf8_lossy(&chunk)),
            RequestEvent::Complete => break,
            RequestEvent::Failed(e) => return Err(e.into()),
        }
    }
    tracing::debug!(phases = ?request.phase_trail(), "Exchange finished");
    Ok(())
}
