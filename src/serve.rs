use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use http::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rpcduplex::Handler;
use tokio::net::TcpListener;
use tonic::body::Body;
use tracing::{debug, info, warn};

/// Accept connections on `listener` until `shutdown` resolves.
///
/// Each connection runs on its own task and speaks HTTP/1.1 or cleartext
/// HTTP/2, whichever the client opens with. Every request goes to `handler`.
/// Connections already accepted keep running after shutdown.
pub async fn serve<F>(
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    info!(addr = %listener.local_addr()?, "Listening");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                debug!(%peer, "Accepted connection");
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let handler = Arc::clone(&handler);
                        async move {
                            Ok::<_, Infallible>(handler.handle(request.map(Body::new)).await)
                        }
                    });

                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "Connection closed with error");
                    }
                });
            }
        }
    }
}
