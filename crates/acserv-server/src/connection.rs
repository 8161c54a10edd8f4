//! Per-connection request loop

use acserv_http::{
    normalize_target, read_request, request_wants_close, ResponseRecorder, RouteTable,
};
use http::header::HeaderName;
use http::Method;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use crate::{ConnectionOptions, RunningFlag, ServerError, TunnelNegotiator};

const TRANSCEND_VERSION: HeaderName = HeaderName::from_static("x-transcend-version");

/// Serves HTTP requests on one accepted connection until it closes, the
/// server stops, or a `CONNECT` turns it into a tunnel.
pub struct ConnectionHandler<S> {
    stream: BufReader<S>,
    peer: SocketAddr,
    routes: Arc<RouteTable>,
    options: Arc<ConnectionOptions>,
    running: RunningFlag,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        routes: Arc<RouteTable>,
        options: Arc<ConnectionOptions>,
        running: RunningFlag,
    ) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
            routes,
            options,
            running,
        }
    }

    /// Drive the connection to completion; the stream is shut down on return
    pub async fn run(mut self) {
        match self.serve().await {
            Ok(()) => debug!("Connection from {} closed", self.peer),
            Err(e) => debug!("Connection from {} ended: {}", self.peer, e),
        }

        let _ = self.stream.shutdown().await;
    }

    async fn serve(&mut self) -> Result<(), ServerError> {
        let options = self.options.clone();
        let peer = self.peer;
        let mut running = self.running.clone();

        while running.is_running() {
            let next = tokio::select! {
                _ = running.stopped() => {
                    debug!("Server stopping, dropping idle connection from {}", peer);
                    return Ok(());
                }
                next = read_request(&mut self.stream, &options.limits) => next?,
            };

            let mut request = match next {
                Some(request) => request,
                None => {
                    trace!("Peer {} closed the connection", peer);
                    return Ok(());
                }
            };

            let path = normalize_target(&mut request);
            debug!("{} {} from {}", request.method(), request.uri(), peer);

            if request.method() == Method::CONNECT {
                let mut negotiator = TunnelNegotiator::new(
                    &options.tunnel,
                    self.running.clone(),
                    options.limits.idle_timeout,
                );
                return negotiator.negotiate(&request, &mut self.stream).await;
            }

            let mut recorder = ResponseRecorder::new();
            recorder.set_header(TRANSCEND_VERSION, "1");
            self.routes.dispatch(&request, &path, &mut recorder).await;
            recorder.default_content_type("text/html");
            recorder.write_to(&mut self.stream).await?;

            trace!(
                "{} {} -> {} ({} bytes)",
                request.method(),
                path,
                recorder.status(),
                recorder.content_length()
            );

            if request_wants_close(&request) || recorder.wants_close() {
                return Ok(());
            }
        }

        Ok(())
    }
}
