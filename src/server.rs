use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
};

use crate::{
    engine::ProtocolEngine,
    protocol::{decode_line, raw_tx_id, ProtocolError, Request, Response},
};

/// Handles one request line. `None` means the line could not be decoded and
/// gets no reply.
pub fn process_line(engine: &ProtocolEngine, line: &str) -> Option<Response> {
    let fields = match decode_line(line) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!(error = %e, line, "Discarding undecodable request");
            return None;
        }
    };

    let response = match Request::from_fields(&fields) {
        Ok(request) => {
            tracing::debug!(request = request.name(), "Dispatching request");
            engine.execute(&request)
        }
        Err(e) => Response::error(raw_tx_id(&fields), &e),
    };
    Some(response)
}

/// Serves one connection until EOF or a transport error.
///
/// Lines are read as raw bytes; a line that is not valid UTF-8 is treated
/// like any other undecodable request. Engine calls run on the blocking pool:
/// they take a std mutex and may rewrite the ledger file.
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, engine: Arc<ProtocolEngine>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    tracing::info!(%peer, "Connection accepted");
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%peer, error = %e, "Read failed, closing connection");
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim().to_string(),
            Err(e) => {
                tracing::warn!(%peer, error = %e, "Discarding request that is not valid UTF-8");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        tracing::trace!(%peer, %line, "Received");

        let worker = engine.clone();
        let Some(response) = dispatch(peer, move || process_line(&worker, &line)).await else {
            continue;
        };

        if let Err(e) = writer.write_all(response.to_line().as_bytes()).await {
            tracing::debug!(%peer, error = %e, "Write failed, closing connection");
            break;
        }
    }

    tracing::info!(%peer, "Connection closed");
}

/// Runs a handler on the blocking pool. A handler that panics still gets an
/// `ERROR` reply.
async fn dispatch<F>(peer: SocketAddr, handler: F) -> Option<Response>
where
    F: FnOnce() -> Option<Response> + Send + 'static,
{
    match tokio::task::spawn_blocking(handler).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(%peer, error = %e, "Request handler panicked");
            metrics::increment_counter!("ledger_node_handler_panics_total");
            Some(Response::error(None, &ProtocolError::Internal))
        }
    }
}

/// Accept loop: one task per connection, never waits on a handler.
pub async fn serve(listener: TcpListener, engine: Arc<ProtocolEngine>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(%peer, error = %e, "Could not disable Nagle");
                }
                metrics::increment_counter!("ledger_node_connections_total");
                tokio::spawn(handle_connection(stream, peer, engine.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
            }
        }
    }
}
