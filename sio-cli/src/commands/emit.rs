use std::time::Duration;

use sio_client::{io, DataElement, IoConfig};
use tracing::{info, warn};

/// Connect, emit one event with `args` (each a JSON value), optionally
/// wait up to `ack_timeout` for the server's reply, then disconnect.
pub async fn run(
    uri: &str,
    namespace: &str,
    event: &str,
    args: Vec<serde_json::Value>,
    ack_timeout: Option<Duration>,
) -> sio_core::error::SioResult<()> {
    let target = format!("{}{}", uri.trim_end_matches('/'), namespace);
    let socket = io(&target, IoConfig::default())?;
    socket.open().await?;

    let args: Vec<DataElement> = args.into_iter().map(DataElement::Json).collect();

    match ack_timeout {
        None => socket.emit(event, args),
        Some(timeout) => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            let tx_success = std::sync::Mutex::new(Some(tx));
            socket.emit_with_ack_timeout(
                event,
                args,
                timeout,
                move |reply| {
                    if let Some(tx) = tx_success.lock().unwrap().take() {
                        let _ = tx.send(Some(reply));
                    }
                },
                || warn!("ack timed out"),
            );
            if let Ok(Some(reply)) = rx.await {
                info!("ack: {}", serde_json::Value::Array(reply));
            }
        }
    }

    socket.close().await?;
    Ok(())
}
