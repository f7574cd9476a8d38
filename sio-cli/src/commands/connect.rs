use sio_client::{io, DataElement, IoConfig};
use tracing::{error, info};

/// Open a namespace socket, listen on the given event names, and print
/// whatever arrives until ^C.
pub async fn run(uri: &str, namespace: &str, listen: &[String]) -> sio_core::error::SioResult<()> {
    let target = format!("{}{}", uri.trim_end_matches('/'), namespace);
    let socket = io(&target, IoConfig::default())?;

    socket.events().connect.on("connect", |_| {
        info!("connected");
    });
    socket.events().disconnect.on("disconnect", |reasons| {
        if let Some(reason) = reasons.first() {
            info!("disconnected: {reason}");
        }
    });
    socket.events().error.on("error", |errs| {
        if let Some(e) = errs.first() {
            error!("socket error: {e}");
        }
    });

    for name in listen {
        socket.events().event.on(name, |events| {
            for incoming in events {
                let args: Vec<serde_json::Value> = incoming
                    .args
                    .iter()
                    .map(|a| match a {
                        DataElement::Json(v) => v.clone(),
                        DataElement::Bytes(b) => serde_json::json!({ "bytes": b.len() }),
                    })
                    .collect();
                println!("{}: {}", incoming.name, serde_json::Value::Array(args));
            }
        });
    }

    socket.open().await?;
    tokio::signal::ctrl_c().await.ok();
    socket.close().await?;
    Ok(())
}
