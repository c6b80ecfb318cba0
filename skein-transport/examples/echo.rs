//! Echo server and client over TCP.
//!
//! Starts a server exposing `EchoSrv.Echo` and `EchoSrv.Fill`, publishes it
//! under `name/echo-srv` in an in-memory registrar, then resolves the name and
//! calls both methods. `EchoSrv.Fill` returns its payload through the blob
//! side-channel instead of the JSON body.
//!
//! ```text
//! SKEIN_DEBUG=debug cargo run --example echo
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use skein_transport::telemetry::init_tracing;
use skein_transport::{
    Blob, ClientConfig, Endpoint, HandlerError, JsonCodec, Listener, MemoryRegistrar,
    NetworkProvider, Registrar, RpcClient, RpcError, RpcMessage, RpcServer,
    TokioNetworkProvider, rpc_messages,
};

rpc_messages! {
    /// Text to echo back.
    pub struct EchoRequest {
        pub text: String,
    }

    /// The echoed text.
    pub struct EchoReply {
        pub text: String,
    }

    /// Ask for `chunks` buffers of `chunk_size` bytes each.
    pub struct FillRequest {
        pub chunks: u32,
        pub chunk_size: u32,
    }
}

/// Filled buffers, carried as a blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReply {
    pub chunks: u32,
    pub data: Blob,
}

impl RpcMessage for FillReply {
    fn blob(&mut self) -> Option<&mut Blob> {
        Some(&mut self.data)
    }
}

async fn fill(req: FillRequest) -> Result<FillReply, HandlerError> {
    if req.chunk_size > 1 << 20 {
        return Err(HandlerError::new("chunk_size above 1 MiB"));
    }
    let iov = (0..req.chunks)
        .map(|i| Bytes::from(vec![(i % 256) as u8; req.chunk_size as usize]))
        .collect::<Vec<_>>();
    Ok(FillReply {
        chunks: req.chunks,
        data: Blob::from(iov),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let provider = TokioNetworkProvider::new();
    let registrar: Arc<dyn Registrar> = Arc::new(MemoryRegistrar::new());

    let server = RpcServer::builder(JsonCodec)
        .expose(Endpoint::new("EchoSrv.Echo", |req: EchoRequest| async move {
            Ok::<_, HandlerError>(EchoReply { text: req.text })
        }))?
        .expose(Endpoint::new("EchoSrv.Fill", fill))?
        .build();

    let listener = provider.bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    let listening = tokio::spawn({
        let server = server.clone();
        async move { server.listen(listener).await }
    });
    server
        .publish("name/echo-srv", registrar.clone(), &address)
        .await?;

    let resolved = registrar.lookup("name/echo-srv").await?;
    let config = ClientConfig::default().with_call_timeout(Duration::from_secs(5));
    let client = RpcClient::connect(&provider, &resolved, JsonCodec, config).await?;

    let reply: EchoReply = client
        .call(
            "EchoSrv.Echo",
            EchoRequest {
                text: "hello, skein".to_string(),
            },
        )
        .await?;
    tracing::info!(text = %reply.text, "echo");

    let reply: FillReply = client
        .call(
            "EchoSrv.Fill",
            FillRequest {
                chunks: 4,
                chunk_size: 256 * 1024,
            },
        )
        .await?;
    tracing::info!(
        chunks = reply.chunks,
        buffers = reply.data.len(),
        bytes = reply.data.total_bytes(),
        "fill"
    );

    match client
        .call::<_, EchoReply>("EchoSrv.Missing", EchoRequest { text: String::new() })
        .await
    {
        Err(RpcError::Reply(e)) => tracing::info!(error = %e, "expected failure"),
        other => tracing::warn!(?other, "unexpected outcome"),
    }

    client.close().await?;
    server.shutdown().await;
    listening.await??;
    Ok(())
}
