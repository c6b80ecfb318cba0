//! Integration tests for the request-response RPC system.
//!
//! These tests exercise the full call flow over in-memory connections:
//! - Client encoding, blob extraction and waiter registration
//! - Server dispatch on the worker pool
//! - Error responses for unknown methods, bad bodies, handler failures
//! - Cancellation of outstanding calls when the connection goes away

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use skein_transport::{
    Blob, Call, CallId, ClientConfig, Connection, Endpoint, HandlerError, JsonCodec,
    MemoryRegistrar, MessagingError, NetworkProvider, PoolConfig, Registrar, ReplyError,
    RpcClient, RpcError, RpcMessage, RpcServer, ServerConfig, TokioNetworkProvider, Transport,
    TransportConfig, TransportError, rpc_messages,
};
use tokio::io::duplex;

rpc_messages! {
    /// Plain echo request.
    pub struct EchoRequest {
        pub text: String,
    }

    /// Plain echo reply.
    pub struct EchoReply {
        pub text: String,
    }
}

/// Request carrying a payload in its blob field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WriteRequest {
    path: String,
    blob: Blob,
}

impl RpcMessage for WriteRequest {
    fn blob(&mut self) -> Option<&mut Blob> {
        Some(&mut self.blob)
    }
}

/// Reply echoing the payload back through its own blob field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WriteReply {
    path: String,
    size: u64,
    blob: Blob,
}

impl RpcMessage for WriteReply {
    fn blob(&mut self) -> Option<&mut Blob> {
        Some(&mut self.blob)
    }
}

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

async fn buggy_handler(_req: EchoRequest) -> Result<EchoReply, HandlerError> {
    panic!("handler bug")
}

fn echo_server() -> RpcServer<JsonCodec> {
    RpcServer::builder(JsonCodec)
        .with_config(ServerConfig::default().with_pool(PoolConfig::new("test", 2, 8)))
        .expose(Endpoint::new("EchoSrv.Echo", |req: EchoRequest| async move {
            Ok::<_, HandlerError>(EchoReply { text: req.text })
        }))
        .expect("expose echo")
        .expose(Endpoint::new("EchoSrv.Write", |req: WriteRequest| async move {
            Ok::<_, HandlerError>(WriteReply {
                path: req.path,
                size: req.blob.total_bytes() as u64,
                blob: req.blob,
            })
        }))
        .expect("expose write")
        .expose(Endpoint::new("EchoSrv.Fail", |req: EchoRequest| async move {
            Err::<EchoReply, _>(HandlerError::new(format!("refusing {}", req.text)))
        }))
        .expect("expose fail")
        .expose(Endpoint::new("EchoSrv.Panic", buggy_handler))
        .expect("expose panic")
        .expose(Endpoint::new("EchoSrv.Delay", |req: EchoRequest| async move {
            let millis: u64 = req.text.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis % 7)).await;
            Ok::<_, HandlerError>(EchoReply { text: req.text })
        }))
        .expect("expose delay")
        .build()
}

/// Client connected to a freshly started echo server over an in-memory pipe.
fn connected(config: ClientConfig) -> (RpcClient<JsonCodec>, RpcServer<JsonCodec>) {
    let (client_end, server_end) = duplex(256 * 1024);
    let server = echo_server();
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve_connection(server_end).await;
    });
    (RpcClient::new(client_end, JsonCodec, config), server)
}

#[tokio::test]
async fn test_echo_round_trip() {
    init_test_tracing();
    let (client, _server) = connected(ClientConfig::default());

    let reply: EchoReply = client
        .call(
            "EchoSrv.Echo",
            EchoRequest {
                text: "hello".to_string(),
            },
        )
        .await
        .expect("echo");
    assert_eq!(reply.text, "hello");
}

#[tokio::test]
async fn test_blob_travels_beside_the_body() {
    init_test_tracing();
    let (client, _server) = connected(ClientConfig::default());

    let payload = vec![
        Bytes::from(vec![0xAB; 64 * 1024]),
        Bytes::new(),
        Bytes::from_static(b"tail"),
    ];
    let reply: WriteReply = client
        .call(
            "EchoSrv.Write",
            WriteRequest {
                path: "name/data".to_string(),
                blob: Blob::from(payload.clone()),
            },
        )
        .await
        .expect("write");

    assert_eq!(reply.path, "name/data");
    assert_eq!(reply.size, 64 * 1024 + 4);
    assert_eq!(reply.blob.iov, payload);
}

#[tokio::test]
async fn test_unknown_method_fails_alone() {
    init_test_tracing();
    let (client, _server) = connected(ClientConfig::default());
    let client = Arc::new(client);

    let unknown = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call::<_, EchoReply>(
                    "Foo.Bar",
                    EchoRequest {
                        text: "x".to_string(),
                    },
                )
                .await
        })
    };
    let known = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call::<_, EchoReply>(
                    "EchoSrv.Echo",
                    EchoRequest {
                        text: "y".to_string(),
                    },
                )
                .await
        })
    };

    let err = unknown.await.expect("task").expect_err("unknown method");
    assert_eq!(
        err.as_reply(),
        Some(&ReplyError::UnknownMethod {
            method: "Foo.Bar".to_string()
        })
    );
    assert_eq!(known.await.expect("task").expect("echo").text, "y");
}

#[tokio::test]
async fn test_remote_failures_map_to_reply_errors() {
    init_test_tracing();
    let (client, server) = connected(ClientConfig::default());
    let req = || EchoRequest {
        text: "abc".to_string(),
    };

    let err = client
        .call::<_, EchoReply>("EchoSrv.Fail", req())
        .await
        .expect_err("handler error");
    assert_eq!(
        err.as_reply(),
        Some(&ReplyError::Handler {
            message: "refusing abc".to_string()
        })
    );

    let err = client
        .call::<_, EchoReply>("EchoSrv.Panic", req())
        .await
        .expect_err("panic");
    assert!(matches!(
        err.as_reply(),
        Some(ReplyError::HandlerPanicked { message }) if message == "handler bug"
    ));

    // Wrong request type for the endpoint.
    let err = client
        .call::<_, EchoReply>("EchoSrv.Echo", 42u64)
        .await
        .expect_err("invalid request");
    assert!(matches!(
        err.as_reply(),
        Some(ReplyError::InvalidRequest { .. })
    ));

    // Wrong reply type for the caller.
    let err = client
        .call::<_, u64>("EchoSrv.Echo", req())
        .await
        .expect_err("undecodable reply");
    assert!(matches!(err.as_reply(), Some(ReplyError::Serialization { .. })));

    // The server survived all of the above.
    let reply: EchoReply = client.call("EchoSrv.Echo", req()).await.expect("echo");
    assert_eq!(reply.text, "abc");
    assert!(server.pool().worker_count() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_reach_their_own_callers() {
    init_test_tracing();
    let (client, _server) = connected(ClientConfig::default());
    let client = Arc::new(client);

    let mut handles = Vec::new();
    for i in 0..64u64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let reply: EchoReply = client
                .call(
                    "EchoSrv.Delay",
                    EchoRequest {
                        text: i.to_string(),
                    },
                )
                .await
                .expect("call");
            (i, reply.text)
        }));
    }

    for handle in handles {
        let (i, text) = handle.await.expect("task");
        assert_eq!(text, i.to_string());
    }
    assert!(client.transport().calls().is_empty());
}

#[tokio::test]
async fn test_connection_loss_wakes_every_caller() {
    init_test_tracing();
    let (client_end, peer_end) = duplex(64 * 1024);
    let client = Arc::new(RpcClient::new(client_end, JsonCodec, ClientConfig::default()));
    let peer = Transport::new(peer_end, TransportConfig::default());

    let mut callers = Vec::new();
    for i in 0..5 {
        let client = client.clone();
        callers.push(tokio::spawn(async move {
            client
                .call::<_, EchoReply>(
                    "EchoSrv.Echo",
                    EchoRequest {
                        text: i.to_string(),
                    },
                )
                .await
        }));
    }

    // Let every request arrive, then drop the connection without replying.
    for _ in 0..5 {
        peer.read_call().await.expect("request");
    }
    drop(peer);

    for caller in callers {
        let err = caller.await.expect("task").expect_err("connection lost");
        assert!(matches!(
            err.as_reply(),
            Some(ReplyError::ConnectionFailed { .. })
        ));
    }
    assert!(client.transport().calls().is_empty());
}

#[tokio::test]
async fn test_close_fails_outstanding_calls() {
    init_test_tracing();
    let (client_end, peer_end) = duplex(64 * 1024);
    let client = Arc::new(RpcClient::new(client_end, JsonCodec, ClientConfig::default()));
    let peer = Transport::new(peer_end, TransportConfig::default());

    let caller = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call::<_, EchoReply>(
                    "EchoSrv.Echo",
                    EchoRequest {
                        text: "never answered".to_string(),
                    },
                )
                .await
        })
    };
    peer.read_call().await.expect("request");

    client.close().await.expect("close");
    client.close().await.expect("second close");

    let err = caller.await.expect("task").expect_err("closed");
    assert_eq!(
        err.as_reply(),
        Some(&ReplyError::ConnectionFailed {
            reason: TransportError::Closed.to_string()
        })
    );
}

/// Connection whose reads never complete and whose writes always fail.
struct BrokenPipe;

impl tokio::io::AsyncRead for BrokenPipe {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Pending
    }
}

impl tokio::io::AsyncWrite for BrokenPipe {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::task::Poll::Ready(Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

impl Connection for BrokenPipe {
    fn id(&self) -> String {
        "broken".to_string()
    }
}

#[tokio::test]
async fn test_write_failure_reports_call_id() {
    init_test_tracing();
    let client = RpcClient::new(BrokenPipe, JsonCodec, ClientConfig::default());

    let err = client
        .call::<_, EchoReply>(
            "EchoSrv.Echo",
            EchoRequest {
                text: "x".to_string(),
            },
        )
        .await
        .expect_err("write fails");
    match err {
        RpcError::Messaging(MessagingError::Transport(e)) => {
            assert_eq!(e.call_id(), Some(CallId(1)));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert!(client.transport().calls().is_empty());
    assert!(client.transport().is_closed());
}

#[tokio::test]
async fn test_calls_flow_both_ways_on_one_connection() {
    init_test_tracing();
    let (a_end, b_end) = duplex(64 * 1024);

    // Side B exposes the echo service.
    let server_b = echo_server();
    let transport_b = Arc::new(Transport::new(b_end, TransportConfig::default()));
    tokio::spawn({
        let server_b = server_b.clone();
        let transport_b = transport_b.clone();
        async move {
            let _ = server_b.serve(transport_b).await;
        }
    });

    // Side A exposes nothing but serves the connection so responses resolve.
    let server_a = RpcServer::builder(JsonCodec).build();
    let transport_a = Arc::new(Transport::new(a_end, TransportConfig::default()));
    tokio::spawn({
        let server_a = server_a.clone();
        let transport_a = transport_a.clone();
        async move {
            let _ = server_a.serve(transport_a).await;
        }
    });

    let a_to_b = RpcClient::from_transport(transport_a, JsonCodec, ClientConfig::default());
    let reply: EchoReply = a_to_b
        .call(
            "EchoSrv.Echo",
            EchoRequest {
                text: "from a".to_string(),
            },
        )
        .await
        .expect("a calls b");
    assert_eq!(reply.text, "from a");

    let b_to_a = RpcClient::from_transport(transport_b, JsonCodec, ClientConfig::default());
    let err = b_to_a
        .call::<_, EchoReply>(
            "EchoSrv.Echo",
            EchoRequest {
                text: "from b".to_string(),
            },
        )
        .await
        .expect_err("a exposes nothing");
    assert!(matches!(
        err.as_reply(),
        Some(ReplyError::UnknownMethod { .. })
    ));
}

#[tokio::test]
async fn test_tcp_publish_call_and_shutdown() {
    init_test_tracing();
    let provider = TokioNetworkProvider::new();
    let registrar = Arc::new(MemoryRegistrar::new());

    let listener = provider.bind("127.0.0.1:0").await.expect("bind");
    let address = skein_transport::Listener::local_addr(&listener).expect("local addr");

    let server = echo_server();
    let listening = tokio::spawn({
        let server = server.clone();
        async move { server.listen(listener).await }
    });
    server
        .publish("name/echo-srv", registrar.clone(), &address)
        .await
        .expect("publish");

    let resolved = registrar.lookup("name/echo-srv").await.expect("lookup");
    let client = RpcClient::connect(&provider, &resolved, JsonCodec, ClientConfig::default())
        .await
        .expect("connect");
    let reply: EchoReply = client
        .call(
            "EchoSrv.Echo",
            EchoRequest {
                text: "over tcp".to_string(),
            },
        )
        .await
        .expect("echo");
    assert_eq!(reply.text, "over tcp");

    server.shutdown().await;
    assert!(registrar.is_empty());
    listening
        .await
        .expect("listen task")
        .expect("listen returns cleanly");
}

#[tokio::test]
async fn test_raw_frame_gets_matching_response() {
    init_test_tracing();
    let (peer_end, server_end) = duplex(64 * 1024);
    let server = echo_server();
    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.serve_connection(server_end).await;
        }
    });
    let peer = Transport::new(peer_end, TransportConfig::default());

    let body = Bytes::from_static(br#"{"text":"raw"}"#);
    peer.write_call(&Call::request(CallId(900), "EchoSrv.Echo", body.clone(), Vec::new()))
        .await
        .expect("write");

    let reply = peer.read_call().await.expect("reply");
    assert_eq!(reply.id, CallId(900));
    assert_eq!(reply.method, "EchoSrv.Echo");
    assert!(!reply.is_error());
    assert_eq!(reply.body, body);
}
