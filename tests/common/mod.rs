use std::net::SocketAddr;
use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::{executable, ExecutableDocument, Schema};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use graphql_ws_server::{
    ExecutionRequest, Executor, GraphqlError, OperationContext, Response, Server, ServerOptions,
};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

#[allow(dead_code)]
pub(crate) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[allow(dead_code)]
pub(crate) static SCHEMA_SDL: &str = r"
type Query {
  getFoo: Int
}

type Mutation {
  setFoo(value: Int): Boolean
}

type Subscription {
  fooUpdates: Int
  forever: Int
}
";

/// A hand-rolled executor over the test schema: `getFoo` yields 123,
/// `setFoo` reports whether its argument was supplied, `fooUpdates` streams
/// 1, 2, 3 and completes, `forever` never yields.
pub(crate) struct TestExecutor;

#[async_trait]
impl Executor for TestExecutor {
    async fn execute(&self, _ctx: Arc<OperationContext>, request: ExecutionRequest) -> Response {
        match first_field(&request.document) {
            Some(field) if field.name.as_str() == "getFoo" => {
                Response::from_data(json!({"getFoo": 123}))
            }
            Some(field) if field.name.as_str() == "setFoo" => {
                let has_value = field
                    .arguments
                    .iter()
                    .any(|argument| argument.name.as_str() == "value");
                Response::from_data(json!({"setFoo": has_value}))
            }
            _ => Response::from_errors(vec![GraphqlError::new("unknown root field")]),
        }
    }

    async fn subscribe(
        &self,
        ctx: Arc<OperationContext>,
        request: ExecutionRequest,
    ) -> Result<mpsc::Receiver<Response>, Response> {
        match first_field(&request.document).map(|field| field.name.as_str()) {
            Some("fooUpdates") => {
                let (sender, receiver) = mpsc::channel(1);
                tokio::spawn(async move {
                    for n in 1..=3 {
                        let response = Response::from_data(json!({"fooUpdates": n}));
                        if sender.send(response).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(receiver)
            }
            Some("forever") => {
                let (sender, receiver) = mpsc::channel(1);
                tokio::spawn(async move {
                    // keep the stream open, yielding nothing, until cancelled
                    ctx.cancelled().await;
                    drop(sender);
                });
                Ok(receiver)
            }
            _ => Err(Response::from_errors(vec![GraphqlError::new(
                "unknown subscription field",
            )])),
        }
    }
}

fn first_field(
    document: &Valid<ExecutableDocument>,
) -> Option<&apollo_compiler::Node<executable::Field>> {
    let operation = document.operations.iter().next()?;
    operation
        .selection_set
        .selections
        .iter()
        .find_map(|selection| match selection {
            executable::Selection::Field(field) => Some(field),
            _ => None,
        })
}

#[allow(dead_code)]
pub(crate) struct TestServer {
    pub(crate) address: SocketAddr,
    pub(crate) server_handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestServer {
    pub(crate) fn http_url(&self) -> String {
        format!("http://{}/graphql", self.address)
    }
}

#[allow(dead_code)]
pub(crate) async fn start_server(options: ServerOptions) -> TestServer {
    let schema = Arc::new(
        Schema::parse_and_validate(SCHEMA_SDL, "schema.graphql").expect("valid test schema"),
    );
    let server = Server::new(schema, Arc::new(TestExecutor), options);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let address = listener.local_addr().expect("listener address");

    let server_handle = tokio::spawn(async move {
        let app = axum::Router::new().route(
            "/graphql",
            axum::routing::any(move |request: axum::extract::Request| {
                let server = server.clone();
                async move { server.handle(request).await }
            }),
        );
        axum::serve(listener, app).await.expect("serve test app");
    });

    TestServer {
        address,
        server_handle,
    }
}

#[allow(dead_code)]
pub(crate) async fn connect(server: &TestServer, subprotocol: &str) -> Socket {
    let url = format!("ws://{}/graphql", server.address);
    let mut request = url.into_client_request().expect("client request");
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        subprotocol.parse().expect("subprotocol header"),
    );
    let (socket, _response) = connect_async(request)
        .await
        .expect("Failed to connect to WebSocket server");
    socket
}

#[allow(dead_code)]
pub(crate) async fn send_json(socket: &mut Socket, message: &serde_json::Value) {
    let text = serde_json::to_string(message).expect("serialize test message");
    socket
        .send(tungstenite::Message::Text(text))
        .await
        .expect("send test message");
}

#[allow(dead_code)]
pub(crate) async fn expect_json(socket: &mut Socket) -> serde_json::Value {
    let message = next_message(socket).await;
    let tungstenite::Message::Text(text) = message else {
        panic!("expected text message, got {message:?}");
    };
    serde_json::from_str(&text).expect("valid JSON message")
}

#[allow(dead_code)]
pub(crate) async fn expect_close(socket: &mut Socket) -> (u16, String) {
    loop {
        match next_message(socket).await {
            tungstenite::Message::Close(Some(frame)) => {
                return (frame.code.into(), frame.reason.into_owned());
            }
            tungstenite::Message::Close(None) => return (1005, String::new()),
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {}
            other => panic!("expected close message, got {other:?}"),
        }
    }
}

#[allow(dead_code)]
async fn next_message(socket: &mut Socket) -> tungstenite::Message {
    let frame = tokio::time::timeout(std::time::Duration::from_secs(10), socket.next())
        .await
        .expect("timed out waiting for websocket message")
        .expect("socket closed unexpectedly");
    frame.expect("websocket read error")
}

#[allow(dead_code)]
pub(crate) async fn init_connection(socket: &mut Socket) {
    send_json(socket, &json!({"type": "connection_init", "payload": {}})).await;
    let ack = expect_json(socket).await;
    assert_eq!(ack, json!({"type": "connection_ack"}));
}
