use crate::models::ChatId;
use crate::services::ChatService;
use crate::state::AppState;
use crate::websocket::message_types::{SendMessagePayload, WsInboundEvent, WsOutboundEvent};
use crate::websocket::{ConnectionRegistry, SubscriberId};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

// Payload fanned out to this connection through the registry
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct BroadcastMessage(String);

// Reply addressed to this connection only
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

struct WsSession {
    subscriber_id: SubscriberId,
    registry: ConnectionRegistry,
    chat: ChatService,
    hb: Instant,
}

impl WsSession {
    fn new(subscriber_id: SubscriberId, registry: ConnectionRegistry, chat: ChatService) -> Self {
        Self {
            subscriber_id,
            registry,
            chat,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(
                    subscriber = ?act.subscriber_id,
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &WsOutboundEvent) {
        match serde_json::to_string(event) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!(error = %e, "failed to encode outbound event"),
        }
    }

    fn join_chat(&self, chat_id: Option<String>, ctx: &mut ws::WebsocketContext<Self>) {
        let chat_id = match chat_id.as_deref().map(ChatId::from_raw) {
            Some(Ok(id)) => id,
            Some(Err(e)) => {
                return Self::send_event(ctx, &WsOutboundEvent::error(e.public_message()))
            }
            None => return Self::send_event(ctx, &WsOutboundEvent::error("chatId is required")),
        };

        let registry = self.registry.clone();
        let subscriber_id = self.subscriber_id;
        actix::spawn(async move {
            if registry.subscribe(subscriber_id, &chat_id).await {
                tracing::info!(subscriber = ?subscriber_id, chat_id = %chat_id, "user joined chat");
            }
        });
    }

    fn send_message(&self, payload: SendMessagePayload, ctx: &mut ws::WebsocketContext<Self>) {
        let chat = self.chat.clone();
        let addr = ctx.address();

        actix::spawn(async move {
            let result = chat
                .send_message(
                    payload.sender_id.as_deref(),
                    payload.receiver_id.as_deref(),
                    payload.message.as_deref(),
                )
                .await;

            match result {
                Ok(sent) => {
                    if let Some(claimed) = payload.chat_id.as_deref() {
                        if claimed != sent.chat_id.as_str() {
                            tracing::warn!(
                                claimed,
                                chat_id = %sent.chat_id,
                                "client chatId does not match participants, used derived id"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket sendMessage failed");
                    let frame = WsOutboundEvent::error(e.public_message());
                    if let Ok(text) = serde_json::to_string(&frame) {
                        addr.do_send(TextMessage(text));
                    }
                }
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(subscriber = ?self.subscriber_id, "WebSocket session started");
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(subscriber = ?self.subscriber_id, "WebSocket session stopped");

        let registry = self.registry.clone();
        let subscriber_id = self.subscriber_id;
        actix::spawn(async move {
            registry.disconnect(subscriber_id).await;
        });
    }
}

impl Handler<BroadcastMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: BroadcastMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<WsInboundEvent>(&text) {
                    Ok(WsInboundEvent::JoinChat(payload)) => self.join_chat(payload.chat_id, ctx),
                    Ok(WsInboundEvent::SendMessage(payload)) => self.send_message(payload, ctx),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to parse WS message");
                        Self::send_event(ctx, &WsOutboundEvent::error("Invalid event"));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary WebSocket messages not supported");
                Self::send_event(ctx, &WsOutboundEvent::error("Binary frames are not supported"));
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// GET /chat/ws
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (subscriber_id, mut rx) = state.registry.connect().await;
    let session = WsSession::new(subscriber_id, state.registry.clone(), state.chat.clone());

    let started = ws::WsResponseBuilder::new(session, &req, stream).start_with_addr();
    let (addr, resp) = match started {
        Ok(started) => started,
        Err(e) => {
            state.registry.disconnect(subscriber_id).await;
            return Err(e);
        }
    };

    // Bridge the registry channel into the actor; ends when the registry
    // drops this connection's sender.
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if !addr.connected() {
                break;
            }
            addr.do_send(BroadcastMessage(payload));
        }
    });

    Ok(resp)
}
