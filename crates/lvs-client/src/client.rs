//! Connection loop driving a [`Page`] from the sync channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lvs_protocol::{ClientMessage, ConsolePayload, STATUS_PATH, SyncInstruction, WS_PATH};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::ClientError;
use crate::dispatch::{Applied, Dispatcher};
use crate::page::Page;
use crate::reconnect::{BASE_BACKOFF, Opened, Reconnect};
use crate::status::{STATUS_ATTEMPTS, STATUS_INTERVAL, wait_until_ready};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const GIVE_UP_BANNER: &str = "Lost connection to the development server";

/// Why [`SyncClient::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    /// The page reloaded or navigated away.
    Left,
    /// The status endpoint never reported ready; the page was reloaded.
    ServerUnavailable,
    /// Reconnect attempts ran out.
    GaveUp,
}

/// Client for one development server.
#[derive(Debug)]
pub struct SyncClient {
    status_url: Url,
    ws_url: Url,
    http: reqwest::Client,
    status_attempts: u32,
    status_interval: Duration,
    backoff: Duration,
}

impl SyncClient {
    /// Client for the server at `base`, e.g. `http://127.0.0.1:5555/`.
    pub fn new(base: &str) -> Result<Self, ClientError> {
        let base = Url::parse(base)?;
        let ws_scheme = match base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ClientError::UnsupportedScheme(other.to_owned())),
        };

        let status_url = base.join(STATUS_PATH)?;
        let mut ws_url = base.join(WS_PATH)?;
        ws_url
            .set_scheme(ws_scheme)
            .map_err(|()| ClientError::UnsupportedScheme(ws_scheme.to_owned()))?;

        Ok(Self {
            status_url,
            ws_url,
            http: reqwest::Client::new(),
            status_attempts: STATUS_ATTEMPTS,
            status_interval: STATUS_INTERVAL,
            backoff: BASE_BACKOFF,
        })
    }

    /// Override the readiness poll.
    #[must_use]
    pub fn with_status_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.status_attempts = attempts;
        self.status_interval = interval;
        self
    }

    /// Override the first reconnect delay.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    /// Keep the page in sync until it leaves or the server is gone.
    ///
    /// Console payloads from `console` are forwarded once the server asks
    /// for remote logs; until then they are discarded.
    pub async fn run<P: Page>(
        &self,
        dispatcher: &mut Dispatcher<P>,
        console: &mut mpsc::UnboundedReceiver<ConsolePayload>,
    ) -> Exit {
        let ready = wait_until_ready(
            &self.http,
            self.status_url.as_str(),
            self.status_attempts,
            self.status_interval,
        )
        .await;
        if !ready {
            tracing::warn!(url = %self.status_url, "Server never became ready");
            dispatcher.page_mut().reload();
            return Exit::ServerUnavailable;
        }

        let mut reconnect = Reconnect::with_base(self.backoff);
        loop {
            reconnect.begin_attempt();
            match tokio_tungstenite::connect_async(self.ws_url.as_str()).await {
                Ok((socket, _)) => {
                    if reconnect.on_open() == Opened::Reconnected {
                        tracing::info!("Reconnected, reloading page");
                        dispatcher.page_mut().reload();
                        return Exit::Left;
                    }
                    tracing::debug!(url = %self.ws_url, "Sync channel open");
                    dispatcher.cache_body();
                    if let Some(exit) = session(socket, dispatcher, console).await {
                        return exit;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "Connect attempt failed"),
            }

            let Some(delay) = reconnect.on_close() else {
                tracing::warn!(attempts = reconnect.attempts(), "Giving up on sync channel");
                dispatcher.page_mut().show_banner(GIVE_UP_BANNER, true);
                return Exit::GaveUp;
            };
            tracing::debug!(attempt = reconnect.attempts(), ?delay, "Reconnecting");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Serve one open channel. Returns `None` when the channel closes.
async fn session<P: Page>(
    socket: Socket,
    dispatcher: &mut Dispatcher<P>,
    console: &mut mpsc::UnboundedReceiver<ConsolePayload>,
) -> Option<Exit> {
    let (mut sink, mut stream) = socket.split();

    for file in dispatcher.page().files() {
        let announce = ClientMessage::File { file }.to_wire();
        if let Err(e) = sink.send(Message::text(announce)).await {
            tracing::debug!(error = %e, "Failed to announce file");
            return None;
        }
    }

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match SyncInstruction::from_wire(text.as_str()) {
                        Ok(instruction) => {
                            if dispatcher.apply(instruction) == Applied::Left {
                                return Some(Exit::Left);
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "Dropping malformed instruction"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Sync channel error");
                    return None;
                }
            },
            Some(payload) = console.recv() => {
                if !dispatcher.remote_logs() {
                    continue;
                }
                let message = ClientMessage::Console { console: payload }.to_wire();
                if let Err(e) = sink.send(Message::text(message)).await {
                    tracing::debug!(error = %e, "Failed to forward console output");
                    return None;
                }
            }
        }
    }
}
