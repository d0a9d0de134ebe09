//! Transport seam.
//!
//! The connection manager talks to a [`Link`]: a sink and a stream of
//! [`Frame`]s. [`WsConnector`] produces links over tokio-tungstenite; tests
//! plug in their own [`Connector`].

use crate::ClientError;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// The subset of WebSocket frames the channel cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Close with the peer's code, if it sent one.
    Close(Option<u16>),
}

impl Frame {
    fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Close(code) => Message::Close(code.map(|code| CloseFrame {
                code: CloseCode::from(code),
                reason: String::new().into(),
            })),
        }
    }

    fn from_message(msg: Message) -> Option<Frame> {
        match msg {
            Message::Text(text) => {
                let text: &str = &text;
                Some(Frame::Text(text.to_owned()))
            }
            Message::Close(frame) => Some(Frame::Close(frame.map(|f| u16::from(f.code)))),
            // Pings are answered by tungstenite; binary frames are not part of the protocol.
            _ => None,
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ClientError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ClientError>> + Send>>;

/// An open transport.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports for the connection manager.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Link, ClientError>> + Send;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(ClientError::from)
            .with(|frame: Frame| future::ready(Ok::<_, ClientError>(frame.into_message())));
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => Frame::from_message(msg).map(Ok),
                Err(e) => Some(Err(ClientError::from(e))),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
