use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{
    error::RelayError,
    relay::{RelayChannel, RelayConnector},
};

/// Connects to the relay over WebSocket, exchanging JSON as text frames.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self) -> Result<RelayChannel, RelayError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        let (write, read) = socket.split();

        // Control frames are answered by tungstenite itself.
        let inbound = read.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                Ok(_) => None,
                Err(err) => Some(Err(RelayError::from(err))),
            }
        });

        let outbound = write
            .sink_map_err(RelayError::from)
            .with(|text: String| async move { Ok::<_, RelayError>(Message::Text(text)) });

        Ok(RelayChannel {
            inbound: Box::pin(inbound),
            outbound: Box::pin(outbound),
        })
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
