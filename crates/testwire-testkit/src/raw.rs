//! One end of a stream driven frame by frame, for playing a misbehaving or
//! minimal peer against a real connection.

use testwire::wire::{
    CancelNotice, Command, Element, Frame, FrameReader, FrameWriter, Handshake, Message, Response,
};
use testwire::{CommandKind, ObjectId, SettingsBag, TransportError};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::TestError;

pub struct RawPeer<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> RawPeer<S> {
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    pub async fn next_message(&mut self) -> Result<Message, TestError> {
        match self.reader.read_frame().await? {
            Frame::Document(doc) => Ok(Message::decode(&doc)?),
            Frame::Close => Err(TestError::Assertion("peer closed the stream".into())),
        }
    }

    pub async fn send(&mut self, element: &Element) -> Result<(), TestError> {
        Ok(self.writer.write_document(element).await?)
    }

    /// Play the host: answer the driver's handshake without offering a suite.
    pub async fn answer_handshake(&mut self) -> Result<Handshake, TestError> {
        let Message::Handshake(offer) = self.next_message().await? else {
            return Err(TestError::Assertion("expected a handshake first".into()));
        };
        let reply = Handshake {
            want_statistics_events: offer.want_statistics_events,
            load_test_suite: false,
            settings: Some(offer.settings.clone().unwrap_or_default()),
            event_sink: None,
            test_suite: None,
        };
        self.send(&Message::Handshake(reply).encode()).await?;
        Ok(offer)
    }

    /// Play the driver: offer a bare handshake and return the host's reply.
    pub async fn offer_handshake(&mut self, settings: Option<SettingsBag>) -> Result<Handshake, TestError> {
        let offer = Handshake {
            want_statistics_events: false,
            load_test_suite: false,
            settings,
            event_sink: None,
            test_suite: None,
        };
        self.send(&Message::Handshake(offer).encode()).await?;
        match self.next_message().await? {
            Message::Handshake(reply) => Ok(reply),
            other => Err(TestError::Assertion(format!("expected a handshake, got {other:?}"))),
        }
    }

    /// Send a two-way command under `response_id`.
    pub async fn call(
        &mut self,
        kind: CommandKind,
        instance: ObjectId,
        response_id: i64,
    ) -> Result<(), TestError> {
        let mut command = Command::new(kind).with_instance(instance);
        command.response_id = Some(response_id);
        self.send(&Message::Command(command).encode()).await
    }

    pub async fn cancel(&mut self, response_id: i64) -> Result<(), TestError> {
        self.send(&Message::Cancel(CancelNotice { response_id }).encode())
            .await
    }

    /// Skip notifications until a two-way `kind` call arrives; returns its id.
    pub async fn next_call(&mut self, kind: CommandKind) -> Result<i64, TestError> {
        loop {
            if let Message::Command(command) = self.next_message().await? {
                if let (true, Some(response_id)) = (command.kind == kind, command.response_id) {
                    return Ok(response_id);
                }
            }
        }
    }

    /// Skip everything until the response for `response_id` arrives.
    pub async fn next_response(&mut self, response_id: i64) -> Result<Response, TestError> {
        loop {
            match self.next_message().await? {
                Message::Response(response) if response.response_id == response_id => {
                    return Ok(response);
                }
                Message::Response(response) => {
                    return Err(TestError::Assertion(format!(
                        "response {} arrived while waiting for {response_id}",
                        response.response_id
                    )));
                }
                _ => {}
            }
        }
    }

    /// Whether the other side ends the stream with a close frame or EOF.
    pub async fn sees_close(&mut self) -> bool {
        loop {
            match self.reader.read_frame().await {
                Ok(Frame::Document(_)) => continue,
                Ok(Frame::Close) | Err(TransportError::Closed) => return true,
                Err(_) => return false,
            }
        }
    }
}
