//! A scripted exchange written and read through real frame I/O.

use testwire_core::{
    CancelNotice, Command, CommandKind, Frame, FrameReader, FrameWriter, Handshake, Message,
    ObjectId, ObjectRef, ObjectType, Response, SettingsBag, TestName, TestResult, TransportError,
    WireValue,
};

fn script() -> Vec<Message> {
    let mut settings = SettingsBag::new();
    settings.set_log_level(2);
    let mut run = Command::new(CommandKind::Run).with_instance(ObjectId(3));
    run.response_id = Some(-4);
    vec![
        Message::Handshake(Handshake {
            want_statistics_events: true,
            load_test_suite: true,
            settings: Some(settings),
            event_sink: Some(ObjectRef::new(ObjectType::EventSink, ObjectId(-1))),
            test_suite: None,
        }),
        Message::Command(run),
        Message::Cancel(CancelNotice { response_id: -4 }),
        Message::Response(Response::canceled(-4)),
        Message::Response(Response::success(
            -5,
            Some(TestResult::success(TestName::new("passes")).encode()),
        )),
    ]
}

#[tokio::test]
async fn messages_survive_the_stream_in_order() {
    let (near, far) = tokio::io::duplex(256);
    let sent = script();

    let writer = tokio::spawn({
        let sent = sent.clone();
        async move {
            let mut writer = FrameWriter::new(near);
            for message in &sent {
                writer.write_document(&message.encode()).await?;
            }
            writer.close().await
        }
    });

    let mut reader = FrameReader::new(far);
    let mut received = Vec::new();
    loop {
        match reader.read_frame().await.unwrap() {
            Frame::Document(doc) => received.push(Message::decode(&doc).unwrap()),
            Frame::Close => break,
        }
    }
    writer.await.unwrap().unwrap();

    assert_eq!(received, sent);
    // Nothing follows the close frame.
    assert!(matches!(reader.read_frame().await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn small_frame_limit_rejects_large_documents() {
    let (near, far) = tokio::io::duplex(4096);
    let mut writer = FrameWriter::new(near);
    let big = TestResult::success(TestName::new("x".repeat(512)));
    writer.write_document(&big.encode()).await.unwrap();

    let mut reader = FrameReader::with_max_frame_len(far, 128);
    match reader.read_frame().await {
        Err(TransportError::FrameTooLarge { max, .. }) => assert_eq!(max, 128),
        other => panic!("expected FrameTooLarge, got {other:?}"),
    }
}
