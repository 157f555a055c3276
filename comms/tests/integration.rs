use comms::msg::{Command, Msg, Payload};
use tokio::io;

#[tokio::test]
async fn gradient_payload_arrives_intact() {
    const SIZE: usize = 128;

    let grad = [0.5_f32, -1.25, 3.0, 1e-3];
    let msg = Msg::Data(Payload::Gradient(&grad));

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let (rx2, tx2) = io::split(two);
    let (mut rx, _) = comms::channel(rx2, tx2);

    let send = tx.send(&msg);
    let mut buf: Vec<f32> = Vec::new();
    let recv = rx.recv_into::<Msg, _>(&mut buf);

    let (sent, received) = tokio::join!(send, recv);
    sent.unwrap();

    match received.unwrap() {
        Msg::Data(Payload::Gradient(got)) => assert_eq!(got, grad),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn frames_are_received_in_order() {
    let (one, two) = io::duplex(1024);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let (rx2, tx2) = io::split(two);
    let (mut rx, _) = comms::channel(rx2, tx2);

    let hello = Msg::Control(Command::Hello {
        rank: 0,
        world_size: 2,
    });
    let params = [1.0_f32, 2.0];

    tx.send(&hello).await.unwrap();
    tx.send(&Msg::Data(Payload::Params(&params))).await.unwrap();
    tx.send(&Msg::Control(Command::Disconnect)).await.unwrap();

    let mut buf: Vec<f32> = Vec::new();
    assert_eq!(rx.recv_into::<Msg, _>(&mut buf).await.unwrap(), hello);

    let mut buf: Vec<f32> = Vec::new();
    let got: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(got, Msg::Data(Payload::Params(&params)));

    let mut buf: Vec<f32> = Vec::new();
    let got: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(got, Msg::Control(Command::Disconnect));
}

#[tokio::test]
async fn closed_stream_is_an_error() {
    let (one, two) = io::duplex(64);
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf: Vec<f32> = Vec::new();
    let err = rx.recv_into::<Msg, _>(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}
