use std::{borrow::Cow, io, net::SocketAddr, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info};
use machine_learning::dataset::shard_range;
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use crate::{ClusterConfig, ClusterErr, Result};

type NetRx = OnoReceiver<OwnedReadHalf>;
type NetTx = OnoSender<OwnedWriteHalf>;

/// This worker's place in a unidirectional ring: data is sent right and received from the left.
pub(crate) struct Ring {
    rank: usize,
    world_size: usize,
    right: (NetRx, NetTx),
    left: (NetRx, NetTx),
    rx_buf: Vec<f32>,
}

impl Ring {
    /// Connects to the right neighbour and accepts the left one, greeting each link as soon as
    /// it is up.
    ///
    /// Connection attempts are repeated every `connect_interval` until the neighbour listens, the
    /// caller is expected to bound the whole formation with a timeout.
    pub(crate) async fn form(
        listener: TcpListener,
        config: &ClusterConfig,
        connect_interval: Duration,
    ) -> Result<Self> {
        let rank = config.index();
        let world_size = config.world_size();
        let right_addr = config.worker_addr(config.right())?;

        let (right, left) = tokio::try_join!(
            link_right(right_addr, connect_interval, rank, world_size, config.right()),
            link_left(&listener, rank, world_size, config.left()),
        )?;

        info!(rank = rank, world_size = world_size; "ring links established");

        Ok(Self {
            rank,
            world_size,
            right,
            left,
            rx_buf: Vec::new(),
        })
    }

    /// Overwrites `buf` on every worker with the values held by `root`.
    pub(crate) async fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()> {
        if root >= self.world_size {
            return Err(ClusterErr::InvalidConfig(format!(
                "broadcast root {root} is out of range for {} workers",
                self.world_size
            )));
        }

        if self.rank != root {
            let Self {
                left: (from_left, _),
                rx_buf,
                ..
            } = self;

            let payload = recv_payload(from_left, rx_buf).await?;
            buf.copy_from_slice(params(payload, buf.len())?);
        }

        if (self.rank + 1) % self.world_size != root {
            let msg = Msg::Data(Payload::Params(buf));
            self.right.1.send(&msg).await?;
        }

        Ok(())
    }

    /// Ring all-reduce: a reduce-scatter followed by an all-gather over `world_size` chunks.
    pub(crate) async fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()> {
        let n = self.world_size;
        let r = self.rank;
        let len = buf.len();
        let chunk = |c: usize| shard_range(len, c % n, n);

        for step in 0..n - 1 {
            let send = chunk(r + n - step);
            let recv = chunk(r + 2 * n - step - 1);

            let received = self.shift(&buf[send], recv.len()).await?;
            buf[recv]
                .iter_mut()
                .zip(received)
                .for_each(|(b, v)| *b += v);
        }

        for step in 0..n - 1 {
            let send = chunk(r + 1 + n - step);
            let recv = chunk(r + n - step);

            let received = self.shift(&buf[send], recv.len()).await?;
            buf[recv].copy_from_slice(received);
        }

        Ok(())
    }

    /// Passes a barrier token around the ring until every worker has seen all others arrive.
    pub(crate) async fn barrier(&mut self) -> Result<()> {
        let msg = Msg::Control(Command::Barrier);

        for _ in 1..self.world_size {
            let Self {
                right: (_, to_right),
                left: (from_left, _),
                rx_buf,
                ..
            } = self;

            tokio::try_join!(send(to_right, &msg), recv_barrier(from_left, rx_buf))?;
        }

        Ok(())
    }

    /// Tells the right neighbour this worker is leaving and closes the outgoing link.
    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        let tx = &mut self.right.1;
        tx.send(&Msg::Control(Command::Disconnect)).await?;
        tx.shutdown().await?;
        Ok(())
    }

    /// Sends `chunk` to the right while receiving `len` values from the left.
    async fn shift(&mut self, chunk: &[f32], len: usize) -> Result<&[f32]> {
        let Self {
            right: (_, to_right),
            left: (from_left, _),
            rx_buf,
            ..
        } = self;

        let msg = Msg::Data(Payload::Gradient(chunk));
        let (_, payload) = tokio::try_join!(send(to_right, &msg), recv_payload(from_left, rx_buf))?;
        gradient(payload, len)
    }
}

async fn connect(addr: SocketAddr, interval: Duration) -> Result<TcpStream> {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("right neighbour {addr} not reachable yet: {e}");
                time::sleep(interval).await;
            }
        }
    }
}

async fn link_right(
    addr: SocketAddr,
    connect_interval: Duration,
    rank: usize,
    world_size: usize,
    expected: usize,
) -> Result<(NetRx, NetTx)> {
    let stream = connect(addr, connect_interval).await?;
    let mut right = open_channel(stream)?;
    greet_right(&mut right, rank, world_size, expected).await?;
    Ok(right)
}

async fn link_left(
    listener: &TcpListener,
    rank: usize,
    world_size: usize,
    expected: usize,
) -> Result<(NetRx, NetTx)> {
    let (stream, peer) = listener.accept().await?;
    debug!(rank = rank; "accepted left neighbour from {peer}");

    let mut left = open_channel(stream)?;
    greet_left(&mut left, rank, world_size, expected).await?;
    Ok(left)
}

fn open_channel(stream: TcpStream) -> Result<(NetRx, NetTx)> {
    stream.set_nodelay(true)?;
    let (rx, tx) = stream.into_split();
    Ok(comms::channel(rx, tx))
}

async fn greet_right(
    right: &mut (NetRx, NetTx),
    rank: usize,
    world_size: usize,
    expected: usize,
) -> Result<()> {
    let (rx, tx) = right;
    let mut buf = Vec::new();

    tx.send(&Msg::Control(Command::Hello { rank, world_size })).await?;
    let (peer, peer_world) = recv_hello(rx, &mut buf).await?;
    check_peer(rank, world_size, expected, peer, peer_world)
}

async fn greet_left(
    left: &mut (NetRx, NetTx),
    rank: usize,
    world_size: usize,
    expected: usize,
) -> Result<()> {
    let (rx, tx) = left;
    let mut buf = Vec::new();

    let (peer, peer_world) = recv_hello(rx, &mut buf).await?;

    if let Err(e) = check_peer(rank, world_size, expected, peer, peer_world) {
        // best effort, the peer may already be gone
        let reason = Msg::Err(Cow::Owned(format!("rejected by worker {rank}: {e}")));
        let _ = tx.send(&reason).await;
        return Err(e);
    }

    tx.send(&Msg::Control(Command::Hello { rank, world_size })).await?;
    Ok(())
}

fn check_peer(
    rank: usize,
    world_size: usize,
    expected: usize,
    peer: usize,
    peer_world: usize,
) -> Result<()> {
    if peer_world != world_size {
        return Err(ClusterErr::WorldSizeMismatch {
            expected: world_size,
            got: peer_world,
        });
    }

    if peer == rank {
        return Err(ClusterErr::DuplicateIndex { index: rank });
    }

    if peer != expected {
        return Err(ClusterErr::WrongNeighbour {
            expected,
            got: peer,
        });
    }

    Ok(())
}

async fn send(tx: &mut NetTx, msg: &Msg<'_>) -> Result<()> {
    Ok(tx.send(msg).await?)
}

async fn recv_msg<'buf>(rx: &mut NetRx, buf: &'buf mut Vec<f32>) -> Result<Msg<'buf>> {
    rx.recv_into(buf).await.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ClusterErr::PeerDisconnected,
        _ => ClusterErr::Io(e),
    })
}

async fn recv_hello(rx: &mut NetRx, buf: &mut Vec<f32>) -> Result<(usize, usize)> {
    match recv_msg(rx, buf).await? {
        Msg::Control(Command::Hello { rank, world_size }) => Ok((rank, world_size)),
        msg => unexpected("control/hello", &msg),
    }
}

async fn recv_barrier(rx: &mut NetRx, buf: &mut Vec<f32>) -> Result<()> {
    match recv_msg(rx, buf).await? {
        Msg::Control(Command::Barrier) => Ok(()),
        msg => unexpected("control/barrier", &msg),
    }
}

async fn recv_payload<'buf>(rx: &mut NetRx, buf: &'buf mut Vec<f32>) -> Result<Payload<'buf>> {
    match recv_msg(rx, buf).await? {
        Msg::Data(payload) => Ok(payload),
        msg => unexpected("data", &msg),
    }
}

fn unexpected<T>(expected: &'static str, msg: &Msg) -> Result<T> {
    match msg {
        Msg::Control(Command::Disconnect) => Err(ClusterErr::PeerDisconnected),
        Msg::Err(reason) => Err(ClusterErr::PeerFailed(reason.to_string())),
        _ => Err(ClusterErr::UnexpectedMsg {
            expected,
            got: msg.kind(),
        }),
    }
}

fn gradient(payload: Payload<'_>, len: usize) -> Result<&[f32]> {
    match payload {
        Payload::Gradient(values) => check_len(values, len),
        other => unexpected("data/gradient", &Msg::Data(other)),
    }
}

fn params(payload: Payload<'_>, len: usize) -> Result<&[f32]> {
    match payload {
        Payload::Params(values) => check_len(values, len),
        other => unexpected("data/params", &Msg::Data(other)),
    }
}

fn check_len(values: &[f32], len: usize) -> Result<&[f32]> {
    if values.len() != len {
        return Err(ClusterErr::PayloadSize {
            expected: len,
            got: values.len(),
        });
    }

    Ok(values)
}
