use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const GRADIENT: Header = 2;
const PARAMS: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, PartialEq)]
pub enum Payload<'a> {
    /// A (partial) gradient travelling around the all-reduce ring.
    Gradient(&'a [f32]),
    /// Model parameters being broadcast from a root replica.
    Params(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// First message on a fresh ring link, sent by both ends.
    Hello { rank: usize, world_size: usize },
    Barrier,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name for the message kind, meant for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Barrier) => "control/barrier",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Gradient(_)) => "data/gradient",
            Msg::Data(Payload::Params(_)) => "data/params",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());

                // SAFETY: `Command` derives `Serialize` and holds no map with non-string keys,
                //         so writing it into a `Vec` cannot fail.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Gradient(grad) => (GRADIENT, *grad),
                    Payload::Params(params) => (PARAMS, *params),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind) {
            ERR => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            kind @ (GRADIENT | PARAMS) => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Malformed f32 payload of {} bytes: {err}", rest.len()),
                    )
                })?;

                let payload = match kind {
                    GRADIENT => Payload::Gradient(nums),
                    _ => Payload::Params(nums),
                };

                Ok(Self::Data(payload))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_body(msg: &Msg<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).map(<[u8]>::to_vec).unwrap_or_default();
        buf.extend(tail);
        buf
    }

    #[test]
    fn control_message_survives_the_codec() {
        let msg = Msg::Control(Command::Hello {
            rank: 1,
            world_size: 3,
        });

        let body = frame_body(&msg);
        assert_eq!(Msg::deserialize(&body).unwrap(), msg);
    }

    #[test]
    fn error_message_is_sent_as_raw_utf8() {
        let msg = Msg::Err(Cow::Borrowed("duplicate task index"));
        let body = frame_body(&msg);

        assert_eq!(&body[HEADER_SIZE..], b"duplicate task index");
        assert_eq!(Msg::deserialize(&body).unwrap(), msg);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = Msg::deserialize(&[0, 0]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = Msg::deserialize(&[0, 0, 0, 9]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn kind_names_every_variant() {
        assert_eq!(Msg::Control(Command::Barrier).kind(), "control/barrier");
        assert_eq!(Msg::Data(Payload::Params(&[])).kind(), "data/params");
    }
}
