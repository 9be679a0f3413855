use std::collections::BTreeMap;

use bytes::Bytes;

use super::Error;

/// A RESP2 frame in the Redis protocol.
#[cfg_attr(test, derive(PartialEq))]
#[derive(Clone, Debug)]
pub enum Frame<'a> {
    Simple(&'a str),
    Error(&'a str),
    Integer(i64),
    Bulk(&'a [u8]),
    Null,
    Array(Vec<Frame<'a>>),
}

impl Frame<'_> {
    // Zero copy parser
    //
    // https://redis.io/docs/latest/develop/reference/protocol-spec/
    #[inline]
    pub fn parse(buf: &[u8]) -> Result<Option<Frame<'_>>, Error> {
        Frame::parse_with_pos(buf, &mut 0)
    }

    fn parse_with_pos<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Option<Frame<'a>>, Error> {
        // buf is too short,
        // the shortest frame is an empty simple string `+\r\n`
        if buf.len() - *pos < 1 + 2 {
            return Ok(None);
        }

        let typ = buf[*pos];
        *pos += 1;

        match typ {
            b'+' => match read_line(buf, pos)? {
                Some(line) => Ok(Some(Frame::Simple(line))),
                None => Ok(None),
            },
            b'-' => match read_line(buf, pos)? {
                Some(line) => Ok(Some(Frame::Error(line))),
                None => Ok(None),
            },
            b':' => match read_line(buf, pos)? {
                Some(line) => Ok(Some(Frame::Integer(line.parse::<i64>()?))),
                None => Ok(None),
            },
            b'$' => {
                let len = match read_line(buf, pos)? {
                    Some("-1") => return Ok(Some(Frame::Null)),
                    Some(line) => line.parse::<usize>()?,
                    None => return Ok(None),
                };

                if buf.len() - *pos < len + 2 {
                    return Ok(None);
                }

                let data = &buf[*pos..*pos + len];
                if &buf[*pos + len..*pos + len + 2] != b"\r\n" {
                    return Err(Error::Parse("bulk string is not terminated".to_string()));
                }
                *pos += len + 2;

                Ok(Some(Frame::Bulk(data)))
            }
            b'*' => {
                let len = match read_line(buf, pos)? {
                    Some("-1") => return Ok(Some(Frame::Null)),
                    Some(line) => line.parse::<usize>()?,
                    None => return Ok(None),
                };

                let mut frames = Vec::with_capacity(len);
                for _ in 0..len {
                    match Frame::parse_with_pos(buf, pos)? {
                        Some(frame) => frames.push(frame),
                        None => return Ok(None),
                    }
                }

                Ok(Some(Frame::Array(frames)))
            }
            _ => Err(Error::UnknownFrameType),
        }
    }
}

#[inline]
fn read_until_crlf(buf: &[u8], pos: &mut usize) -> Option<(usize, usize)> {
    let start = *pos;
    let len = buf[start..]
        .windows(2)
        .position(|window| window == b"\r\n")?;

    *pos += len + 2;

    Some((start, start + len))
}

#[inline]
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Option<&'a str>, Error> {
    match read_until_crlf(buf, pos) {
        Some((start, end)) => Ok(Some(std::str::from_utf8(&buf[start..end])?)),
        None => Ok(None),
    }
}

/// An owned reply, used where the shape is only known at runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Data(Bytes),
    Status(String),
    /// An error nested in an array, top level errors are returned as `Err`
    Error(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Data(data) => std::str::from_utf8(data).ok(),
            Value::Status(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => self.as_str().and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            _ => self.as_str().and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

pub trait FromFrame: Sized {
    fn from_frame(frame: Frame) -> Result<Self, Error>;
}

impl FromFrame for () {
    fn from_frame(_: Frame) -> Result<(), Error> {
        Ok(())
    }
}

impl FromFrame for Value {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        Ok(match frame {
            Frame::Simple(s) => Value::Status(s.to_string()),
            Frame::Error(err) => Value::Error(err.to_string()),
            Frame::Integer(i) => Value::Int(i),
            Frame::Bulk(b) => Value::Data(Bytes::copy_from_slice(b)),
            Frame::Null => Value::Nil,
            Frame::Array(arr) => Value::Array(
                arr.into_iter()
                    .map(Value::from_frame)
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

impl FromFrame for i64 {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Integer(value) => Ok(value),
            _ => Err(Error::UnexpectedReply("integer")),
        }
    }
}

impl FromFrame for String {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Simple(s) => Ok(s.to_string()),
            Frame::Bulk(b) => Ok(std::str::from_utf8(b)?.to_string()),
            _ => Err(Error::UnexpectedReply("string")),
        }
    }
}

impl<T: FromFrame> FromFrame for Option<T> {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Null => Ok(None),
            frame => T::from_frame(frame).map(Some),
        }
    }
}

impl<T: FromFrame> FromFrame for Vec<T> {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Array(arr) => arr
                .into_iter()
                .map(|item| FromFrame::from_frame(item))
                .collect::<Result<Vec<T>, Error>>(),
            _ => Err(Error::UnexpectedReply("array")),
        }
    }
}

/// Flat `[k1, v1, k2, v2, ...]` replies, as returned by `SENTINEL master`.
/// Integer values are rendered as strings, nested values are skipped.
impl FromFrame for BTreeMap<String, String> {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        let Frame::Array(arr) = frame else {
            return Err(Error::UnexpectedReply("array"));
        };

        if arr.len() % 2 != 0 {
            return Err(Error::Parse(
                "array length is not divisible by 2".to_string(),
            ));
        }

        let mut map = BTreeMap::new();
        let mut arr = arr.into_iter();
        while let (Some(key), Some(value)) = (arr.next(), arr.next()) {
            let key = String::from_frame(key)?;
            let value = match value {
                Frame::Simple(s) => s.to_string(),
                Frame::Bulk(b) => std::str::from_utf8(b)?.to_string(),
                Frame::Integer(i) => i.to_string(),
                _ => continue,
            };

            map.insert(key, value);
        }

        Ok(map)
    }
}

/// Like the string map, but keeps nested values, used by `MEMORY STATS`.
impl FromFrame for Vec<(String, Value)> {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        let Frame::Array(arr) = frame else {
            return Err(Error::UnexpectedReply("array"));
        };

        let mut pairs = Vec::with_capacity(arr.len() / 2);
        let mut arr = arr.into_iter();
        while let (Some(key), Some(value)) = (arr.next(), arr.next()) {
            pairs.push((String::from_frame(key)?, Value::from_frame(value)?));
        }

        Ok(pairs)
    }
}
