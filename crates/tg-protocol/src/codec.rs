//! Tokio codec for newline-delimited JSON frames

use std::marker::PhantomData;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::ProtocolError;

/// Maximum length of a single frame (1 MiB)
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Codec decoding `In` frames and encoding `Out` frames, one JSON value per line
#[derive(Debug)]
pub struct JsonLinesCodec<In, Out> {
    lines: LinesCodec,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<In, Out> JsonLinesCodec<In, Out> {
    /// Create a new codec with the default maximum frame length
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    /// Create a new codec with a custom maximum frame length
    pub fn with_max_length(max: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max),
            _marker: PhantomData,
        }
    }

    fn map_error(&self, e: LinesCodecError) -> ProtocolError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLarge {
                max: self.lines.max_length(),
            },
            LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                ProtocolError::InvalidUtf8
            }
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

impl<In, Out> Default for JsonLinesCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned, Out> Decoder for JsonLinesCodec<In, Out> {
    type Item = In;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = match self.lines.decode(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None), // Need more data
                Err(e) => return Err(self.map_error(e)),
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(Some(serde_json::from_str(trimmed)?));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode_eof(src) {
            Ok(Some(line)) if !line.trim().is_empty() => Ok(Some(serde_json::from_str(line.trim())?)),
            Ok(_) => Ok(None),
            Err(e) => Err(self.map_error(e)),
        }
    }
}

impl<In, Out: Serialize> Encoder<Out> for JsonLinesCodec<In, Out> {
    type Error = ProtocolError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&item)?;
        dst.reserve(json.len() + 1);
        dst.extend_from_slice(json.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}
