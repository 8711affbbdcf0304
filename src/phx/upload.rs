//! Binary upload-chunk codec.
//!
//! Layout:
//!
//! ```text
//! bytes[0]           = 0   (reserved)
//! bytes[1..=4]       = lengths of join_ref, msg_ref, topic, event
//! bytes[5..5+J+M+T+E] = the four headers, concatenated in that order
//! bytes[5+J+M+T+E..] = opaque payload
//! ```
//!
//! The codec is symmetric: any accepted input re-encodes to the identical
//! byte sequence.

use crate::error::ProtocolError;

/// A parsed binary upload frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMsg {
    pub join_ref: String,
    pub msg_ref: String,
    pub topic: String,
    pub event: String,
    pub payload: Vec<u8>,
}

impl UploadMsg {
    /// Decode a binary frame. The payload is copied out of `data` so the
    /// message may outlive the read buffer.
    pub fn decode(data: &[u8]) -> Result<UploadMsg, ProtocolError> {
        if data.len() < 5 {
            return Err(ProtocolError::ShortBuffer);
        }
        if data[0] != 0 {
            return Err(ProtocolError::BadReservedByte(data[0]));
        }
        let (j, m, t, e) = (
            data[1] as usize,
            data[2] as usize,
            data[3] as usize,
            data[4] as usize,
        );
        let header_len = j + m + t + e;
        if 5 + header_len > data.len() {
            return Err(ProtocolError::BadHeaderLength);
        }

        let header = &data[5..5 + header_len];
        let (join_ref, header) = split_utf8(header, j)?;
        let (msg_ref, header) = split_utf8(header, m)?;
        let (topic, header) = split_utf8(header, t)?;
        let (event, _) = split_utf8(header, e)?;

        Ok(UploadMsg {
            join_ref,
            msg_ref,
            topic,
            event,
            payload: data[5 + header_len..].to_vec(),
        })
    }

    /// Encode to the binary frame layout.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let headers = [
            ("join_ref", &self.join_ref),
            ("msg_ref", &self.msg_ref),
            ("topic", &self.topic),
            ("event", &self.event),
        ];
        let mut buf =
            Vec::with_capacity(5 + headers.iter().map(|(_, h)| h.len()).sum::<usize>() + self.payload.len());
        buf.push(0);
        for (name, header) in headers {
            if header.len() > u8::MAX as usize {
                return Err(ProtocolError::HeaderTooLong(name));
            }
            buf.push(header.len() as u8);
        }
        for (_, header) in headers {
            buf.extend_from_slice(header.as_bytes());
        }
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }
}

fn split_utf8(data: &[u8], len: usize) -> Result<(String, &[u8]), ProtocolError> {
    let (head, rest) = data.split_at(len);
    let s = std::str::from_utf8(head)
        .map_err(|_| ProtocolError::BadHeaderEncoding)?
        .to_string();
    Ok((s, rest))
}
