//! 请求/响应式的定长头部消息：4 字节状态码、2 字节长度（均为大端），
//! 然后是最多 512 字节的内容。PTY 中继不使用它，留给需要结构化回复的客户端。

use std::io::{self, Read, Write};

use thiserror::Error;

pub const MAX_CONTENT_LENGTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    ResponseOk,
    ResponseFail,
    AuthSuccess,
    AuthFail,
    ConnectionSuccess,
    ConnectionFailure,
    CommandSuccess,
    CommandFail,
}

impl ResponseCode {
    const ALL: [ResponseCode; 8] = [
        ResponseCode::ResponseOk,
        ResponseCode::ResponseFail,
        ResponseCode::AuthSuccess,
        ResponseCode::AuthFail,
        ResponseCode::ConnectionSuccess,
        ResponseCode::ConnectionFailure,
        ResponseCode::CommandSuccess,
        ResponseCode::CommandFail,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ResponseCode {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or(ProtocolError::UnknownCode(value))
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("content is {0} bytes, limit is 512")]
    ContentTooLong(usize),
    #[error("unknown response code {0}")]
    UnknownCode(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: ResponseCode,
    pub content: Vec<u8>,
}

impl Message {
    pub fn new(code: ResponseCode, content: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let content = content.into();
        if content.len() > MAX_CONTENT_LENGTH {
            return Err(ProtocolError::ContentTooLong(content.len()));
        }
        Ok(Self { code, content })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        if self.content.len() > MAX_CONTENT_LENGTH {
            return Err(ProtocolError::ContentTooLong(self.content.len()));
        }
        let mut frame = Vec::with_capacity(6 + self.content.len());
        frame.extend_from_slice(&self.code.as_u32().to_be_bytes());
        frame.extend_from_slice(&(self.content.len() as u16).to_be_bytes());
        frame.extend_from_slice(&self.content);
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut code = [0u8; 4];
        reader.read_exact(&mut code)?;
        let code = ResponseCode::try_from(u32::from_be_bytes(code))?;

        let mut length = [0u8; 2];
        reader.read_exact(&mut length)?;
        let length = u16::from_be_bytes(length) as usize;
        if length > MAX_CONTENT_LENGTH {
            return Err(ProtocolError::ContentTooLong(length));
        }

        let mut content = vec![0u8; length];
        reader.read_exact(&mut content)?;
        Ok(Self { code, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_wire_layout() {
        let message = Message::new(ResponseCode::AuthFail, "nope").unwrap();
        let mut wire = Vec::new();
        message.write_to(&mut wire).unwrap();
        assert_eq!(wire, b"\x00\x00\x00\x03\x00\x04nope");

        let decoded = Message::read_from(&mut Cursor::new(wire)).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.text(), "nope");
    }

    #[test]
    fn test_rejects_oversize_and_unknown() {
        assert!(matches!(
            Message::new(ResponseCode::CommandSuccess, vec![b'x'; MAX_CONTENT_LENGTH + 1]),
            Err(ProtocolError::ContentTooLong(513))
        ));

        let unknown = b"\x00\x00\x00\x08\x00\x00".to_vec();
        assert!(matches!(
            Message::read_from(&mut Cursor::new(unknown)),
            Err(ProtocolError::UnknownCode(8))
        ));

        let too_long = b"\x00\x00\x00\x00\x02\x01".to_vec();
        assert!(matches!(
            Message::read_from(&mut Cursor::new(too_long)),
            Err(ProtocolError::ContentTooLong(513))
        ));
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let truncated = b"\x00\x00\x00\x06\x00\x05ab".to_vec();
        assert!(matches!(
            Message::read_from(&mut Cursor::new(truncated)),
            Err(ProtocolError::Io(_))
        ));
    }
}
