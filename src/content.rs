//! Message content shared by requests, responses and the request log.

use std::fmt;

use bytes::Bytes;

/// The payload of a request or a response.
///
/// Plain HTTP messages carry [`Content::Bytes`]. RPC-style calls carry the
/// service and method they invoke so that decorators (tracing in particular)
/// can name the call without decoding the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Content {
    #[default]
    Empty,
    Bytes(Bytes),
    Rpc {
        service: String,
        method: String,
        payload: Bytes,
    },
}

impl Content {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(b) => b.is_empty(),
            Self::Rpc { .. } => false,
        }
    }

    /// Raw payload bytes, if any.
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Empty => None,
            Self::Bytes(b) | Self::Rpc { payload: b, .. } => Some(b),
        }
    }

    /// The RPC method name, when this is an RPC call.
    pub fn rpc_method(&self) -> Option<&str> {
        match self {
            Self::Rpc { method, .. } => Some(method),
            _ => None,
        }
    }
}

impl From<Bytes> for Content {
    fn from(b: Bytes) -> Self {
        if b.is_empty() { Self::Empty } else { Self::Bytes(b) }
    }
}

impl From<Vec<u8>> for Content {
    fn from(v: Vec<u8>) -> Self {
        Bytes::from(v).into()
    }
}

impl From<&'static str> for Content {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

/// Summary rendering used by the logging decorator: UTF-8 payloads are shown
/// verbatim, anything else as a byte count.
impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("<empty>"),
            Self::Bytes(b) => write_payload(f, b),
            Self::Rpc { service, method, payload } => {
                write!(f, "{service}.{method}(")?;
                write_payload(f, payload)?;
                f.write_str(")")
            }
        }
    }
}

fn write_payload(f: &mut fmt::Formatter<'_>, b: &Bytes) -> fmt::Result {
    match std::str::from_utf8(b) {
        Ok(s) => f.write_str(s),
        Err(_) => write!(f, "<{} bytes>", b.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bytes_collapse_to_empty() {
        assert_eq!(Content::from(Vec::new()), Content::Empty);
        assert!(Content::from("").is_empty());
    }

    #[test]
    fn display_summarises_binary_payloads() {
        assert_eq!(Content::from("hello").to_string(), "hello");
        assert_eq!(Content::from(vec![0xff, 0xfe, 0x00]).to_string(), "<3 bytes>");

        let rpc = Content::Rpc {
            service: "Greeter".into(),
            method: "hello".into(),
            payload: Bytes::from_static(b"armeria"),
        };
        assert_eq!(rpc.to_string(), "Greeter.hello(armeria)");
        assert_eq!(rpc.rpc_method(), Some("hello"));
    }
}
