use std::str::Utf8Error;

#[derive(Debug)]
pub enum Error {
    /// A frame was truncated, oversized, or otherwise not shaped like the
    /// wire format in spec section 6.
    InvalidInput,
    /// A signed varint's length byte claimed more bytes than fit in an i64.
    VarintTooWide,
    /// The integer decoded from the wire does not name a known
    /// `CubeAddress` or `MessageType` tag.
    UnknownTag(i64),
    Utf8Error(Utf8Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}
