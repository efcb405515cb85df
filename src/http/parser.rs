use crate::http::request::{Header, Method, Request};

/// Default ceiling on the size of a request line plus header block.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid request method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidTarget,
    #[error("invalid or missing protocol version")]
    InvalidVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("request header block exceeds {0} bytes")]
    HeadersTooLarge(usize),
}

/// Outcome of feeding bytes to [`RequestParser::parse_headers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// Every byte was consumed and the header block is not finished yet.
    Incomplete,
    /// The header block ended after `consumed` bytes of this input; the rest
    /// belongs to the body.
    Complete { consumed: usize },
    /// The input is not a valid HTTP/1.x request head.
    Failed(ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    MethodStart,
    Method,
    Target,
    Version,
    RequestLineLf,
    HeaderLineStart,
    HeaderName,
    HeaderValueStart,
    HeaderValue,
    HeaderLineLf,
    FinalLf,
    Done,
}

/// Incremental request-head parser.
///
/// The parser carries only its logical position between calls, so each
/// call may be handed a different buffer (for example the next socket
/// read). Bytes are never scanned twice.
#[derive(Debug)]
pub struct RequestParser {
    state: State,
    scratch: Vec<u8>,
    continuation: bool,
    seen: usize,
    max_header_bytes: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES)
    }
}

impl RequestParser {
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            state: State::MethodStart,
            scratch: Vec::new(),
            continuation: false,
            seen: 0,
            max_header_bytes,
        }
    }

    /// Returns the parser to its initial state so it can read another request.
    pub fn reset(&mut self) {
        self.state = State::MethodStart;
        self.scratch.clear();
        self.continuation = false;
        self.seen = 0;
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feeds `input` into the parser, filling `request` as tokens complete.
    pub fn parse_headers(&mut self, request: &mut Request, input: &[u8]) -> ParseResult {
        if self.state == State::Done {
            return ParseResult::Complete { consumed: 0 };
        }

        for (i, &byte) in input.iter().enumerate() {
            self.seen += 1;
            if self.seen > self.max_header_bytes {
                return ParseResult::Failed(ParseError::HeadersTooLarge(self.max_header_bytes));
            }

            if let Err(e) = self.consume(request, byte) {
                return ParseResult::Failed(e);
            }

            if self.state == State::Done {
                return ParseResult::Complete { consumed: i + 1 };
            }
        }

        ParseResult::Incomplete
    }

    fn consume(&mut self, request: &mut Request, byte: u8) -> Result<(), ParseError> {
        match self.state {
            State::MethodStart => match byte {
                // Stray CRLFs before the request line are tolerated.
                b'\r' | b'\n' => {}
                b if is_token(b) => {
                    self.scratch.push(b);
                    self.state = State::Method;
                }
                _ => return Err(ParseError::InvalidMethod),
            },

            State::Method => match byte {
                b' ' => {
                    let token = std::str::from_utf8(&self.scratch).map_err(|_| ParseError::InvalidMethod)?;
                    request.method = Method::from_str(token).ok_or(ParseError::InvalidMethod)?;
                    self.scratch.clear();
                    self.state = State::Target;
                }
                b if is_token(b) => self.scratch.push(b),
                _ => return Err(ParseError::InvalidMethod),
            },

            State::Target => match byte {
                b' ' if self.scratch.is_empty() => return Err(ParseError::InvalidTarget),
                b' ' => {
                    request.target = self.take_string();
                    self.state = State::Version;
                }
                b'\r' | b'\n' => return Err(ParseError::InvalidVersion),
                b if is_ctl(b) => return Err(ParseError::InvalidTarget),
                b => self.scratch.push(b),
            },

            State::Version => match byte {
                b'\r' | b'\n' => {
                    if !is_http_version(&self.scratch) {
                        return Err(ParseError::InvalidVersion);
                    }
                    request.version = self.take_string();
                    self.state = if byte == b'\r' {
                        State::RequestLineLf
                    } else {
                        State::HeaderLineStart
                    };
                }
                _ if self.scratch.len() >= 8 => return Err(ParseError::InvalidVersion),
                b => self.scratch.push(b),
            },

            State::RequestLineLf => match byte {
                b'\n' => self.state = State::HeaderLineStart,
                _ => return Err(ParseError::InvalidVersion),
            },

            State::HeaderLineStart => match byte {
                b'\r' => self.state = State::FinalLf,
                b'\n' => self.state = State::Done,
                b' ' | b'\t' => {
                    // obs-fold: this line continues the previous value
                    if request.headers.is_empty() {
                        return Err(ParseError::InvalidHeader);
                    }
                    self.continuation = true;
                    self.state = State::HeaderValueStart;
                }
                b if is_token(b) => {
                    self.scratch.push(b);
                    self.state = State::HeaderName;
                }
                _ => return Err(ParseError::InvalidHeader),
            },

            State::HeaderName => match byte {
                b':' => {
                    let name = self.take_string();
                    request.headers.push(Header::new(name, String::new()));
                    self.state = State::HeaderValueStart;
                }
                b if is_token(b) => self.scratch.push(b),
                _ => return Err(ParseError::InvalidHeader),
            },

            State::HeaderValueStart => match byte {
                b' ' | b'\t' => {}
                b'\r' | b'\n' => self.finish_value(request, byte)?,
                b if is_ctl(b) => return Err(ParseError::InvalidHeader),
                b => {
                    self.scratch.push(b);
                    self.state = State::HeaderValue;
                }
            },

            State::HeaderValue => match byte {
                b'\r' | b'\n' => self.finish_value(request, byte)?,
                b'\t' => self.scratch.push(byte),
                b if is_ctl(b) => return Err(ParseError::InvalidHeader),
                b => self.scratch.push(b),
            },

            State::HeaderLineLf => match byte {
                b'\n' => self.state = State::HeaderLineStart,
                _ => return Err(ParseError::InvalidHeader),
            },

            State::FinalLf => match byte {
                b'\n' => self.state = State::Done,
                _ => return Err(ParseError::InvalidHeader),
            },

            State::Done => {}
        }
        Ok(())
    }

    fn finish_value(&mut self, request: &mut Request, terminator: u8) -> Result<(), ParseError> {
        let value = self.take_string();
        let value = value.trim_end_matches([' ', '\t']);
        let header = request.headers.last_mut().ok_or(ParseError::InvalidHeader)?;

        if self.continuation {
            if !value.is_empty() {
                if !header.value.is_empty() {
                    header.value.push(' ');
                }
                header.value.push_str(value);
            }
            self.continuation = false;
        } else {
            header.value = value.to_string();
        }

        self.state = if terminator == b'\r' {
            State::HeaderLineLf
        } else {
            State::HeaderLineStart
        };
        Ok(())
    }

    fn take_string(&mut self) -> String {
        let s = String::from_utf8_lossy(&self.scratch).into_owned();
        self.scratch.clear();
        s
    }
}

fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_ctl(b: u8) -> bool {
    b < 0x20 || b == 0x7f
}

fn is_http_version(v: &[u8]) -> bool {
    matches!(v, [b'H', b'T', b'T', b'P', b'/', major, b'.', minor]
        if major.is_ascii_digit() && minor.is_ascii_digit())
}
