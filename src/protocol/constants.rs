//! STOMP wire constants

/// Default STOMP port
pub const DEFAULT_PORT: u16 = 61613;

/// Default decode buffer capacity per connection
pub const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

/// Frame terminator
pub const FRAME_TERMINATOR: u8 = 0x00;

/// Line delimiter for command and header lines
pub const LINE_DELIMITER: u8 = b'\n';

// Header names
pub const HEADER_CONTENT_LENGTH: &str = "content-length";
pub const HEADER_DESTINATION: &str = "destination";
pub const HEADER_ID: &str = "id";
pub const HEADER_ACK: &str = "ack";
pub const HEADER_RECEIPT: &str = "receipt";
pub const HEADER_RECEIPT_ID: &str = "receipt-id";
pub const HEADER_SESSION: &str = "session";
pub const HEADER_TIMESTAMP: &str = "timestamp";
pub const HEADER_REPLY_TO: &str = "reply-to";
pub const HEADER_MESSAGE: &str = "message";

/// Prefix of application headers passed through to MESSAGE frames
pub const CUSTOM_HEADER_PREFIX: &str = "x-";

/// Default acknowledgement mode for subscriptions
pub const DEFAULT_ACK_MODE: &str = "auto";
