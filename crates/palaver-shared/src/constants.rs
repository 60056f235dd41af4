/// Default HTTP/WebSocket listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Prefix of the synthetic message id used on a `failed` status envelope
/// when persistence did not assign a durable id.
pub const TEMP_ID_PREFIX: &str = "temp_";
