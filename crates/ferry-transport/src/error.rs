/// Errors from connecting, sending, receiving, or accepting.
///
/// A peer closing the connection cleanly is not an error: `recv` returns
/// `Ok(None)` and the driver reports `Disconnected`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The handle was used after it was closed, or before it was connected.
    #[error("not connected")]
    NotConnected,

    /// An outbound connect attempt failed before the connection was
    /// established.
    #[error("connect to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// A host/port pair from the wire doesn't name a usable endpoint
    /// (empty host, port outside 0..=65535).
    #[error("invalid address {host}:{port}")]
    InvalidAddress { host: String, port: i32 },

    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding the listener or upgrading an accepted socket failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failed_display_names_address() {
        let err = TransportError::ConnectFailed {
            address: "node-z:9100".into(),
            reason: "refused".into(),
        };
        assert_eq!(err.to_string(), "connect to node-z:9100 failed: refused");
    }

    #[test]
    fn test_invalid_address_display_keeps_wire_port() {
        let err = TransportError::InvalidAddress {
            host: "node-z".into(),
            port: -1,
        };
        assert_eq!(err.to_string(), "invalid address node-z:-1");
    }
}
