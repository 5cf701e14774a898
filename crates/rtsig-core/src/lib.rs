//! rtsig core
//!
//! Wire-level building blocks for the rtsig signaling protocol.
//!
//! This crate provides:
//! - Signaling message types ([`ServerMessage`], [`ClientMessage`])
//! - JSON encoding/decoding ([`codec`])
//! - Payload compression for data-channel labels ([`compress`], [`CompressedLabels`])
//! - The disconnect error-code taxonomy ([`ErrorCode`])

pub mod codec;
pub mod compress;
pub mod error;
pub mod types;

pub use codec::{decode, encode};
pub use compress::CompressedLabels;
pub use error::{Error, ErrorCode, Result};
pub use types::*;

/// Data-channel label carrying signaling messages after switch-over
pub const LABEL_SIGNALING: &str = "signaling";

/// Data-channel label carrying statistics requests
pub const LABEL_STATS: &str = "stats";

/// Data-channel label carrying notify messages
pub const LABEL_NOTIFY: &str = "notify";

/// Data-channel label carrying push messages
pub const LABEL_PUSH: &str = "push";

/// Largest signaling payload accepted, on the wire or after inflating
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Prefix reserved for application-defined data-channel labels
pub const APP_LABEL_PREFIX: char = '#';

/// Returns true if the label is an application-defined passthrough label
pub fn is_app_label(label: &str) -> bool {
    label.starts_with(APP_LABEL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_label() {
        assert!(is_app_label("#chat"));
        assert!(!is_app_label("signaling"));
        assert!(!is_app_label(""));
    }
}
