// error.rs - error taxonomy for the RADIUS client
//
// Every authenticate_* call on `Client` returns a `bool` (per the
// programmatic surface) and stashes the failure here; nothing escapes the
// core as an exception. The numeric codes match the observable error codes
// a caller can match on without string comparison.

use thiserror::Error;

/// Observable error codes, matching the wire-visible taxonomy a caller may
/// want to branch on without inspecting the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// No error.
    None = 0,
    /// select()/recv() failed outside of a plain timeout.
    SelectFailure = 2,
    /// Access-Reject, or an MS-CHAP failure mapped to a rejection.
    AccessRejected = 3,
    /// The configured timeout elapsed with no complete response.
    TimedOut = 28,
    /// The UDP send() call failed.
    SendError = 55,
    /// The UDP recv() call failed.
    ReceiveError = 56,
    /// The response packet failed basic framing validation.
    InvalidResponse = 100,
    /// The Response-Authenticator did not match.
    AuthenticatorMismatch = 101,
    /// A protocol violation was found in an EAP/MS-CHAP challenge-response.
    ProtocolError = 102,
    /// The caller passed a malformed argument.
    InvalidArgument = 127,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Errors produced while building, sending, or parsing a RADIUS transaction.
///
/// Each variant maps to exactly one [`ErrorCode`] via [`RadiusError::code`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadiusError {
    /// The caller passed an invalid argument (e.g. an attribute value that
    /// cannot be encoded in the requested format).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Sending the request datagram failed.
    #[error("failed to send request: {0}")]
    SendFailed(String),

    /// Receiving the response datagram failed (e.g. ICMP destination
    /// unreachable, a dropped socket).
    #[error("failed to receive response: {0}")]
    ReceiveFailed(String),

    /// The configured timeout elapsed before a complete response arrived.
    #[error("operation timed out")]
    TimedOut,

    /// The response packet failed basic framing validation (bad length,
    /// truncated attribute, unknown packet code).
    #[error("invalid response packet: {0}")]
    InvalidResponse(String),

    /// The Response-Authenticator did not match the expected MD5 digest.
    #[error("response authenticator mismatch")]
    AuthenticatorMismatch,

    /// An EAP or MS-CHAP challenge/response was missing a required
    /// attribute, or arrived in an order the state machine does not expect.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The server returned Access-Reject.
    #[error("Access rejected")]
    AccessRejected,

    /// An MS-CHAP Failure packet was received; `message` is the
    /// human-readable mapping of its `E=` code (spec §7).
    #[error("{message}")]
    AuthenticationFailed { ms_chap_code: u32, message: String },
}

impl RadiusError {
    /// The numeric error code a caller can branch on.
    pub fn code(&self) -> ErrorCode {
        match self {
            RadiusError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            RadiusError::SendFailed(_) => ErrorCode::SendError,
            RadiusError::ReceiveFailed(_) => ErrorCode::ReceiveError,
            RadiusError::TimedOut => ErrorCode::TimedOut,
            RadiusError::InvalidResponse(_) => ErrorCode::InvalidResponse,
            RadiusError::AuthenticatorMismatch => ErrorCode::AuthenticatorMismatch,
            RadiusError::ProtocolError(_) => ErrorCode::ProtocolError,
            RadiusError::AccessRejected => ErrorCode::AccessRejected,
            RadiusError::AuthenticationFailed { .. } => ErrorCode::AccessRejected,
        }
    }
}

/// Maps an MS-CHAP `E=<code>` failure code to the human-readable message
/// spec.md §7 requires, and builds the corresponding error.
pub fn ms_chap_failure(code: u32) -> RadiusError {
    let message = match code {
        691 => "Authentication failure, username or password incorrect.",
        646 => "Restricted logon hours.",
        647 => "Account disabled.",
        648 => "Password expired.",
        649 => "No permission to dial in.",
        709 => "Error changing password.",
        _ => "Authentication failed.",
    }
    .to_string();

    RadiusError::AuthenticationFailed {
        ms_chap_code: code,
        message,
    }
}

pub type Result<T> = std::result::Result<T, RadiusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_chap_code_691_maps_to_bad_credentials() {
        let err = ms_chap_failure(691);
        assert_eq!(
            err.to_string(),
            "Authentication failure, username or password incorrect."
        );
        assert_eq!(err.code(), ErrorCode::AccessRejected);
    }

    #[test]
    fn ms_chap_code_648_maps_to_password_expired() {
        let err = ms_chap_failure(648);
        assert_eq!(err.to_string(), "Password expired.");
    }

    #[test]
    fn access_rejected_message_matches_spec() {
        assert_eq!(RadiusError::AccessRejected.to_string(), "Access rejected");
    }
}
