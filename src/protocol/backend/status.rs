//! Session status messages that can arrive outside of a query response.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_u32};
use crate::protocol::types::TransactionStatus;

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    /// Parameter name
    pub name: &'a str,
    /// Parameter value
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery message - indicates server is ready for a new query.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ReadyForQuery {
    /// Transaction status byte
    pub status: u8,
}

impl ReadyForQuery {
    /// Parse a ReadyForQuery message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload).map_err(|e| Error::Protocol(format!("ReadyForQuery: {e:?}")))
    }

    /// Get the transaction status.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_byte(self.status)
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone)]
pub struct NotificationResponse<'a> {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: &'a str,
    /// Notification payload
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload_str, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload: payload_str,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ready_for_query() {
        let ready = ReadyForQuery::parse(b"T").unwrap();
        assert_eq!(
            ready.transaction_status(),
            Some(TransactionStatus::InTransaction)
        );
        assert!(ReadyForQuery::parse(b"").is_err());
    }

    #[test]
    fn parse_notification() {
        let mut payload = 42u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"jobs\0done\0");
        let n = NotificationResponse::parse(&payload).unwrap();
        assert_eq!((n.pid, n.channel, n.payload), (42, "jobs", "done"));
    }

    #[test]
    fn parse_parameter_status() {
        let p = ParameterStatus::parse(b"TimeZone\0UTC\0").unwrap();
        assert_eq!((p.name, p.value), ("TimeZone", "UTC"));
    }
}
