//! Query completion backend messages.

use crate::error::Result;
use crate::protocol::codec::read_cstr;

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "COPY 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Parse the number of rows affected from the command tag.
    ///
    /// Returns `Some(count)` for commands like SELECT, INSERT, UPDATE, DELETE, COPY.
    /// Returns `None` for other commands or parse failures.
    pub fn rows_affected(&self) -> Option<u64> {
        let parts: Vec<&str> = self.tag.split_whitespace().collect();

        match parts.as_slice() {
            ["SELECT", count] => count.parse().ok(),
            ["INSERT", _oid, count] => count.parse().ok(),
            ["UPDATE", count] => count.parse().ok(),
            ["DELETE", count] => count.parse().ok(),
            ["MOVE", count] => count.parse().ok(),
            ["FETCH", count] => count.parse().ok(),
            _ => self.copy_count(),
        }
    }

    /// Row count reported for a COPY: the digits following `"COPY "`.
    ///
    /// The tag is searched rather than matched exactly, so `"COPY 3"` and
    /// tags carrying extra words both resolve.
    pub fn copy_count(&self) -> Option<u64> {
        let (_, after) = self.tag.split_once("COPY ")?;
        let end = after
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after.len());
        after.get(..end)?.parse().ok()
    }

    /// Get the command name from the tag.
    pub fn command(&self) -> Option<&str> {
        self.tag.split_whitespace().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_count_from_tag() {
        let complete = CommandComplete::parse(b"COPY 42\0").unwrap();
        assert_eq!(complete.copy_count(), Some(42));
        assert_eq!(complete.rows_affected(), Some(42));
        assert_eq!(complete.command(), Some("COPY"));
    }

    #[test]
    fn copy_count_missing() {
        let complete = CommandComplete::parse(b"START_REPLICATION\0").unwrap();
        assert_eq!(complete.copy_count(), None);
        let complete = CommandComplete::parse(b"COPY \0").unwrap();
        assert_eq!(complete.copy_count(), None);
    }

    #[test]
    fn rows_affected_for_insert() {
        let complete = CommandComplete::parse(b"INSERT 0 7\0").unwrap();
        assert_eq!(complete.rows_affected(), Some(7));
        assert_eq!(complete.copy_count(), None);
    }
}
