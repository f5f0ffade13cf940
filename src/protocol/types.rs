//! Common PostgreSQL wire protocol types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Data format code in PostgreSQL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl FormatCode {
    /// Create a FormatCode from a raw u16 value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => FormatCode::Text,
            1 => FormatCode::Binary,
            _ => FormatCode::Text, // Default to text for unknown values
        }
    }
}

/// Transaction status indicator from ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Idle (not in transaction block)
    #[default]
    Idle = b'I',
    /// In transaction block
    InTransaction = b'T',
    /// In failed transaction block (queries will be rejected until rollback)
    Failed = b'E',
}

impl TransactionStatus {
    /// Create a TransactionStatus from a raw byte value.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if currently in a transaction (either active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(self, TransactionStatus::InTransaction | TransactionStatus::Failed)
    }

}

/// Big-endian 16-bit unsigned integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct U16BE([u8; 2]);

impl U16BE {
    /// Create a new U16BE from a native u16.
    pub const fn new(value: u16) -> Self {
        Self(value.to_be_bytes())
    }

    /// Get the native u16 value.
    pub const fn get(self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

/// Big-endian 32-bit unsigned integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct U32BE([u8; 4]);

impl U32BE {
    /// Create a new U32BE from a native u32.
    pub const fn new(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Get the native u32 value.
    pub const fn get(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}
