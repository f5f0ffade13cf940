//! COPY options.

/// Default threshold for buffered bytes on either side of a COPY.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

/// Options for a single COPY operation.
#[derive(Debug, Clone)]
pub struct CopyOpts {
    /// Decoded bytes the consumer may leave unread before the decoder stops
    /// pulling from the transport.
    ///
    /// Default: `65536`
    pub read_high_water_mark: usize,

    /// Bytes submitted but not yet handed to the transport before further
    /// writes are refused with [`WriteStatus::WouldBlock`](crate::state::copy_in::WriteStatus).
    ///
    /// Default: `65536`
    pub write_high_water_mark: usize,

    /// Outbound bytes the connection buffers before its transport reports
    /// saturation and the encoder waits for a drain.
    ///
    /// Default: `65536`
    pub transport_high_water_mark: usize,

    /// Deliver each CopyData payload as one unit instead of as soon as bytes arrive.
    ///
    /// Needed when payloads carry sub-messages that must not be split
    /// (e.g. logical replication XLogData).
    ///
    /// Default: `false`
    pub align_on_frame: bool,

    /// Size of a single socket read performed by the drivers.
    ///
    /// Default: `8192`
    pub read_chunk_size: usize,

    /// CopyFail message sent when a copy-in is dropped without finishing.
    ///
    /// Default: `"COPY aborted by client"`
    pub abort_message: String,
}

impl Default for CopyOpts {
    fn default() -> Self {
        Self {
            read_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            write_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            transport_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            align_on_frame: false,
            read_chunk_size: 8192,
            abort_message: "COPY aborted by client".into(),
        }
    }
}

impl CopyOpts {
    /// Set the decoder output threshold.
    pub fn read_high_water_mark(mut self, bytes: usize) -> Self {
        self.read_high_water_mark = bytes.max(1);
        self
    }

    /// Set the encoder intake threshold.
    pub fn write_high_water_mark(mut self, bytes: usize) -> Self {
        self.write_high_water_mark = bytes.max(1);
        self
    }

    /// Set the outbound transport buffer threshold.
    pub fn transport_high_water_mark(mut self, bytes: usize) -> Self {
        self.transport_high_water_mark = bytes.max(1);
        self
    }

    /// Enable or disable frame-aligned delivery.
    pub fn align_on_frame(mut self, align: bool) -> Self {
        self.align_on_frame = align;
        self
    }

    /// Set the driver read size.
    pub fn read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes.max(1);
        self
    }

    /// Set the CopyFail message used when a copy-in is dropped.
    pub fn abort_message(mut self, message: impl Into<String>) -> Self {
        self.abort_message = message.into();
        self
    }
}
