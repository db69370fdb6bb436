use super::{Record, Recorder};

/// Buffered recorder.
///
/// This is used for keeping records in memory, for example during tests or
/// evaluation runs.
#[derive(Default)]
pub struct BufferedRecorder {
    buf: Vec<Record>,
}

impl BufferedRecorder {
    /// Construct the recorder.
    pub fn new() -> Self {
        Self { buf: Vec::default() }
    }

    /// Returns an iterator over the records.
    pub fn iter(&self) -> std::slice::Iter<Record> {
        self.buf.iter()
    }

    /// Returns the number of records kept.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Checks if no record has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Recorder for BufferedRecorder {
    fn write(&mut self, record: Record) {
        self.buf.push(record);
    }
}
