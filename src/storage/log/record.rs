/// A single log entry.
///
/// Encoded as the protobuf message `Record { bytes value = 1; uint64 offset = 2; }`.
/// The offset is assigned by the segment on append.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Record {
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
}

impl Record {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Record {
            value: value.into(),
            offset: 0,
        }
    }
}
