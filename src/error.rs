#[derive(Debug, thiserror::Error)]
pub enum NetcapError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot open input: {0}")]
    Input(#[source] std::io::Error),
    #[error("record read error: {0}")]
    RecordRead(#[source] std::io::Error),
    #[error("record decode error at offset {offset}: {detail}")]
    Decode { offset: usize, detail: String },
    #[error("pcap file error: {0}")]
    PcapFile(#[source] std::io::Error),
    #[error("capture sink error: {0}")]
    Sink(String),
    #[error("serialization error: {0}")]
    Serialization(#[source] std::io::Error),
    #[error("fatal: {0}")]
    Fatal(String),
}
