// Decoded event records handed from the decode stage to the capture stage.

/// Event type id of a network packet capture event.
pub const NET_PACKET_CAPTURE: u32 = 1000;

/// Name of the argument holding the captured bytes.
pub const PAYLOAD_ARG: &str = "payload";

/// Typed value of a single event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Bytes(Vec<u8>),
    Int(i64),
    Str(String),
}

/// A named event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub value: ArgValue,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: ArgValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A decoded capture event.
///
/// `return_value` carries the layer 3 family bitmask for packet captures.
/// The process context fields are only used by sinks for routing and
/// timestamping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedPacketEvent {
    pub event_id: u32,
    pub return_value: i64,
    pub timestamp_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub process_name: String,
    pub container_id: Option<String>,
    pub args: Vec<Argument>,
}

impl CapturedPacketEvent {
    /// Build a packet capture event carrying `payload` as its only argument.
    pub fn packet(return_value: i64, payload: Vec<u8>) -> Self {
        Self {
            event_id: NET_PACKET_CAPTURE,
            return_value,
            args: vec![Argument::new(PAYLOAD_ARG, ArgValue::Bytes(payload))],
            ..Self::default()
        }
    }

    /// Look up an argument by name.
    pub fn arg(&self, name: &str) -> Option<&Argument> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Mutable lookup of an argument by name.
    pub fn arg_mut(&mut self, name: &str) -> Option<&mut Argument> {
        self.args.iter_mut().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_event_has_payload_arg() {
        let ev = CapturedPacketEvent::packet(1, vec![1, 2, 3]);
        assert_eq!(ev.event_id, NET_PACKET_CAPTURE);
        assert_eq!(
            ev.arg(PAYLOAD_ARG).map(|a| &a.value),
            Some(&ArgValue::Bytes(vec![1, 2, 3]))
        );
        assert!(ev.arg("missing").is_none());
    }

    #[test]
    fn arg_lookup_returns_first_match() {
        let mut ev = CapturedPacketEvent::default();
        ev.args.push(Argument::new("x", ArgValue::Int(1)));
        ev.args.push(Argument::new("x", ArgValue::Int(2)));
        assert_eq!(ev.arg("x").map(|a| &a.value), Some(&ArgValue::Int(1)));
    }
}
