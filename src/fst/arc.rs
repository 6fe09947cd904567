use crate::core::error::{Error, ErrorKind, Result};
use crate::fst::values::{Value, ValuesType};
use crate::util::varint::{read_varint, write_varint};

pub const FLAG_MULTIBYTE: u8 = 1;
pub const FLAG_LAST: u8 = 2;
pub const FLAG_ACCEPT: u8 = 4;
pub const FLAG_STOP: u8 = 8;
pub const FLAG_VALUE: u8 = 16;
pub const FLAG_ACCEPT_VALUE: u8 = 32;

/// Sentinel byte before a node whose arcs all encode to one length.
pub const FIXED_MARKER: u8 = 0xFF;

/// One directed edge in the graph, as read from or written to the arc stream.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphArc {
    pub label: Vec<u8>,
    /// Node address, or None for a stop arc.
    pub target: Option<u64>,
    /// Partial value carried by the transition.
    pub value: Value,
    /// This arc ends a stored key.
    pub accept: bool,
    /// Value contributed only at acceptance.
    pub accept_value: Value,
    /// Last outgoing arc of its source node.
    pub lastarc: bool,
}

impl GraphArc {
    pub fn new(label: Vec<u8>) -> Self {
        GraphArc {
            label,
            target: None,
            value: Value::None,
            accept: false,
            accept_value: Value::None,
            lastarc: false,
        }
    }

    /// Encode this arc: flag byte, optional label-length varint, label bytes,
    /// optional fixed-width target, optional value and accept-value bytes.
    pub fn encode(&self, output: &mut Vec<u8>, vtype: ValuesType) -> Result<()> {
        let mut flags = 0u8;
        if self.label.len() > 1 {
            flags |= FLAG_MULTIBYTE;
        }
        if self.lastarc {
            flags |= FLAG_LAST;
        }
        if self.accept {
            flags |= FLAG_ACCEPT;
        }
        if self.target.is_none() {
            flags |= FLAG_STOP;
        }
        if !self.value.is_none() {
            flags |= FLAG_VALUE;
        }
        if !self.accept_value.is_none() {
            flags |= FLAG_ACCEPT_VALUE;
        }

        if self.label.is_empty() {
            return Err(Error::new(ErrorKind::InvalidValue, "empty arc label"));
        }

        output.push(flags);
        if self.label.len() > 1 {
            write_varint(output, self.label.len() as u64);
        }
        output.extend_from_slice(&self.label);
        if let Some(target) = self.target {
            output.extend_from_slice(&target.to_le_bytes());
        }
        if !self.value.is_none() {
            vtype.write(output, &self.value)?;
        }
        if !self.accept_value.is_none() {
            vtype.write(output, &self.accept_value)?;
        }
        Ok(())
    }

    /// Decode one arc, returns (arc, bytes consumed).
    pub fn decode(input: &[u8], vtype: ValuesType) -> Result<(GraphArc, usize)> {
        if input.is_empty() {
            return Err(Error::new(ErrorKind::Parse, "truncated arc"));
        }
        let flags = input[0];
        let mut pos = 1;

        let label_len = if flags & FLAG_MULTIBYTE != 0 {
            let (len, n) = read_varint(&input[pos..])?;
            pos += n;
            len as usize
        } else {
            1
        };
        if input.len() < pos + label_len {
            return Err(Error::new(ErrorKind::Parse, "truncated arc label"));
        }
        let label = input[pos..pos + label_len].to_vec();
        pos += label_len;

        let target = if flags & FLAG_STOP != 0 {
            None
        } else {
            if input.len() < pos + 8 {
                return Err(Error::new(ErrorKind::Parse, "truncated arc target"));
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&input[pos..pos + 8]);
            pos += 8;
            Some(u64::from_le_bytes(raw))
        };

        let value = if flags & FLAG_VALUE != 0 {
            let (v, n) = vtype.read(&input[pos..])?;
            pos += n;
            v
        } else {
            Value::None
        };

        let accept_value = if flags & FLAG_ACCEPT_VALUE != 0 {
            let (v, n) = vtype.read(&input[pos..])?;
            pos += n;
            v
        } else {
            Value::None
        };

        Ok((
            GraphArc {
                label,
                target,
                value,
                accept: flags & FLAG_ACCEPT != 0,
                accept_value,
                lastarc: flags & FLAG_LAST != 0,
            },
            pos,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arc_round_trip() {
        let mut arc = GraphArc::new(vec![b'q']);
        arc.target = Some(1234);
        arc.value = Value::Int(9);
        arc.accept = true;
        arc.accept_value = Value::Int(2);
        arc.lastarc = true;

        let mut buf = Vec::new();
        arc.encode(&mut buf, ValuesType::Int).unwrap();
        let (decoded, used) = GraphArc::decode(&buf, ValuesType::Int).unwrap();
        assert_eq!(decoded, arc);
        assert_eq!(used, buf.len());
    }

    #[test]
    fn stop_arc_has_no_target_bytes() {
        let arc = GraphArc::new(vec![b'x']);
        let mut buf = Vec::new();
        arc.encode(&mut buf, ValuesType::None).unwrap();
        // flag byte + label only
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn multibyte_label() {
        let mut arc = GraphArc::new(b"ab".to_vec());
        arc.lastarc = true;
        let mut buf = Vec::new();
        arc.encode(&mut buf, ValuesType::None).unwrap();
        let (decoded, _) = GraphArc::decode(&buf, ValuesType::None).unwrap();
        assert_eq!(decoded.label, b"ab".to_vec());
    }
}
