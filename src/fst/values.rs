use crate::core::error::{Error, ErrorKind, Result};
use crate::util::varint::{read_varint, write_varint};

/// Value policy of one graph file. Stored in the file's trailing directory;
/// every arc value in the file is encoded and combined by this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuesType {
    /// Key-only graph (spelling dictionaries).
    None,
    /// Unsigned integers, shared prefix = minimum, combined by addition.
    Int,
    /// Raw byte strings, shared prefix = common prefix, combined by
    /// concatenation.
    Bytes,
    /// Fixed-width byte arrays; indivisible, so values ride whole on the
    /// deepest arc.
    FixedBytes(u8),
    /// Strictly-increasing integer lists, delta encoded on disk.
    SortedInts,
}

/// One value instance. `Value::None` is the identity for every policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Int(u64),
    Bytes(Vec<u8>),
    SortedInts(Vec<u64>),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

impl ValuesType {
    /// Wire tag stored in the graph directory.
    pub fn code(&self) -> u8 {
        match self {
            ValuesType::None => 0,
            ValuesType::Int => 1,
            ValuesType::Bytes => 2,
            ValuesType::FixedBytes(_) => 3,
            ValuesType::SortedInts => 4,
        }
    }

    pub fn from_code(code: u8, fixed_len: u8) -> Result<Self> {
        match code {
            0 => Ok(ValuesType::None),
            1 => Ok(ValuesType::Int),
            2 => Ok(ValuesType::Bytes),
            3 => Ok(ValuesType::FixedBytes(fixed_len)),
            4 => Ok(ValuesType::SortedInts),
            _ => Err(Error::format(format!("unknown values type {}", code))),
        }
    }

    /// Check a value belongs to this policy before it enters the writer.
    pub fn is_valid(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::None) => true,
            (ValuesType::None, _) => false,
            (ValuesType::Int, Value::Int(_)) => true,
            (ValuesType::Bytes, Value::Bytes(_)) => true,
            (ValuesType::FixedBytes(n), Value::Bytes(b)) => b.len() == *n as usize,
            (ValuesType::SortedInts, Value::SortedInts(v)) => {
                v.windows(2).all(|w| w[0] < w[1])
            }
            _ => false,
        }
    }

    /// Longest shared prefix of two values, hoistable toward the root.
    pub fn common(&self, a: &Value, b: &Value) -> Value {
        if a.is_none() || b.is_none() {
            return Value::None;
        }
        match (self, a, b) {
            (ValuesType::Int, Value::Int(x), Value::Int(y)) => Value::Int(*x.min(y)),
            (ValuesType::Bytes, Value::Bytes(x), Value::Bytes(y)) => {
                let n = x.iter().zip(y.iter()).take_while(|(p, q)| p == q).count();
                if n == 0 { Value::None } else { Value::Bytes(x[..n].to_vec()) }
            }
            (ValuesType::FixedBytes(_), Value::Bytes(x), Value::Bytes(y)) => {
                if x == y { Value::Bytes(x.clone()) } else { Value::None }
            }
            (ValuesType::SortedInts, Value::SortedInts(x), Value::SortedInts(y)) => {
                let n = x.iter().zip(y.iter()).take_while(|(p, q)| p == q).count();
                if n == 0 { Value::None } else { Value::SortedInts(x[..n].to_vec()) }
            }
            _ => Value::None,
        }
    }

    /// Concatenate/accumulate: identity on `None` either side.
    pub fn add(&self, prefix: &Value, suffix: &Value) -> Value {
        if prefix.is_none() {
            return suffix.clone();
        }
        if suffix.is_none() {
            return prefix.clone();
        }
        match (self, prefix, suffix) {
            (ValuesType::Int, Value::Int(x), Value::Int(y)) => Value::Int(x + y),
            (ValuesType::Bytes, Value::Bytes(x), Value::Bytes(y)) => {
                let mut out = x.clone();
                out.extend_from_slice(y);
                Value::Bytes(out)
            }
            (ValuesType::SortedInts, Value::SortedInts(x), Value::SortedInts(y)) => {
                let mut out = x.clone();
                out.extend_from_slice(y);
                Value::SortedInts(out)
            }
            // FixedBytes values are indivisible; both sides set cannot happen
            // because common() only yields whole-or-none.
            (ValuesType::FixedBytes(_), Value::Bytes(_), Value::Bytes(_)) => suffix.clone(),
            _ => suffix.clone(),
        }
    }

    /// Remove a prefix produced by `common`. Normalizes identities to `None`.
    pub fn subtract(&self, value: &Value, prefix: &Value) -> Value {
        if prefix.is_none() {
            return value.clone();
        }
        if value.is_none() {
            return Value::None;
        }
        match (self, value, prefix) {
            (ValuesType::Int, Value::Int(x), Value::Int(y)) => {
                let rest = x.saturating_sub(*y);
                if rest == 0 { Value::None } else { Value::Int(rest) }
            }
            (ValuesType::Bytes, Value::Bytes(x), Value::Bytes(y)) => {
                let rest = &x[y.len().min(x.len())..];
                if rest.is_empty() { Value::None } else { Value::Bytes(rest.to_vec()) }
            }
            (ValuesType::FixedBytes(_), Value::Bytes(x), Value::Bytes(y)) => {
                if x == y { Value::None } else { value.clone() }
            }
            (ValuesType::SortedInts, Value::SortedInts(x), Value::SortedInts(y)) => {
                let rest = &x[y.len().min(x.len())..];
                if rest.is_empty() { Value::None } else { Value::SortedInts(rest.to_vec()) }
            }
            _ => Value::None,
        }
    }

    /// Combine the values of two identical keys.
    pub fn merge(&self, a: &Value, b: &Value) -> Value {
        if a.is_none() {
            return b.clone();
        }
        if b.is_none() {
            return a.clone();
        }
        match (self, a, b) {
            (ValuesType::Int, Value::Int(x), Value::Int(y)) => Value::Int(*x.min(y)),
            (ValuesType::SortedInts, Value::SortedInts(x), Value::SortedInts(y)) => {
                let mut out: Vec<u64> = x.iter().chain(y.iter()).copied().collect();
                out.sort_unstable();
                out.dedup();
                Value::SortedInts(out)
            }
            // Last writer wins for opaque byte values.
            _ => b.clone(),
        }
    }

    /// Encode a non-`None` value.
    pub fn write(&self, output: &mut Vec<u8>, value: &Value) -> Result<()> {
        match (self, value) {
            (ValuesType::Int, Value::Int(x)) => {
                write_varint(output, *x);
                Ok(())
            }
            (ValuesType::Bytes, Value::Bytes(b)) => {
                write_varint(output, b.len() as u64);
                output.extend_from_slice(b);
                Ok(())
            }
            (ValuesType::FixedBytes(n), Value::Bytes(b)) => {
                if b.len() != *n as usize {
                    return Err(Error::new(
                        ErrorKind::InvalidValue,
                        format!("fixed value length {} != {}", b.len(), n),
                    ));
                }
                output.extend_from_slice(b);
                Ok(())
            }
            (ValuesType::SortedInts, Value::SortedInts(v)) => {
                write_varint(output, v.len() as u64);
                let mut prev = 0u64;
                for (i, &x) in v.iter().enumerate() {
                    let delta = if i == 0 { x } else { x - prev };
                    write_varint(output, delta);
                    prev = x;
                }
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidValue,
                format!("value {:?} not valid for {:?}", value, self),
            )),
        }
    }

    /// Decode one value, returns (value, bytes consumed).
    pub fn read(&self, input: &[u8]) -> Result<(Value, usize)> {
        match self {
            ValuesType::None => Err(Error::new(
                ErrorKind::Parse,
                "value bytes present in a no-values graph",
            )),
            ValuesType::Int => {
                let (v, n) = read_varint(input)?;
                Ok((Value::Int(v), n))
            }
            ValuesType::Bytes => {
                let (len, n) = read_varint(input)?;
                let len = len as usize;
                if input.len() < n + len {
                    return Err(Error::new(ErrorKind::Parse, "truncated bytes value"));
                }
                Ok((Value::Bytes(input[n..n + len].to_vec()), n + len))
            }
            ValuesType::FixedBytes(width) => {
                let len = *width as usize;
                if input.len() < len {
                    return Err(Error::new(ErrorKind::Parse, "truncated fixed value"));
                }
                Ok((Value::Bytes(input[..len].to_vec()), len))
            }
            ValuesType::SortedInts => {
                let (count, mut pos) = read_varint(input)?;
                let mut out = Vec::with_capacity(count as usize);
                let mut acc = 0u64;
                for i in 0..count {
                    let (delta, n) = read_varint(&input[pos..])?;
                    pos += n;
                    acc = if i == 0 { delta } else { acc + delta };
                    out.push(acc);
                }
                Ok((Value::SortedInts(out), pos))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_algebra() {
        let vt = ValuesType::Int;
        let common = vt.common(&Value::Int(7), &Value::Int(10));
        assert_eq!(common, Value::Int(7));
        assert_eq!(vt.subtract(&Value::Int(10), &common), Value::Int(3));
        assert_eq!(vt.subtract(&Value::Int(7), &common), Value::None);
        assert_eq!(vt.add(&common, &Value::Int(3)), Value::Int(10));
    }

    #[test]
    fn bytes_prefix_algebra() {
        let vt = ValuesType::Bytes;
        let a = Value::Bytes(b"abcd".to_vec());
        let b = Value::Bytes(b"abzz".to_vec());
        let common = vt.common(&a, &b);
        assert_eq!(common, Value::Bytes(b"ab".to_vec()));
        assert_eq!(vt.add(&common, &vt.subtract(&a, &common)), a);
    }

    #[test]
    fn sorted_ints_round_trip() {
        let vt = ValuesType::SortedInts;
        let v = Value::SortedInts(vec![2, 9, 400]);
        let mut buf = Vec::new();
        vt.write(&mut buf, &v).unwrap();
        let (decoded, used) = vt.read(&buf).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(used, buf.len());
    }

    #[test]
    fn invalid_value_rejected() {
        let vt = ValuesType::FixedBytes(4);
        assert!(!vt.is_valid(&Value::Bytes(b"abc".to_vec())));
        assert!(vt.is_valid(&Value::Bytes(b"abcd".to_vec())));
        let mut buf = Vec::new();
        let err = vt.write(&mut buf, &Value::Bytes(b"abc".to_vec())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidValue);
    }
}
