use crate::core::error::{Error, ErrorKind, Result};

/// Append a LEB128 varint.
pub fn write_varint(output: &mut Vec<u8>, mut value: u64) {
    while value >= 128 {
        output.push((value & 127) as u8 | 128);
        value >>= 7;
    }
    output.push(value as u8);
}

/// Decode a LEB128 varint, returns (value, bytes consumed).
pub fn read_varint(input: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0;
    let mut consumed = 0;

    for &byte in input {
        consumed += 1;
        value |= ((byte & 127) as u64) << shift;

        if byte & 128 == 0 {
            return Ok((value, consumed));
        }

        shift += 7;
        if shift > 63 {
            return Err(Error::new(ErrorKind::Parse, "varint overflow"));
        }
    }

    Err(Error::new(ErrorKind::Parse, "incomplete varint"))
}

/// Byte width of the narrowest unsigned integer that can hold `max`.
/// Codes are the widths themselves: 1, 2, 4 or 8.
pub fn min_array_code(max: u64) -> u8 {
    if max <= u8::MAX as u64 {
        1
    } else if max <= u16::MAX as u64 {
        2
    } else if max <= u32::MAX as u64 {
        4
    } else {
        8
    }
}

/// Append `values` as fixed-width little-endian integers at width `code`.
pub fn write_array(output: &mut Vec<u8>, code: u8, values: &[u64]) -> Result<()> {
    for &v in values {
        match code {
            1 => output.push(v as u8),
            2 => output.extend_from_slice(&(v as u16).to_le_bytes()),
            4 => output.extend_from_slice(&(v as u32).to_le_bytes()),
            8 => output.extend_from_slice(&v.to_le_bytes()),
            _ => return Err(Error::new(ErrorKind::Parse, format!("bad array code {}", code))),
        }
    }
    Ok(())
}

/// Decode `count` fixed-width integers at width `code`.
pub fn read_array(input: &[u8], code: u8, count: usize) -> Result<Vec<u64>> {
    let width = code as usize;
    if !matches!(code, 1 | 2 | 4 | 8) {
        return Err(Error::new(ErrorKind::Parse, format!("bad array code {}", code)));
    }
    if input.len() < width * count {
        return Err(Error::new(ErrorKind::Parse, "truncated integer array"));
    }

    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let chunk = &input[i * width..(i + 1) * width];
        let v = match code {
            1 => chunk[0] as u64,
            2 => u16::from_le_bytes([chunk[0], chunk[1]]) as u64,
            4 => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as u64,
            _ => u64::from_le_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ]),
        };
        values.push(v);
    }
    Ok(values)
}

/// Read a single fixed-width integer at `offset`.
pub fn read_array_entry(input: &[u8], code: u8, index: usize) -> Result<u64> {
    let width = code as usize;
    let start = index * width;
    if input.len() < start + width {
        return Err(Error::new(ErrorKind::Parse, "integer array index out of range"));
    }
    let mut out = read_array(&input[start..start + width], code, 1)?;
    Ok(out.remove(0))
}

/// Delta-encode a strictly ascending id sequence: the first value absolute,
/// the rest as gaps. Fails on non-ascending input.
pub fn delta_encode(ids: &[u64]) -> Result<Vec<u64>> {
    let mut deltas = Vec::with_capacity(ids.len());
    let mut prev = None;
    for &id in ids {
        match prev {
            None => deltas.push(id),
            Some(p) => {
                if id <= p {
                    return Err(Error::out_of_order(format!(
                        "id {} not greater than previous {}", id, p
                    )));
                }
                deltas.push(id - p);
            }
        }
        prev = Some(id);
    }
    Ok(deltas)
}

/// Invert `delta_encode`.
pub fn delta_decode(deltas: &[u64]) -> Vec<u64> {
    let mut ids = Vec::with_capacity(deltas.len());
    let mut acc = 0u64;
    for (i, &d) in deltas.iter().enumerate() {
        acc = if i == 0 { d } else { acc + d };
        ids.push(acc);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        let mut buf = Vec::new();
        for v in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            buf.clear();
            write_varint(&mut buf, v);
            let (decoded, used) = read_varint(&buf).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn varint_truncated_fails() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100_000);
        assert!(read_varint(&buf[..1]).is_err());
    }

    #[test]
    fn array_codes() {
        assert_eq!(min_array_code(0), 1);
        assert_eq!(min_array_code(255), 1);
        assert_eq!(min_array_code(256), 2);
        assert_eq!(min_array_code(65_536), 4);
        assert_eq!(min_array_code(u64::MAX), 8);
    }

    #[test]
    fn array_round_trip() {
        let values = [3u64, 0, 250, 17];
        for code in [1u8, 2, 4, 8] {
            let mut buf = Vec::new();
            write_array(&mut buf, code, &values).unwrap();
            assert_eq!(read_array(&buf, code, values.len()).unwrap(), values);
            assert_eq!(read_array_entry(&buf, code, 2).unwrap(), 250);
        }
    }

    #[test]
    fn delta_round_trip() {
        let ids = [3u64, 9, 10, 500, 501];
        let deltas = delta_encode(&ids).unwrap();
        assert_eq!(deltas, [3, 6, 1, 490, 1]);
        assert_eq!(delta_decode(&deltas), ids);
    }

    #[test]
    fn delta_rejects_out_of_order() {
        let err = delta_encode(&[5u64, 5]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfOrder);
    }
}
