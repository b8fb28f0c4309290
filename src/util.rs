use crate::value::Value;
use std::io::{Read, Seek, SeekFrom};

pub fn read_slice<R: Read + Seek>(r: &mut R, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    r.seek(SeekFrom::Start(offset))?;
    let mut v = Vec::new();
    r.take(len).read_to_end(&mut v)?;
    if (v.len() as u64) < len {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(v)
}

pub fn hex_dump(bytes: &[u8], start_offset: u64) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let offs = start_offset + (i as u64) * 16;
        let hexs = chunk
            .iter()
            .map(|b| hex::encode([*b]))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect();
        out.push_str(&format!("{offs:08x}  {hexs:<47}  |{ascii}|\n"));
    }
    out
}

/// Renders a field value on one line, truncating long arrays.
pub fn format_value(v: &Value, max_items: usize) -> String {
    match v {
        Value::Uint(n) => n.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Str(b) | Value::PascalStr(b) => format!("{:?}", String::from_utf8_lossy(b)),
        Value::Bytes(b) if b.len() > max_items => {
            format!("{}... ({} bytes)", hex::encode(&b[..max_items]), b.len())
        }
        Value::Bytes(b) => hex::encode(b),
        Value::Array(items) => {
            let shown: Vec<String> = items
                .iter()
                .take(max_items)
                .map(|i| format_value(i, max_items))
                .collect();
            if items.len() > max_items {
                format!("[{}, ... ({} total)]", shown.join(", "), items.len())
            } else {
                format!("[{}]", shown.join(", "))
            }
        }
        Value::Struct(rec) => {
            let fields: Vec<String> = rec
                .iter()
                .map(|(name, v)| format!("{name}: {}", format_value(v, max_items)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}
