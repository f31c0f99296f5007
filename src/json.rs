use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

/// Pretty JSON with a four-space indent; non-ASCII text is written as-is.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut out = Vec::new();
    let mut ser = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut ser)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8(out).unwrap_or_default())
}
