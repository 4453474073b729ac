//! Raw `$value` and `$count` bodies.

use crate::error::RenderError;
use crate::value::ODataValue;

/// Binary values are written as bytes, other primitives as their lexical
/// form.
pub fn render_raw(value: &ODataValue) -> Result<Vec<u8>, RenderError> {
    match value {
        ODataValue::Binary(bytes) => Ok(bytes.clone()),
        other => other
            .to_text()
            .map(String::into_bytes)
            .ok_or_else(|| RenderError::Unsupported {
                renderer: "raw",
                what: other.describe(),
            }),
    }
}
