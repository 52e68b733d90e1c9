//! Typed views over PostgreSQL message payloads
//!
//! The proxy only materializes the messages it may need to rewrite:
//! Parse, Bind, Execute on the frontend side; RowDescription,
//! ParameterDescription and DataRow on the backend side. Everything else
//! is forwarded as raw payload bytes.
//!
//! Each type parses from a payload (without type byte and length) and
//! encodes back to one, so a rewritten message can be re-framed by the
//! codec with a recomputed length.

use crate::error::{ProxyError, Result};

use super::constants::FORMAT_TEXT;

/// Read a null-terminated string from a buffer at the given offset.
/// Returns the string and the number of bytes consumed (including null).
fn read_cstring_from_buf(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let start = offset;
    let end = buf
        .get(start..)
        .and_then(|tail| tail.iter().position(|&b| b == 0))
        .ok_or_else(|| ProxyError::Encoding("Missing null terminator in string".into()))?;

    let s = std::str::from_utf8(&buf[start..start + end])
        .map_err(|_| ProxyError::Encoding("Invalid UTF-8 in string".into()))?;

    Ok((s.to_string(), end + 1))
}

fn read_u16_at(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes = buf
        .get(offset..offset + 2)
        .ok_or_else(|| ProxyError::Encoding("Message truncated reading u16".into()))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_i16_at(buf: &[u8], offset: usize) -> Result<i16> {
    let bytes = buf
        .get(offset..offset + 2)
        .ok_or_else(|| ProxyError::Encoding("Message truncated reading i16".into()))?;
    Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or_else(|| ProxyError::Encoding("Message truncated reading u32".into()))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i32_at(buf: &[u8], offset: usize) -> Result<i32> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or_else(|| ProxyError::Encoding("Message truncated reading i32".into()))?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ============================================================================
// Frontend messages
// ============================================================================

/// Parse ('P') message: prepare a named statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePacket {
    /// Destination statement name ("" for the unnamed statement)
    pub name: String,
    /// The SQL text of the statement
    pub query: String,
    /// Parameter type OIDs pre-declared by the client (may be empty)
    pub param_oids: Vec<u32>,
}

impl ParsePacket {
    /// Parse from a Parse message payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (name, n) = read_cstring_from_buf(payload, 0)?;
        let mut offset = n;
        let (query, n) = read_cstring_from_buf(payload, offset)?;
        offset += n;

        let count = read_u16_at(payload, offset)? as usize;
        offset += 2;

        let mut param_oids = Vec::with_capacity(count);
        for _ in 0..count {
            param_oids.push(read_u32_at(payload, offset)?);
            offset += 4;
        }

        Ok(Self {
            name,
            query,
            param_oids,
        })
    }

    /// Encode back into a Parse message payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + self.query.len() + 4 + 4 * self.param_oids.len());
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out.extend_from_slice(self.query.as_bytes());
        out.push(0);
        out.extend_from_slice(&(self.param_oids.len() as u16).to_be_bytes());
        for oid in &self.param_oids {
            out.extend_from_slice(&oid.to_be_bytes());
        }
        out
    }
}

/// A single Bind parameter value. `None` encodes the SQL NULL (wire length -1).
pub type BindParam = Option<Vec<u8>>;

/// Bind ('B') message: bind parameter values to a statement, creating a portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPacket {
    /// Destination portal name ("" for the unnamed portal)
    pub portal: String,
    /// Source prepared statement name
    pub statement: String,
    /// Parameter format codes (empty = all text, one = applies to all)
    pub parameter_formats: Vec<i16>,
    /// Parameter values
    pub parameters: Vec<BindParam>,
    /// Result column format codes (same shortening rules as parameters)
    pub result_formats: Vec<i16>,
}

impl BindPacket {
    /// Parse from a Bind message payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (portal, n) = read_cstring_from_buf(payload, 0)?;
        let mut offset = n;
        let (statement, n) = read_cstring_from_buf(payload, offset)?;
        offset += n;

        let fmt_count = read_u16_at(payload, offset)? as usize;
        offset += 2;
        let mut parameter_formats = Vec::with_capacity(fmt_count);
        for _ in 0..fmt_count {
            parameter_formats.push(read_i16_at(payload, offset)?);
            offset += 2;
        }

        let param_count = read_u16_at(payload, offset)? as usize;
        offset += 2;
        let mut parameters = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let len = read_i32_at(payload, offset)?;
            offset += 4;
            if len < 0 {
                parameters.push(None);
            } else {
                let len = len as usize;
                let value = payload
                    .get(offset..offset + len)
                    .ok_or_else(|| ProxyError::Encoding("Bind parameter truncated".into()))?;
                parameters.push(Some(value.to_vec()));
                offset += len;
            }
        }

        let result_count = read_u16_at(payload, offset)? as usize;
        offset += 2;
        let mut result_formats = Vec::with_capacity(result_count);
        for _ in 0..result_count {
            result_formats.push(read_i16_at(payload, offset)?);
            offset += 2;
        }

        Ok(Self {
            portal,
            statement,
            parameter_formats,
            parameters,
            result_formats,
        })
    }

    /// Encode back into a Bind message payload.
    ///
    /// The parameter count is taken from `parameters`, which may differ
    /// from the count originally on the wire after observer rewriting.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.portal.as_bytes());
        out.push(0);
        out.extend_from_slice(self.statement.as_bytes());
        out.push(0);
        out.extend_from_slice(&(self.parameter_formats.len() as u16).to_be_bytes());
        for fmt in &self.parameter_formats {
            out.extend_from_slice(&fmt.to_be_bytes());
        }
        out.extend_from_slice(&(self.parameters.len() as u16).to_be_bytes());
        for param in &self.parameters {
            match param {
                None => out.extend_from_slice(&(-1i32).to_be_bytes()),
                Some(value) => {
                    out.extend_from_slice(&(value.len() as i32).to_be_bytes());
                    out.extend_from_slice(value);
                }
            }
        }
        out.extend_from_slice(&(self.result_formats.len() as u16).to_be_bytes());
        for fmt in &self.result_formats {
            out.extend_from_slice(&fmt.to_be_bytes());
        }
        out
    }
}

/// Execute ('E') message: run a bound portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutePacket {
    /// Portal name to execute
    pub portal: String,
    /// Maximum number of rows to return (0 = no limit)
    pub max_rows: i32,
}

impl ExecutePacket {
    /// Parse from an Execute message payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (portal, n) = read_cstring_from_buf(payload, 0)?;
        let max_rows = read_i32_at(payload, n)?;
        Ok(Self { portal, max_rows })
    }
}

/// Simple Query ('Q') message payload: the SQL text with a null terminator.
pub fn parse_simple_query(payload: &[u8]) -> Result<String> {
    let (query, _) = read_cstring_from_buf(payload, 0)?;
    Ok(query)
}

/// Encode a simple query payload.
pub fn encode_simple_query(query: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(query.len() + 1);
    out.extend_from_slice(query.as_bytes());
    out.push(0);
    out
}

// ============================================================================
// Backend messages
// ============================================================================

/// One field in a RowDescription message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// OID of the originating table, or 0
    pub table_oid: u32,
    /// Attribute number in the originating table, or 0
    pub column_id: u16,
    /// OID of the field's data type
    pub type_oid: u32,
    /// Data type size (negative = variable width)
    pub type_size: i16,
    /// Type modifier
    pub type_modifier: i32,
    /// Format code (0 = text, 1 = binary)
    pub format: i16,
}

/// RowDescription ('T') message: result column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDescription {
    /// Per-column field descriptions
    pub fields: Vec<FieldDescription>,
}

impl RowDescription {
    /// Parse from a RowDescription message payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let field_count = read_u16_at(payload, 0)? as usize;
        let mut fields = Vec::with_capacity(field_count);
        let mut offset = 2;

        for _ in 0..field_count {
            let (name, n) = read_cstring_from_buf(payload, offset)?;
            offset += n;

            let table_oid = read_u32_at(payload, offset)?;
            offset += 4;
            let column_id = read_u16_at(payload, offset)?;
            offset += 2;
            let type_oid = read_u32_at(payload, offset)?;
            offset += 4;
            let type_size = read_i16_at(payload, offset)?;
            offset += 2;
            let type_modifier = read_i32_at(payload, offset)?;
            offset += 4;
            let format = read_i16_at(payload, offset)?;
            offset += 2;

            fields.push(FieldDescription {
                name,
                table_oid,
                column_id,
                type_oid,
                type_size,
                type_modifier,
                format,
            });
        }

        Ok(Self { fields })
    }

    /// Encode back into a RowDescription message payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            out.extend_from_slice(field.name.as_bytes());
            out.push(0);
            out.extend_from_slice(&field.table_oid.to_be_bytes());
            out.extend_from_slice(&field.column_id.to_be_bytes());
            out.extend_from_slice(&field.type_oid.to_be_bytes());
            out.extend_from_slice(&field.type_size.to_be_bytes());
            out.extend_from_slice(&field.type_modifier.to_be_bytes());
            out.extend_from_slice(&field.format.to_be_bytes());
        }
        out
    }
}

/// ParameterDescription ('t') message: statement parameter type OIDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescription {
    /// OIDs of the statement parameters
    pub param_oids: Vec<u32>,
}

impl ParameterDescription {
    /// Parse from a ParameterDescription message payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let count = read_u16_at(payload, 0)? as usize;
        let mut offset = 2;
        let mut param_oids = Vec::with_capacity(count);
        for _ in 0..count {
            param_oids.push(read_u32_at(payload, offset)?);
            offset += 4;
        }
        Ok(Self { param_oids })
    }

    /// Encode back into a ParameterDescription message payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 4 * self.param_oids.len());
        out.extend_from_slice(&(self.param_oids.len() as u16).to_be_bytes());
        for oid in &self.param_oids {
            out.extend_from_slice(&oid.to_be_bytes());
        }
        out
    }
}

/// DataRow ('D') message: one result row. `None` columns are SQL NULLs
/// (wire length -1) and are preserved exactly on re-encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    /// Column values in result order
    pub columns: Vec<Option<Vec<u8>>>,
}

impl DataRow {
    /// Parse from a DataRow message payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let column_count = read_u16_at(payload, 0)? as usize;
        let mut columns = Vec::with_capacity(column_count);
        let mut offset = 2;

        for _ in 0..column_count {
            let len = read_i32_at(payload, offset)?;
            offset += 4;
            if len < 0 {
                columns.push(None);
            } else {
                let len = len as usize;
                let value = payload
                    .get(offset..offset + len)
                    .ok_or_else(|| ProxyError::Encoding("DataRow column truncated".into()))?;
                columns.push(Some(value.to_vec()));
                offset += len;
            }
        }

        Ok(Self { columns })
    }

    /// Encode back into a DataRow message payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.columns.len() as u16).to_be_bytes());
        for column in &self.columns {
            match column {
                None => out.extend_from_slice(&(-1i32).to_be_bytes()),
                Some(value) => {
                    out.extend_from_slice(&(value.len() as i32).to_be_bytes());
                    out.extend_from_slice(value);
                }
            }
        }
        out
    }
}

// ============================================================================
// Proxy-generated messages
// ============================================================================

/// Build an ErrorResponse payload with severity, SQLSTATE code and message,
/// in that field order, with the terminating null.
pub fn encode_error_response(severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(severity.len() + code.len() + message.len() + 6);
    out.push(super::constants::ERROR_FIELD_SEVERITY);
    out.extend_from_slice(severity.as_bytes());
    out.push(0);
    out.push(super::constants::ERROR_FIELD_CODE);
    out.extend_from_slice(code.as_bytes());
    out.push(0);
    out.push(super::constants::ERROR_FIELD_MESSAGE);
    out.extend_from_slice(message.as_bytes());
    out.push(0);
    out.push(0);
    out
}

/// Resolve the format code for a column given a Bind's result format list.
///
/// Per protocol rules: an empty list means all columns are text, a single
/// entry applies to every column, otherwise the list is indexed per column.
pub fn format_code_at(formats: &[i16], index: usize) -> Result<i16> {
    match formats.len() {
        0 => Ok(FORMAT_TEXT),
        1 => Ok(formats[0]),
        n => formats.get(index).copied().ok_or_else(|| {
            ProxyError::Encoding(format!(
                "Result format index {} out of range ({} formats)",
                index, n
            ))
        }),
    }
}
