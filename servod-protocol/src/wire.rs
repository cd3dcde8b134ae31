// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Encoding and decoding of the XML-RPC envelope.

use crate::Value;
use std::io::Read;
use std::io::Write;
use thiserror::Error;
use xml::reader::EventReader;
use xml::reader::XmlEvent;
use xml::writer::EmitterConfig;
use xml::writer::EventWriter;
use xml::writer::XmlEvent as WriterEvent;

/// A `<fault>` response from the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("servod fault {code}: {message}")]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to emit XML-RPC request")]
    Xml(#[from] xml::writer::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to parse XML-RPC response")]
    Xml(#[from] xml::reader::Error),
    #[error("malformed XML-RPC response: {0}")]
    Malformed(&'static str),
    #[error("XML-RPC response carries no value")]
    NoValue,
    #[error(transparent)]
    Fault(#[from] Fault),
}

/// Encode a request envelope: method name plus positional parameters.
pub fn encode_request(
    method: &str,
    params: &[Value],
) -> Result<String, EncodeError> {
    let mut out: Vec<u8> = Vec::new();
    let mut w = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(false)
        .create_writer(&mut out);
    w.write(WriterEvent::start_element("methodCall"))?;
    w.write(WriterEvent::start_element("methodName"))?;
    w.write(WriterEvent::characters(method))?;
    w.write(WriterEvent::end_element())?;
    w.write(WriterEvent::start_element("params"))?;
    for param in params {
        w.write(WriterEvent::start_element("param"))?;
        write_value(&mut w, param)?;
        w.write(WriterEvent::end_element())?;
    }
    w.write(WriterEvent::end_element())?; // params
    w.write(WriterEvent::end_element())?; // methodCall
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn write_value<W: Write>(
    w: &mut EventWriter<W>,
    value: &Value,
) -> Result<(), EncodeError> {
    w.write(WriterEvent::start_element("value"))?;
    match value {
        Value::String(s) => {
            w.write(WriterEvent::start_element("string"))?;
            w.write(WriterEvent::characters(s))?;
            w.write(WriterEvent::end_element())?;
        }
        Value::Bool(b) => {
            w.write(WriterEvent::start_element("boolean"))?;
            w.write(WriterEvent::characters(if *b { "1" } else { "0" }))?;
            w.write(WriterEvent::end_element())?;
        }
        Value::Int(n) => {
            let text = n.to_string();
            w.write(WriterEvent::start_element("int"))?;
            w.write(WriterEvent::characters(&text))?;
            w.write(WriterEvent::end_element())?;
        }
        Value::Double(d) => {
            let text = d.to_string();
            w.write(WriterEvent::start_element("double"))?;
            w.write(WriterEvent::characters(&text))?;
            w.write(WriterEvent::end_element())?;
        }
        Value::Struct(members) => {
            w.write(WriterEvent::start_element("struct"))?;
            for (name, member) in members {
                w.write(WriterEvent::start_element("member"))?;
                w.write(WriterEvent::start_element("name"))?;
                w.write(WriterEvent::characters(name))?;
                w.write(WriterEvent::end_element())?;
                write_value(w, member)?;
                w.write(WriterEvent::end_element())?;
            }
            w.write(WriterEvent::end_element())?;
        }
        Value::Array(items) => {
            w.write(WriterEvent::start_element("array"))?;
            w.write(WriterEvent::start_element("data"))?;
            for item in items {
                write_value(w, item)?;
            }
            w.write(WriterEvent::end_element())?;
            w.write(WriterEvent::end_element())?;
        }
    }
    w.write(WriterEvent::end_element())?; // value
    Ok(())
}

/// Decode a response envelope into its single value. A `<fault>` response
/// yields [`DecodeError::Fault`] carrying the fault code and message.
pub fn decode_response(body: &str) -> Result<Value, DecodeError> {
    let mut reader = EventReader::new(body.as_bytes());
    let mut in_fault = false;
    let mut value = None;
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } => {
                match name.local_name.as_str() {
                    "methodResponse" | "params" | "param" => {}
                    "fault" => in_fault = true,
                    "value" => value = Some(parse_value(&mut reader)?),
                    _ => return Err(DecodeError::Malformed("unexpected element in envelope")),
                }
            }
            XmlEvent::EndDocument => break,
            _ => {}
        }
    }
    let value = value.ok_or(DecodeError::NoValue)?;
    if in_fault {
        Err(DecodeError::Fault(fault_from_value(value)?))
    } else {
        Ok(value)
    }
}

fn fault_from_value(value: Value) -> Result<Fault, DecodeError> {
    let Value::Struct(members) = value else {
        return Err(DecodeError::Malformed("fault value is not a struct"));
    };
    let code = members
        .get("faultCode")
        .and_then(Value::as_int)
        .ok_or(DecodeError::Malformed("fault struct missing faultCode"))?;
    let message = members
        .get("faultString")
        .and_then(Value::as_str)
        .ok_or(DecodeError::Malformed("fault struct missing faultString"))?
        .to_string();
    Ok(Fault { code, message })
}

/// Parse one `<value>` body; the caller has already consumed the start
/// element. An untyped value is a string per the XML-RPC spec.
fn parse_value<R: Read>(
    reader: &mut EventReader<R>,
) -> Result<Value, DecodeError> {
    let mut text = String::new();
    let mut typed = None;
    loop {
        match reader.next()? {
            XmlEvent::Characters(s) | XmlEvent::CData(s) => text.push_str(&s),
            XmlEvent::Whitespace(_) => {}
            XmlEvent::StartElement { name, .. } => {
                let tag = name.local_name;
                let parsed = match tag.as_str() {
                    "string" => Value::String(read_text(reader, "string")?),
                    "int" | "i4" => {
                        let t = read_text(reader, &tag)?;
                        Value::Int(
                            t.trim().parse().map_err(|_| {
                                DecodeError::Malformed("bad int value")
                            })?,
                        )
                    }
                    "boolean" => match read_text(reader, "boolean")?.trim() {
                        "1" | "true" => Value::Bool(true),
                        "0" | "false" => Value::Bool(false),
                        _ => {
                            return Err(DecodeError::Malformed(
                                "bad boolean value",
                            ))
                        }
                    },
                    "double" => {
                        let t = read_text(reader, "double")?;
                        Value::Double(t.trim().parse().map_err(|_| {
                            DecodeError::Malformed("bad double value")
                        })?)
                    }
                    "struct" => parse_struct(reader)?,
                    "array" => parse_array(reader)?,
                    _ => {
                        return Err(DecodeError::Malformed(
                            "unknown value type tag",
                        ))
                    }
                };
                typed = Some(parsed);
            }
            XmlEvent::EndElement { name }
                if name.local_name == "value" =>
            {
                return Ok(typed.unwrap_or(Value::String(text)));
            }
            XmlEvent::EndDocument => {
                return Err(DecodeError::Malformed("truncated value"))
            }
            _ => {}
        }
    }
}

/// Read character content up to the matching end element.
fn read_text<R: Read>(
    reader: &mut EventReader<R>,
    tag: &str,
) -> Result<String, DecodeError> {
    let mut text = String::new();
    loop {
        match reader.next()? {
            XmlEvent::Characters(s) | XmlEvent::CData(s) => text.push_str(&s),
            XmlEvent::Whitespace(s) => text.push_str(&s),
            XmlEvent::EndElement { name } if name.local_name == tag => {
                return Ok(text)
            }
            XmlEvent::EndDocument => {
                return Err(DecodeError::Malformed("truncated scalar"))
            }
            _ => return Err(DecodeError::Malformed("unexpected scalar body")),
        }
    }
}

fn parse_struct<R: Read>(
    reader: &mut EventReader<R>,
) -> Result<Value, DecodeError> {
    let mut members = std::collections::BTreeMap::new();
    let mut member_name: Option<String> = None;
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } => {
                match name.local_name.as_str() {
                    "member" => member_name = None,
                    "name" => member_name = Some(read_text(reader, "name")?),
                    "value" => {
                        let member = parse_value(reader)?;
                        let name = member_name.take().ok_or(
                            DecodeError::Malformed("struct value before name"),
                        )?;
                        members.insert(name, member);
                    }
                    _ => {
                        return Err(DecodeError::Malformed(
                            "unexpected element in struct",
                        ))
                    }
                }
            }
            XmlEvent::EndElement { name }
                if name.local_name == "struct" =>
            {
                return Ok(Value::Struct(members));
            }
            XmlEvent::EndDocument => {
                return Err(DecodeError::Malformed("truncated struct"))
            }
            _ => {}
        }
    }
}

fn parse_array<R: Read>(
    reader: &mut EventReader<R>,
) -> Result<Value, DecodeError> {
    let mut items = Vec::new();
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } => {
                match name.local_name.as_str() {
                    "data" => {}
                    "value" => items.push(parse_value(reader)?),
                    _ => {
                        return Err(DecodeError::Malformed(
                            "unexpected element in array",
                        ))
                    }
                }
            }
            XmlEvent::EndElement { name }
                if name.local_name == "array" =>
            {
                return Ok(Value::Array(items));
            }
            XmlEvent::EndDocument => {
                return Err(DecodeError::Malformed("truncated array"))
            }
            _ => {}
        }
    }
}
