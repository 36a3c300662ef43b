//! XML-RPC value model and document codec.
//!
//! Only the subset of XML-RPC that registry and peer traffic actually uses
//! is modelled: ints, booleans, doubles, strings, and arrays. Documents are
//! built by hand and parsed with `roxmltree`.

use std::fmt::Write as _;

use roslink_types::RosError;

/// An XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Int(i32),
    Bool(bool),
    Double(f64),
    Str(String),
    Array(Vec<RpcValue>),
}

impl RpcValue {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RpcValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i32> for RpcValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for RpcValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<RpcValue>> for RpcValue {
    fn from(v: Vec<RpcValue>) -> Self {
        Self::Array(v)
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn write_value(out: &mut String, value: &RpcValue) {
    out.push_str("<value>");
    match value {
        RpcValue::Int(v) => {
            let _ = write!(out, "<i4>{v}</i4>");
        }
        RpcValue::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", i32::from(*b));
        }
        RpcValue::Double(x) => {
            let _ = write!(out, "<double>{x}</double>");
        }
        RpcValue::Str(s) => {
            let _ = write!(out, "<string>{}</string>", escape_xml(s));
        }
        RpcValue::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
    }
    out.push_str("</value>");
}

/// Serialize a `<methodCall>` document.
pub fn encode_request(method: &str, params: &[RpcValue]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodCall>");
    let _ = write!(out, "<methodName>{}</methodName><params>", escape_xml(method));
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// Serialize a successful `<methodResponse>` document.
pub fn encode_response(value: &RpcValue) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodResponse><params><param>");
    write_value(&mut out, value);
    out.push_str("</param></params></methodResponse>");
    out
}

/// Serialize a `<fault>` response.
pub fn encode_fault(code: i32, message: &str) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodResponse><fault><value><struct>");
    let _ = write!(
        out,
        "<member><name>faultCode</name><value><i4>{code}</i4></value></member>"
    );
    let _ = write!(
        out,
        "<member><name>faultString</name><value><string>{}</string></value></member>",
        escape_xml(message)
    );
    out.push_str("</struct></value></fault></methodResponse>");
    out
}

fn rpc_err(reason: impl Into<String>) -> RosError {
    RosError::Rpc(reason.into())
}

fn parse_value(node: roxmltree::Node<'_, '_>) -> Result<RpcValue, RosError> {
    debug_assert_eq!(node.tag_name().name(), "value");
    let Some(typed) = node.children().find(|n| n.is_element()) else {
        // A bare <value>text</value> defaults to a string.
        return Ok(RpcValue::Str(node.text().unwrap_or_default().to_string()));
    };
    let text = || typed.text().unwrap_or_default();
    match typed.tag_name().name() {
        "i4" | "int" => text()
            .trim()
            .parse()
            .map(RpcValue::Int)
            .map_err(|e| rpc_err(format!("bad int: {e}"))),
        "boolean" => match text().trim() {
            "0" => Ok(RpcValue::Bool(false)),
            "1" => Ok(RpcValue::Bool(true)),
            other => Err(rpc_err(format!("bad boolean '{other}'"))),
        },
        "double" => text()
            .trim()
            .parse()
            .map(RpcValue::Double)
            .map_err(|e| rpc_err(format!("bad double: {e}"))),
        "string" => Ok(RpcValue::Str(text().to_string())),
        "array" => {
            let data = typed
                .children()
                .find(|n| n.has_tag_name("data"))
                .ok_or_else(|| rpc_err("array without <data>"))?;
            let items = data
                .children()
                .filter(|n| n.has_tag_name("value"))
                .map(parse_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RpcValue::Array(items))
        }
        other => Err(rpc_err(format!("unsupported value type <{other}>"))),
    }
}

/// Parse a `<methodCall>` document into (method name, params).
pub fn decode_request(xml: &str) -> Result<(String, Vec<RpcValue>), RosError> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| rpc_err(format!("bad xml: {e}")))?;
    let root = doc.root_element();
    if root.tag_name().name() != "methodCall" {
        return Err(rpc_err("expected <methodCall>"));
    }
    let method = root
        .children()
        .find(|n| n.has_tag_name("methodName"))
        .and_then(|n| n.text())
        .ok_or_else(|| rpc_err("missing <methodName>"))?
        .trim()
        .to_string();
    let params = match root.children().find(|n| n.has_tag_name("params")) {
        None => Vec::new(),
        Some(params_node) => params_node
            .children()
            .filter(|n| n.has_tag_name("param"))
            .map(|param| {
                param
                    .children()
                    .find(|n| n.has_tag_name("value"))
                    .ok_or_else(|| rpc_err("param without <value>"))
                    .and_then(parse_value)
            })
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok((method, params))
}

/// Parse a `<methodResponse>` document into its single value, mapping a
/// declared `<fault>` to [`RosError::RpcFault`].
pub fn decode_response(xml: &str) -> Result<RpcValue, RosError> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| rpc_err(format!("bad xml: {e}")))?;
    let root = doc.root_element();
    if root.tag_name().name() != "methodResponse" {
        return Err(rpc_err("expected <methodResponse>"));
    }

    if let Some(fault) = root.children().find(|n| n.has_tag_name("fault")) {
        let mut code = 0;
        let mut message = String::new();
        if let Some(strukt) = fault
            .children()
            .find(|n| n.has_tag_name("value"))
            .and_then(|v| v.children().find(|n| n.has_tag_name("struct")))
        {
            for member in strukt.children().filter(|n| n.has_tag_name("member")) {
                let name = member
                    .children()
                    .find(|n| n.has_tag_name("name"))
                    .and_then(|n| n.text())
                    .unwrap_or_default();
                let value = member
                    .children()
                    .find(|n| n.has_tag_name("value"))
                    .map(parse_value)
                    .transpose()?;
                match (name, value) {
                    ("faultCode", Some(RpcValue::Int(c))) => code = c,
                    ("faultString", Some(RpcValue::Str(s))) => message = s,
                    _ => {}
                }
            }
        }
        return Err(RosError::RpcFault { code, message });
    }

    root.children()
        .find(|n| n.has_tag_name("params"))
        .and_then(|params| params.children().find(|n| n.has_tag_name("param")))
        .and_then(|param| param.children().find(|n| n.has_tag_name("value")))
        .ok_or_else(|| rpc_err("response without a value"))
        .and_then(parse_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let params = vec![
            RpcValue::from("/talker"),
            RpcValue::from("/chatter"),
            RpcValue::Array(vec![RpcValue::Array(vec![RpcValue::from("TCPROS")])]),
        ];
        let xml = encode_request("requestTopic", &params);
        let (method, decoded) = decode_request(&xml).unwrap();
        assert_eq!(method, "requestTopic");
        assert_eq!(decoded, params);
    }

    #[test]
    fn response_round_trip() {
        let value = RpcValue::Array(vec![
            RpcValue::Int(1),
            RpcValue::from("ready"),
            RpcValue::Array(vec![
                RpcValue::from("TCPROS"),
                RpcValue::from("host"),
                RpcValue::Int(49152),
            ]),
        ]);
        let xml = encode_response(&value);
        assert_eq!(decode_response(&xml).unwrap(), value);
    }

    #[test]
    fn fault_decodes_to_error() {
        let xml = encode_fault(4, "no such method");
        match decode_response(&xml) {
            Err(RosError::RpcFault { code, message }) => {
                assert_eq!(code, 4);
                assert_eq!(message, "no such method");
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn special_characters_survive() {
        let value = RpcValue::from("a<b & c>d");
        let xml = encode_response(&value);
        assert_eq!(decode_response(&xml).unwrap(), value);
    }

    #[test]
    fn bare_value_text_is_string() {
        let xml = "<?xml version=\"1.0\"?><methodResponse><params><param>\
                   <value>plain</value></param></params></methodResponse>";
        assert_eq!(decode_response(xml).unwrap(), RpcValue::from("plain"));
    }

    #[test]
    fn bool_and_double_round_trip() {
        let value = RpcValue::Array(vec![RpcValue::Bool(true), RpcValue::Double(2.5)]);
        let xml = encode_response(&value);
        assert_eq!(decode_response(&xml).unwrap(), value);
    }

    #[test]
    fn garbage_is_rpc_error() {
        assert!(matches!(decode_response("not xml"), Err(RosError::Rpc(_))));
        assert!(matches!(decode_request("<hello/>"), Err(RosError::Rpc(_))));
    }
}
