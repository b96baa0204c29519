//! SOAP 1.1 envelope reading and writing

use std::collections::HashMap;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::ProtocolError;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Operation name and parameters extracted from an envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolRequest {
    /// Local name of the first element inside `Body`
    pub operation: String,
    /// Child elements of the operation element, by local name
    pub parameters: HashMap<String, String>,
}

impl ProtocolRequest {
    /// Non-empty, trimmed value of a parameter
    pub fn param(&self, name: &'static str) -> Result<&str, ProtocolError> {
        self.parameters
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or(ProtocolError::MissingField(name))
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// Parse a request envelope.
///
/// Namespace prefixes are ignored. Only the first element inside `Body` is
/// read; for duplicate parameters the first occurrence wins.
pub fn parse_request(xml: &str) -> Result<ProtocolRequest, ProtocolError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut saw_root = false;
    let mut saw_body = false;
    let mut request: Option<ProtocolRequest> = None;
    // True while inside the operation element
    let mut collecting = false;
    let mut current_param: Option<String> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))?;

        match event {
            Event::Start(ref element) | Event::Empty(ref element) => {
                let name = local_name(element);
                let is_empty = matches!(event, Event::Empty(_));

                match path.len() {
                    0 => {
                        if name != "Envelope" {
                            return Err(ProtocolError::InvalidEnvelope(format!(
                                "root element is {name}, expected Envelope"
                            )));
                        }
                        saw_root = true;
                    }
                    1 if name == "Body" => saw_body = true,
                    2 if path[1] == "Body" => {
                        if request.is_none() {
                            request = Some(ProtocolRequest {
                                operation: name.clone(),
                                parameters: HashMap::new(),
                            });
                            collecting = !is_empty;
                        } else {
                            collecting = false;
                        }
                    }
                    3 if collecting => {
                        if let Some(request) = request.as_mut() {
                            if !request.parameters.contains_key(&name) {
                                request.parameters.insert(name.clone(), String::new());
                                if !is_empty {
                                    current_param = Some(name.clone());
                                }
                            }
                        }
                    }
                    _ => {}
                }

                if !is_empty {
                    path.push(name);
                }
            }
            Event::Text(text) if path.len() == 4 => {
                if let (Some(param), Some(request)) = (&current_param, request.as_mut()) {
                    let value = text
                        .unescape()
                        .map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))?;
                    if let Some(slot) = request.parameters.get_mut(param) {
                        slot.push_str(&value);
                    }
                }
            }
            Event::CData(data) if path.len() == 4 => {
                if let (Some(param), Some(request)) = (&current_param, request.as_mut()) {
                    if let Some(slot) = request.parameters.get_mut(param) {
                        slot.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
            }
            Event::End(_) => {
                match path.len() {
                    4 => current_param = None,
                    3 => collecting = false,
                    _ => {}
                }
                path.pop();
            }
            Event::Eof => {
                if !path.is_empty() {
                    return Err(ProtocolError::InvalidEnvelope(
                        "unexpected end of document".to_string(),
                    ));
                }
                break;
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(ProtocolError::InvalidEnvelope(
            "missing Envelope element".to_string(),
        ));
    }
    if !saw_body {
        return Err(ProtocolError::InvalidEnvelope(
            "missing Body element".to_string(),
        ));
    }
    request.ok_or_else(|| ProtocolError::InvalidEnvelope("empty Body element".to_string()))
}

/// Wrap an operation response in a success envelope
pub fn response_envelope(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soap:Envelope xmlns:soap=\"{SOAP_ENV_NS}\">\
         <soap:Body>{body}</soap:Body>\
         </soap:Envelope>"
    )
}

/// Build an envelope calling `operation`; parameter values are escaped
pub fn request_envelope(operation: &str, parameters: &[(&str, &str)]) -> String {
    let parameters: String = parameters
        .iter()
        .map(|(name, value)| element(name, value))
        .collect();
    response_envelope(&format!("<{operation}>{parameters}</{operation}>"))
}

/// Build a fault envelope; both texts are escaped
pub fn fault_envelope(faultcode: &str, faultstring: &str) -> String {
    response_envelope(&format!(
        "<soap:Fault><faultcode>{}</faultcode><faultstring>{}</faultstring></soap:Fault>",
        escape(faultcode),
        escape(faultstring)
    ))
}

/// `<name>text</name>` with the text escaped
pub fn element(name: &str, text: &str) -> String {
    format!("<{name}>{}</{name}>", escape(text))
}
