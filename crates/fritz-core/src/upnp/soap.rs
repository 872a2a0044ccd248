use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

/// Depth of the out arguments: Envelope > Body > {Action}Response > argument.
const ARGUMENT_DEPTH: usize = 4;

pub(crate) fn envelope(service_type: &str, action: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
            r#"<s:Body><u:{action} xmlns:u="{service_type}"></u:{action}></s:Body>"#,
            r#"</s:Envelope>"#,
        ),
        action = action,
        service_type = service_type,
    )
}

pub(crate) fn soap_action_header(service_type: &str, action: &str) -> String {
    format!("\"{service_type}#{action}\"")
}

/// Collects the text of every out argument of a SOAP response, keyed by the
/// argument's local element name.
pub(crate) fn parse_response(body: &str) -> Result<BTreeMap<String, String>, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut values = BTreeMap::new();
    let mut depth = 0_usize;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => {
                depth += 1;
                if depth == ARGUMENT_DEPTH {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    values.insert(name.clone(), String::new());
                    current = Some(name);
                }
            }
            Event::Empty(empty) => {
                if depth + 1 == ARGUMENT_DEPTH {
                    let name = String::from_utf8_lossy(empty.local_name().as_ref()).into_owned();
                    values.insert(name, String::new());
                }
            }
            Event::Text(text) => {
                if let (true, Some(name)) = (depth == ARGUMENT_DEPTH, current.as_ref()) {
                    let text = text.unescape().map_err(|e| e.to_string())?;
                    values.insert(name.clone(), text.into_owned());
                }
            }
            Event::CData(data) => {
                if let (true, Some(name)) = (depth == ARGUMENT_DEPTH, current.as_ref()) {
                    values.insert(name.clone(), String::from_utf8_lossy(&data).into_owned());
                }
            }
            Event::End(_) => {
                if depth == ARGUMENT_DEPTH {
                    current = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err("unexpected end of document".to_string());
    }

    Ok(values)
}

pub(crate) fn parse_fault(body: &str) -> Option<(String, String)> {
    let code = first_text(body, "errorCode")?;
    let description = first_text(body, "errorDescription").unwrap_or_default();
    Some((code, description))
}

fn first_text(body: &str, local_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut inside = false;

    loop {
        match reader.read_event().ok()? {
            Event::Start(start) => inside = start.local_name().as_ref() == local_name.as_bytes(),
            Event::Text(text) if inside => return text.unescape().ok().map(|t| t.into_owned()),
            Event::End(_) => inside = false,
            Event::Eof => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<u:GetStatusInfoResponse xmlns:u="urn:schemas-upnp-org:service:WANIPConnection:1">
<NewConnectionStatus>Connected</NewConnectionStatus>
<NewLastConnectionError>ERROR_NONE</NewLastConnectionError>
<NewUptime>86400</NewUptime>
<NewComment/>
</u:GetStatusInfoResponse>
</s:Body>
</s:Envelope>"#;

    const FAULT_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
<s:Body>
<s:Fault>
<faultcode>s:Client</faultcode>
<faultstring>UPnPError</faultstring>
<detail>
<UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
<errorCode>401</errorCode>
<errorDescription>Invalid Action</errorDescription>
</UPnPError>
</detail>
</s:Fault>
</s:Body>
</s:Envelope>"#;

    #[test]
    fn envelope_names_action_and_service() {
        let body = envelope("urn:schemas-upnp-org:service:WANIPConnection:1", "GetStatusInfo");
        assert!(body.contains(
            r#"<u:GetStatusInfo xmlns:u="urn:schemas-upnp-org:service:WANIPConnection:1">"#
        ));
        assert!(body.ends_with("</s:Envelope>"));
    }

    #[test]
    fn response_arguments_are_collected_by_local_name() {
        let values = parse_response(STATUS_RESPONSE).expect("parse");

        assert_eq!(values.get("NewConnectionStatus").map(String::as_str), Some("Connected"));
        assert_eq!(values.get("NewUptime").map(String::as_str), Some("86400"));
        assert_eq!(values.get("NewComment").map(String::as_str), Some(""));
        assert!(!values.contains_key("GetStatusInfoResponse"));
    }

    #[test]
    fn truncated_response_is_rejected() {
        let truncated = &STATUS_RESPONSE[..STATUS_RESPONSE.len() / 2];
        assert!(parse_response(truncated).is_err());
    }

    #[test]
    fn fault_code_and_description_are_extracted() {
        let fault = parse_fault(FAULT_RESPONSE).expect("fault");
        assert_eq!(fault, ("401".to_string(), "Invalid Action".to_string()));
        assert!(parse_fault(STATUS_RESPONSE).is_none());
    }
}
