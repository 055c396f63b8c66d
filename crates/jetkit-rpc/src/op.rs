use serde::Serialize;
use tracing::warn;

/// Request id sent with every operational command.
pub const OP_REQUEST_ID: u64 = 42;

/// Command run when none is given.
pub const DEFAULT_COMMAND: &str = "show version";

/// Output format of an operational command reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "OPERATION_FORMAT_XML")]
    Xml,
    #[serde(rename = "OPERATION_FORMAT_JSON")]
    Json,
    #[serde(rename = "OPERATION_FORMAT_CLI")]
    Cli,
}

impl OutputFormat {
    /// Parse `xml`, `json` or `cli` in any case. Anything else falls back to
    /// XML with a warning.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "XML" => Self::Xml,
            "JSON" => Self::Json,
            "CLI" => Self::Cli,
            _ => {
                warn!(format = s, "Unrecognised format type, defaulting to XML");
                Self::Xml
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpCommandRequest {
    pub request_id: u64,
    pub cli_command: String,
    pub out_format: OutputFormat,
}

impl OpCommandRequest {
    pub fn new(command: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            request_id: OP_REQUEST_ID,
            cli_command: command.into(),
            out_format: format,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpCommandReply {
    pub data: String,
}

/// The reply as printed by the op client.
pub fn render_reply(reply: &OpCommandReply) -> String {
    format!("\n---Data---\n\n{}", reply.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_parsing_ignores_case() {
        assert_eq!(OutputFormat::parse_lenient("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse_lenient("Json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse_lenient("CLI"), OutputFormat::Cli);
        assert_eq!(OutputFormat::parse_lenient("xml"), OutputFormat::Xml);
    }

    #[test_log::test]
    fn test_unknown_format_falls_back_to_xml() {
        assert_eq!(OutputFormat::parse_lenient("yaml"), OutputFormat::Xml);
        assert_eq!(OutputFormat::parse_lenient(""), OutputFormat::Xml);
    }

    #[test]
    fn test_request_defaults() {
        let request = OpCommandRequest::new(DEFAULT_COMMAND, OutputFormat::default());
        assert_eq!(request.request_id, 42);
        assert_eq!(request.cli_command, "show version");
        assert_eq!(
            serde_json::to_value(&request).unwrap()["out_format"],
            "OPERATION_FORMAT_XML"
        );
    }

    #[test]
    fn test_rendered_reply() {
        let reply = OpCommandReply {
            data: "<software-information/>".to_string(),
        };
        assert_eq!(render_reply(&reply), "\n---Data---\n\n<software-information/>");
    }
}
