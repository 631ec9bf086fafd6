use serde_json::Value;

/// One fragment of a server response pertaining to one or more source
/// events (GLOSSARY "EdgeEventHandle"). Handed to completion handlers
/// exactly as parsed, in the order the server streamed them.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeEventHandle {
    pub handle_type: Option<String>,
    pub payload: Vec<Value>,
    pub event_index: Option<usize>,
}
