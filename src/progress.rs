use serde_json::{Map, Value};

/// Progress events go to stdout, either as plain text or as one JSON object
/// per line for machine consumption. The mode is fixed at construction.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    json: bool,
}

impl ProgressReporter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn report(&self, format: &str, keyedvalues: &[(&str, Value)]) {
        if self.json {
            println!("{}", json_payload(format, keyedvalues));
        } else {
            println!("{}", substitute(format, keyedvalues));
        }
    }
}

/// Replaces each `{name}` placeholder with its keyed value. Unknown
/// placeholders are left untouched.
fn substitute(format: &str, keyedvalues: &[(&str, Value)]) -> String {
    let mut message = format.to_string();
    for (name, value) in keyedvalues {
        message = message.replace(&format!("{{{name}}}"), &display_value(value));
    }
    message
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_payload(format: &str, keyedvalues: &[(&str, Value)]) -> String {
    let mut keyed = Map::new();
    for (name, value) in keyedvalues {
        keyed.insert((*name).to_string(), value.clone());
    }

    // "values" stays for wire compatibility; all call sites pass keyed values.
    let payload = serde_json::json!({
        "message": substitute(format, keyedvalues),
        "format": format,
        "values": [],
        "keyedvalues": keyed,
    });
    payload.to_string()
}
