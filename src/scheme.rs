use std::collections::HashMap;

use crate::config::ProtocolTable;

/// How the browser relates to a URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeSupport {
    Enabled,
    Disabled,
    Unsupported,
}

/// Knows every scheme the browser can speak and whether the operator
/// has switched it off. Consulted before any request is dispatched.
#[derive(Debug, Clone)]
pub struct SchemeRegistry {
    table: HashMap<&'static str, bool>,
}

impl SchemeRegistry {
    pub fn new(protocols: &ProtocolTable) -> Self {
        let table = HashMap::from([
            ("gemini", protocols.gemini),
            ("gopher", protocols.gopher),
            ("finger", protocols.finger),
            ("http", protocols.http),
            ("https", protocols.https),
            ("file", protocols.file),
            ("about", protocols.about),
        ]);
        Self { table }
    }

    pub fn support(&self, scheme: &str) -> SchemeSupport {
        match self.table.get(scheme) {
            Some(true) => SchemeSupport::Enabled,
            Some(false) => SchemeSupport::Disabled,
            None => SchemeSupport::Unsupported,
        }
    }

    pub fn set_enabled(&mut self, scheme: &str, enabled: bool) {
        if let Some(entry) = self.table.get_mut(scheme) {
            *entry = enabled;
        }
    }
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        Self::new(&ProtocolTable::default())
    }
}
