use std::collections::BTreeMap;

/// Column name -> value mapping built while scanning one registry entry
/// (one ASN's whois block, or one `route`/`route6` object).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeRecord {
    values: BTreeMap<String, String>,
}

impl AttributeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Overwrites any existing value
    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        self.values.insert(column.to_string(), value.into());
    }

    /// Appends to an existing value with a newline, or sets it when absent
    pub fn append(&mut self, column: &str, value: &str) {
        match self.values.get_mut(column) {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => self.set(column, value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}
