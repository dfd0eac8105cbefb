pub mod profile;

use crate::record::AttributeRecord;

pub use profile::{Boundary, Profile, Transform};

/// Scans a whois reply or an RPSL flat file line by line and yields every
/// finalized record. Parsing is best effort: lines that cannot be split and
/// attributes the profile does not know are skipped.
pub struct RecordParser<I> {
    lines: I,
    profile: &'static Profile,
    source: String,
    state: ScanState,
    exhausted: bool,
    // the most recently closed block failed validation
    last_rejected: bool,
}

#[derive(Default)]
struct ScanState {
    record: AttributeRecord,
    raw: String,
    started: bool,
    // key of the last accepted attribute, target of continuation lines
    last_key: Option<String>,
    // column of the previous attribute line, None when it was unmapped
    prev_column: Option<&'static str>,
    saw_blank: bool,
    closed: bool,
}

impl<I> RecordParser<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    pub fn new(lines: I, profile: &'static Profile, source: &str) -> Self {
        Self {
            lines,
            profile,
            source: source.to_string(),
            state: ScanState::default(),
            exhausted: false,
            last_rejected: false,
        }
    }

    fn consume(&mut self, raw_line: &str) -> Option<AttributeRecord> {
        let line = raw_line.trim_end().replace('\t', " ");

        if line.is_empty() {
            return match self.profile.boundary {
                Boundary::BlankLine => self.finish(),
                Boundary::PrimaryKey => {
                    self.state.saw_blank = true;
                    None
                }
            };
        }

        let first = line.chars().next()?;
        if first == '#' || first == '%' {
            return None;
        }

        if first.is_whitespace() {
            self.continuation(&line);
            return None;
        }

        let (key, value) = line.split_once(": ")?;
        let key = key.trim();
        let value = sanitize(value);

        let profile = self.profile;
        let emitted = if profile.is_primary_key(key) && self.state.started {
            self.finish()
        } else {
            None
        };

        self.state.started = true;
        if profile.keep_raw {
            self.state.raw.push_str(line.trim());
            self.state.raw.push('\n');
        }

        let attribute = profile.attribute(key);
        let column = attribute.map(|a| a.column);

        match attribute {
            Some(attribute) if !self.state.closed => {
                self.apply(*attribute, &value);
                self.state.last_key = Some(key.to_string());
            }
            _ => self.state.last_key = None,
        }

        if profile.close_after_address && !self.state.closed {
            self.state.closed = self.address_complete(column);
        }
        self.state.prev_column = column;

        emitted
    }

    fn continuation(&mut self, line: &str) {
        let profile = self.profile;
        let Some(key) = self.state.last_key.as_deref() else {
            return;
        };
        if !profile.is_continuable(key) {
            return;
        }
        let Some(attribute) = profile.attribute(key) else {
            return;
        };
        if !self.state.record.contains(attribute.column) {
            return;
        }

        let value = sanitize(line);
        if profile.keep_raw {
            self.state.raw.push_str(&value);
            self.state.raw.push('\n');
        }
        self.state.record.append(attribute.column, &value);
    }

    fn apply(&mut self, attribute: profile::Attribute, value: &str) {
        let record = &mut self.state.record;
        match attribute.transform {
            Transform::Plain => {
                if self.profile.is_multi_valued(attribute.column) {
                    record.append(attribute.column, value);
                } else {
                    record.set(attribute.column, value);
                }
            }
            Transform::Prefix => {
                if let Some((prefix, len)) = value.split_once('/') {
                    if let Ok(len) = len.trim().parse::<u8>() {
                        record.set(attribute.column, prefix.trim());
                        record.set("prefix_len", len.to_string());
                    }
                }
            }
            Transform::OriginAsn => {
                if let Some(asn) = parse_asn(value) {
                    record.set(attribute.column, asn.to_string());
                }
            }
        }
    }

    // Registries list the organisation address near the top; everything
    // after it (contacts, roles) carries addresses of other entities.
    fn address_complete(&self, column: Option<&'static str>) -> bool {
        let state = &self.state;
        if !state.record.contains("address") {
            return false;
        }
        if column == Some("country") {
            return true;
        }
        state.prev_column == Some("address")
            && column != Some("address")
            && (state.record.contains("country") || state.saw_blank)
    }

    fn finish(&mut self) -> Option<AttributeRecord> {
        let state = std::mem::take(&mut self.state);
        if !state.started {
            return None;
        }

        let mut record = state.record;
        let missing = self
            .profile
            .required
            .iter()
            .any(|column| !record.contains(column));
        let ranged = self.profile.reject_ranges
            && record.get("as_number").is_some_and(|asn| asn.contains('-'));
        self.last_rejected = missing || ranged;
        if self.last_rejected {
            return None;
        }

        if !record.contains("source") {
            record.set("source", self.source.as_str());
        }

        if self.profile.derive_location {
            derive_location(&mut record);
        }

        if self.profile.keep_raw {
            record.set("raw_output", state.raw.trim());
        }

        Some(record)
    }
}

impl<I> Iterator for RecordParser<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = AttributeRecord;

    fn next(&mut self) -> Option<AttributeRecord> {
        if self.exhausted {
            return None;
        }
        while let Some(line) = self.lines.next() {
            if let Some(record) = self.consume(line.as_ref()) {
                return Some(record);
            }
        }
        self.exhausted = true;
        self.finish()
    }
}

/// Parses a complete whois reply; the last block wins, so an empty record
/// comes back when that block was rejected or the reply held nothing usable.
pub fn parse_whois_reply(text: &str, profile: &'static Profile, source: &str) -> AttributeRecord {
    let mut parser = RecordParser::new(text.lines(), profile, source);
    let last = parser.by_ref().last();
    if parser.last_rejected {
        return AttributeRecord::new();
    }
    last.unwrap_or_default()
}

/// `AS65000`, `65000`, `AS1.1` (asdot) and `AS100 # note` all yield a
/// plain 32-bit ASN.
pub fn parse_asn(value: &str) -> Option<u32> {
    let value = value.trim();
    let value = match value.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("as") => &value[2..],
        _ => value,
    };
    let token = value.split_whitespace().next()?;

    match token.split_once('.') {
        Some((high, low)) => {
            let high: u16 = high.parse().ok()?;
            let low: u16 = low.parse().ok()?;
            Some((u32::from(high) << 16) + u32::from(low))
        }
        None => token.parse().ok(),
    }
}

fn sanitize(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| *c != '\'' && *c != '\\')
        .collect()
}

// last address line is normally the country, the one before it the state
fn derive_location(record: &mut AttributeRecord) {
    let Some(address) = record.get("address") else {
        return;
    };
    let lines: Vec<String> = address.lines().map(str::to_string).collect();

    if !record.contains("country") {
        if let Some(country) = lines.last() {
            record.set("country", country.as_str());
        }
    }
    if !record.contains("state_prov") && lines.len() >= 2 {
        record.set("state_prov", lines[lines.len() - 2].as_str());
    }
}
