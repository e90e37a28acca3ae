//! Minimal HL7 v2 (ER7) message tree.
//!
//! A message is parsed into segments -> fields -> repeats -> components ->
//! subcomponents, each addressed 1-based. Separators are taken from the
//! `MSH` header. In `MSH`, field 1 is the field separator itself and field 2
//! the encoding characters, so `MSH-7` and `MSH-10` line up with the standard.

use std::fmt;

use crate::error::ExtractError;

/// Delimiters declared in `MSH-1` / `MSH-2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Delimiters {
    fn from_header(header: &str) -> Result<Self, ExtractError> {
        let mut chars = header.chars().skip(3);
        let field = chars
            .next()
            .ok_or_else(|| ExtractError::Parse("MSH segment has no field separator".to_string()))?;
        let encoding: Vec<char> = chars.take_while(|c| *c != field).collect();
        let defaults = Self::default();
        Ok(Self {
            field,
            component: encoding.first().copied().unwrap_or(defaults.component),
            repetition: encoding.get(1).copied().unwrap_or(defaults.repetition),
            escape: encoding.get(2).copied().unwrap_or(defaults.escape),
            subcomponent: encoding.get(3).copied().unwrap_or(defaults.subcomponent),
        })
    }

    fn encoding_chars(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }

    /// Resolve escape sequences in a leaf value.
    fn unescape(&self, value: &str) -> String {
        if !value.contains(self.escape) {
            return value.to_string();
        }
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find(self.escape) {
            out.push_str(&rest[..start]);
            let after = &rest[start + self.escape.len_utf8()..];
            match after.find(self.escape) {
                Some(end) => {
                    let code = &after[..end];
                    match code {
                        "F" => out.push(self.field),
                        "S" => out.push(self.component),
                        "T" => out.push(self.subcomponent),
                        "R" => out.push(self.repetition),
                        "E" => out.push(self.escape),
                        ".br" => out.push('\n'),
                        "H" | "N" => {}
                        other => {
                            out.push(self.escape);
                            out.push_str(other);
                            out.push(self.escape);
                        }
                    }
                    rest = &after[end + self.escape.len_utf8()..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Smallest addressable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    subcomponents: Vec<String>,
    raw: String,
}

impl Component {
    /// 1-based subcomponent lookup.
    pub fn subcomponent(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.subcomponents.get(i))
            .map(String::as_str)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One repetition of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repeat {
    components: Vec<Component>,
    raw: String,
}

impl Repeat {
    /// 1-based component lookup.
    pub fn component(&self, index: usize) -> Option<&Component> {
        index.checked_sub(1).and_then(|i| self.components.get(i))
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A field with one or more repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    repeats: Vec<Repeat>,
    raw: String,
}

impl Field {
    /// 1-based repeat lookup.
    pub fn repeat(&self, index: usize) -> Option<&Repeat> {
        index.checked_sub(1).and_then(|i| self.repeats.get(i))
    }

    pub fn repeats(&self) -> &[Repeat] {
        &self.repeats
    }

    /// Whether the field carries no content at all.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Raw text of the field, delimiters included.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A named segment (`MSH`, `PID`, `OBX`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    name: String,
    fields: Vec<Field>,
}

impl Segment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based field lookup. Field 0 (the segment name) is not addressable.
    pub fn field(&self, index: usize) -> Option<&Field> {
        index.checked_sub(1).and_then(|i| self.fields.get(i))
    }

    /// Number of fields after the segment name.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A parsed HL7 v2 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    delimiters: Delimiters,
    segments: Vec<Segment>,
}

impl Message {
    /// Parse ER7 text. Segments may be separated by `\r`, `\n` or `\r\n`.
    pub fn parse(text: &str) -> Result<Self, ExtractError> {
        let mut lines = text
            .split(['\r', '\n'])
            .filter(|line| !line.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| ExtractError::Parse("empty message".to_string()))?
            .trim_start();
        if !header.starts_with("MSH") {
            return Err(ExtractError::Parse(format!(
                "message must start with MSH, found {:?}",
                header.chars().take(3).collect::<String>()
            )));
        }

        let delimiters = Delimiters::from_header(header)?;
        let mut segments = vec![parse_msh(header, &delimiters)];
        for line in lines {
            segments.push(parse_segment(line.trim_start(), &delimiters));
        }

        Ok(Self {
            delimiters,
            segments,
        })
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    /// First segment with the given name.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    /// All segments with the given name, in message order.
    pub fn segments<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.name == name)
    }

    /// Every segment in message order.
    pub fn all_segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Look up one leaf value in the first segment named `segment`.
    ///
    /// Returns `None` when the segment, field, repeat, component or
    /// subcomponent is absent. Escape sequences are resolved.
    pub fn extract(
        &self,
        segment: &str,
        field: usize,
        repeat: usize,
        component: usize,
        subcomponent: usize,
    ) -> Option<String> {
        self.segment(segment)
            .and_then(|s| s.field(field))
            .and_then(|f| f.repeat(repeat))
            .and_then(|r| r.component(component))
            .and_then(|c| c.subcomponent(subcomponent))
            .map(|value| self.delimiters.unescape(value))
    }

    /// Resolve escape sequences using this message's delimiters.
    pub fn unescape(&self, value: &str) -> String {
        self.delimiters.unescape(value)
    }
}

fn parse_msh(line: &str, delimiters: &Delimiters) -> Segment {
    let field_sep = delimiters.field.to_string();
    let encoding = delimiters.encoding_chars();
    let mut fields = vec![literal_field(&field_sep), literal_field(&encoding)];

    // Skip "MSH", the separator and the encoding characters field.
    let body = line.get(3 + delimiters.field.len_utf8()..).unwrap_or("");
    let mut parts = body.split(delimiters.field);
    parts.next();
    fields.extend(parts.map(|raw| parse_field(raw, delimiters)));

    Segment {
        name: "MSH".to_string(),
        fields,
    }
}

fn parse_segment(line: &str, delimiters: &Delimiters) -> Segment {
    let mut parts = line.split(delimiters.field);
    let name = parts.next().unwrap_or_default().to_string();
    let fields = parts.map(|raw| parse_field(raw, delimiters)).collect();
    Segment { name, fields }
}

fn literal_field(value: &str) -> Field {
    let component = Component {
        subcomponents: vec![value.to_string()],
        raw: value.to_string(),
    };
    let repeat = Repeat {
        components: vec![component],
        raw: value.to_string(),
    };
    Field {
        repeats: vec![repeat],
        raw: value.to_string(),
    }
}

fn parse_field(raw: &str, delimiters: &Delimiters) -> Field {
    let repeats = raw
        .split(delimiters.repetition)
        .map(|rep| Repeat {
            components: rep
                .split(delimiters.component)
                .map(|comp| Component {
                    subcomponents: comp
                        .split(delimiters.subcomponent)
                        .map(str::to_string)
                        .collect(),
                    raw: comp.to_string(),
                })
                .collect(),
            raw: rep.to_string(),
        })
        .collect();
    Field {
        repeats,
        raw: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MSH|^~\\&|EPIC|ABC|PACS|ABC|20210101120000||ORU^R01|123456|P|2.7\r\
PID|1||123456789^^^EPIC^MRN~0000000001^^^ABC^MR|\r\
OBR|1|PL1|FL1|CT123^CT HEAD^LOCAL|";

    #[test]
    fn test_msh_field_numbering() {
        let msg = Message::parse(SAMPLE).unwrap();
        assert_eq!(msg.extract("MSH", 1, 1, 1, 1).as_deref(), Some("|"));
        assert_eq!(msg.extract("MSH", 2, 1, 1, 1).as_deref(), Some("^~\\&"));
        assert_eq!(msg.extract("MSH", 3, 1, 1, 1).as_deref(), Some("EPIC"));
        assert_eq!(
            msg.extract("MSH", 7, 1, 1, 1).as_deref(),
            Some("20210101120000")
        );
        assert_eq!(msg.extract("MSH", 9, 1, 2, 1).as_deref(), Some("R01"));
        assert_eq!(msg.extract("MSH", 10, 1, 1, 1).as_deref(), Some("123456"));
    }

    #[test]
    fn test_repeats_and_components() {
        let msg = Message::parse(SAMPLE).unwrap();
        let pid3 = msg.segment("PID").unwrap().field(3).unwrap();
        assert_eq!(pid3.repeats().len(), 2);
        assert_eq!(
            pid3.repeat(2).unwrap().component(4).unwrap().to_string(),
            "ABC"
        );
        assert_eq!(msg.extract("OBR", 4, 1, 2, 1).as_deref(), Some("CT HEAD"));
    }

    #[test]
    fn test_absent_addresses_are_none() {
        let msg = Message::parse(SAMPLE).unwrap();
        assert!(msg.extract("ZDS", 1, 1, 1, 1).is_none());
        assert!(msg.extract("PID", 40, 1, 1, 1).is_none());
        assert!(msg.extract("PID", 3, 3, 1, 1).is_none());
        assert!(msg.extract("PID", 3, 1, 9, 1).is_none());
        assert!(msg.extract("PID", 3, 1, 1, 2).is_none());
        assert!(msg.extract("PID", 0, 1, 1, 1).is_none());
    }

    #[test]
    fn test_empty_field_is_present() {
        let msg = Message::parse(SAMPLE).unwrap();
        assert_eq!(msg.extract("PID", 2, 1, 1, 1).as_deref(), Some(""));
    }

    #[test]
    fn test_newline_separated_segments() {
        let text = "\nMSH|^~\\&|A|B|C|D|20200101||ORU^R01|X1|P|2.5\nOBX|1|ST|A||hello\n";
        let msg = Message::parse(text).unwrap();
        assert_eq!(msg.all_segments().len(), 2);
        assert_eq!(msg.extract("OBX", 5, 1, 1, 1).as_deref(), Some("hello"));
    }

    #[test]
    fn test_trailing_whitespace_is_kept() {
        let text = "MSH|^~\\&|A|B|C|D|20200101||ORU^R01|X1|P|2.5\r\nOBX|1|TX|A||indented  \r\nOBX|2|TX|A||  \r";
        let msg = Message::parse(text).unwrap();
        let values: Vec<_> = msg
            .segments("OBX")
            .map(|s| s.field(5).unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["indented  ", "  "]);
    }

    #[test]
    fn test_unescape() {
        let text = "MSH|^~\\&|A\r\nNTE|1||a\\F\\b\\S\\c\\T\\d\\R\\e\\E\\f\\.br\\g\\X41\\";
        let msg = Message::parse(text).unwrap();
        assert_eq!(
            msg.extract("NTE", 3, 1, 1, 1).as_deref(),
            Some("a|b^c&d~e\\f\ng\\X41\\")
        );
    }

    #[test]
    fn test_custom_delimiters() {
        let text = "MSH#!*\\@#SENDER#FAC\rPID#1##ID1!X!Y*ID2";
        let msg = Message::parse(text).unwrap();
        assert_eq!(msg.delimiters().field, '#');
        assert_eq!(msg.extract("MSH", 3, 1, 1, 1).as_deref(), Some("SENDER"));
        assert_eq!(msg.extract("PID", 3, 2, 1, 1).as_deref(), Some("ID2"));
        assert_eq!(msg.extract("PID", 3, 1, 2, 1).as_deref(), Some("X"));
    }

    #[test]
    fn test_rejects_non_msh_start() {
        assert!(matches!(
            Message::parse("PID|1||123"),
            Err(ExtractError::Parse(_))
        ));
        assert!(matches!(Message::parse("  \r\n"), Err(ExtractError::Parse(_))));
    }
}
