// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Control file primitives.

Both `Packages` feed indexes and the installed-package status database use
the Debian-style control stanza grammar: paragraphs of `Key: value` fields
separated by blank lines, where lines beginning with whitespace continue the
value of the preceding field.
*/

use {
    crate::error::{OpkgError, Result},
    std::fmt::{Display, Formatter},
    std::io::BufRead,
};

/// A single field in a control paragraph.
///
/// The name's case is preserved as it appeared in the source.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    /// The name of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value of this field.
    ///
    /// Continuation lines are folded with `\n`; the leading whitespace of
    /// each continuation line is not retained.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A paragraph in a control file.
///
/// Field names are case insensitive on read and case preserving on set.
/// Emission is in lexicographic field-name order so output is deterministic
/// regardless of source order.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set the value of a field.
    ///
    /// If a field with the same name (case insensitive compare) already
    /// exists, the old value is replaced.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.fields
            .retain(|f| !f.name.eq_ignore_ascii_case(&name));
        self.fields.push(ControlField {
            name,
            value: value.into(),
        });
    }

    /// Obtain the field with a given name, case insensitively.
    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value.as_str())
    }

    /// Field names sorted lexicographically.
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }

    fn append_to_field(&mut self, name: &str, continuation: &str) {
        if let Some(field) = self
            .fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(name))
        {
            field.value.push('\n');
            field.value.push_str(continuation);
        }
    }
}

impl Display for ControlParagraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, key) in self.sorted_keys().into_iter().enumerate() {
            let value = self.field_str(key).unwrap_or_default();
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", key, value.replace('\n', "\n "))?;
        }

        Ok(())
    }
}

/// Holds parsing state for control files.
///
/// Instances are fed lines of text and periodically emit [ControlParagraph]
/// instances as they are completed.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph,
    last_key: Option<String>,
}

impl ControlFileParser {
    /// Write a line to the parser.
    ///
    /// If the line terminates an in-progress paragraph, that paragraph is
    /// returned. Otherwise `Ok(None)` is returned.
    pub fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph>> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        // An empty line terminates the current paragraph.
        if line.is_empty() {
            self.last_key = None;

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let key = self
                .last_key
                .as_deref()
                .ok_or_else(|| OpkgError::ControlParse(format!("continuation before key: {}", line)))?
                .to_string();
            self.paragraph
                .append_to_field(&key, line.trim_start_matches(|c| c == ' ' || c == '\t'));

            return Ok(None);
        }

        let colon = line
            .find(':')
            .ok_or_else(|| OpkgError::ControlParse(line.to_string()))?;

        let key = line[..colon].trim();
        let value = line[colon + 1..].trim();
        self.paragraph.set_field(key, value);
        self.last_key = Some(key.to_string());

        Ok(None)
    }

    /// Finish parsing, consuming self.
    ///
    /// A non-empty trailing paragraph is flushed and returned.
    pub fn finish(self) -> Option<ControlParagraph> {
        if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        }
    }
}

/// A parsed control file: an ordered series of paragraphs.
#[derive(Clone, Debug, Default)]
pub struct ControlFile {
    paragraphs: Vec<ControlParagraph>,
}

impl ControlFile {
    /// Construct an instance by parsing data from a reader.
    ///
    /// Lines are buffered without an upper bound, so multi-megabyte
    /// `Description` values in feed indexes parse fine.
    pub fn parse_reader<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut paragraphs = Vec::new();
        let mut parser = ControlFileParser::default();
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line)?;

            if bytes_read == 0 {
                break;
            }

            if let Some(paragraph) = parser.write_line(&line)? {
                paragraphs.push(paragraph);
            }
        }

        if let Some(paragraph) = parser.finish() {
            paragraphs.push(paragraph);
        }

        Ok(Self { paragraphs })
    }

    /// Parse a control file from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        let mut reader = std::io::BufReader::new(s.as_bytes());
        Self::parse_reader(&mut reader)
    }

    /// Obtain paragraphs in this control file, in source order.
    pub fn paragraphs(&self) -> impl Iterator<Item = &ControlParagraph> {
        self.paragraphs.iter()
    }

    /// Obtain paragraphs in this control file, consuming self.
    pub fn into_paragraphs(self) -> impl Iterator<Item = ControlParagraph> {
        self.paragraphs.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_set_semantics() {
        let mut p = ControlParagraph::default();

        p.set_field("foo", "bar");
        p.set_field("foo", "baz");
        assert_eq!(p.field_str("foo"), Some("baz"));

        // Different case results in overwrite and lookup still works.
        p.set_field("FOO", "bar");
        assert_eq!(p.field_str("foo"), Some("bar"));
        assert_eq!(p.field_str("FOO"), Some("bar"));
        assert_eq!(p.fields.len(), 1);
    }

    #[test]
    fn parse_multiple_paragraphs() -> Result<()> {
        let cf = ControlFile::parse_str(
            "Package: alpha\nVersion: 1.0\n\nPackage: beta\nVersion: 2.0\n",
        )?;

        let paragraphs = cf.paragraphs().collect::<Vec<_>>();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].field_str("Package"), Some("alpha"));
        assert_eq!(paragraphs[1].field_str("version"), Some("2.0"));

        Ok(())
    }

    #[test]
    fn continuation_lines_fold() -> Result<()> {
        let cf = ControlFile::parse_str("Description: one\n two\n three\n")?;

        let p = cf.paragraphs().next().unwrap();
        assert_eq!(p.field_str("Description"), Some("one\ntwo\nthree"));

        Ok(())
    }

    #[test]
    fn tab_continuation_and_value_trim() -> Result<()> {
        let cf = ControlFile::parse_str("Depends:   libc  \n\textra\n")?;

        let p = cf.paragraphs().next().unwrap();
        assert_eq!(p.field_str("Depends"), Some("libc\nextra"));

        Ok(())
    }

    #[test]
    fn blank_line_before_eof_is_not_a_paragraph() -> Result<()> {
        let cf = ControlFile::parse_str("Package: alpha\n\n\n")?;
        assert_eq!(cf.paragraphs().count(), 1);

        Ok(())
    }

    #[test]
    fn continuation_before_key_is_an_error() {
        assert!(matches!(
            ControlFile::parse_str(" dangling\n"),
            Err(OpkgError::ControlParse(_))
        ));
    }

    #[test]
    fn line_without_colon_is_an_error() {
        assert!(matches!(
            ControlFile::parse_str("Package: alpha\nnot a field\n"),
            Err(OpkgError::ControlParse(_))
        ));
    }

    #[test]
    fn display_is_lexicographic_and_refolds() -> Result<()> {
        let cf = ControlFile::parse_str("Version: 1.0\nPackage: alpha\nDescription: one\n two\n")?;
        let p = cf.paragraphs().next().unwrap();

        assert_eq!(
            p.to_string(),
            "Description: one\n two\nPackage: alpha\nVersion: 1.0"
        );

        Ok(())
    }

    #[test]
    fn display_round_trips() -> Result<()> {
        let cf =
            ControlFile::parse_str("Package: alpha\nVersion: 1.0\nDescription: one\n two words\n")?;
        let original = cf.paragraphs().next().unwrap();

        let reparsed = ControlFile::parse_str(&original.to_string())?;
        let p = reparsed.paragraphs().next().unwrap();

        assert_eq!(p.sorted_keys(), original.sorted_keys());
        for key in original.sorted_keys() {
            assert_eq!(p.field_str(key), original.field_str(key));
        }

        Ok(())
    }
}
