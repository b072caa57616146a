//! Header driven column mapping.
//!
//! Upstream tables and sheets identify columns only by loosely worded headers
//! ("Total Confirmed cases (Indian National)", "Detected City", ...). A
//! `FieldMap` is an ordered list of rules; each header is resolved to the
//! first rule whose matcher accepts the lowercased header text.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderMatch {
    StartsWith(&'static str),
    Contains(&'static str),
    ContainsAll(&'static [&'static str]),
}

impl HeaderMatch {
    /// `header` must already be lowercased and trimmed.
    pub fn matches(&self, header: &str) -> bool {
        match self {
            HeaderMatch::StartsWith(prefix) => header.starts_with(prefix),
            HeaderMatch::Contains(needle) => header.contains(needle),
            HeaderMatch::ContainsAll(needles) => needles.iter().all(|n| header.contains(n)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    List(Vec<String>),
}

pub type Transform = fn(&str) -> Option<FieldValue>;

#[derive(Clone, Copy, Debug)]
pub struct FieldRule<F: 'static> {
    pub matcher: HeaderMatch,
    pub field: F,
    pub transform: Transform,
}

#[derive(Clone, Copy, Debug)]
pub struct FieldMap<F: 'static> {
    rules: &'static [FieldRule<F>],
}

impl<F: Copy> FieldMap<F> {
    pub const fn new(rules: &'static [FieldRule<F>]) -> Self {
        FieldMap { rules }
    }

    pub fn resolve(&self, header: &str) -> Option<&'static FieldRule<F>> {
        let header = header.trim().to_lowercase();
        self.rules.iter().find(|rule| rule.matcher.matches(&header))
    }

    /// Resolves every header of a header row, keeping column positions.
    pub fn columns<S: AsRef<str>>(&self, headers: &[S]) -> Vec<Option<&'static FieldRule<F>>> {
        headers.iter().map(|h| self.resolve(h.as_ref())).collect()
    }
}

/// Parses the leading integer of `value` the way upstream counters are
/// written: surrounding whitespace, thousands separators and trailing
/// annotations (`"1,071#"`, `"33*"`) are tolerated.
pub fn parse_count(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };

    let mut number: Option<i64> = None;
    for ch in digits.chars() {
        match ch {
            '0'..='9' => {
                let digit = ch as i64 - '0' as i64;
                number = Some(number.unwrap_or(0).checked_mul(10)?.checked_add(digit)?);
            }
            ',' if number.is_some() => continue,
            _ => break,
        }
    }

    number.map(|n| if negative { -n } else { n })
}

pub fn int(value: &str) -> Option<FieldValue> {
    parse_count(value).map(FieldValue::Int)
}

pub fn text(value: &str) -> Option<FieldValue> {
    let value = value.trim();
    (!value.is_empty()).then(|| FieldValue::Text(value.to_string()))
}

pub fn list(value: &str) -> Option<FieldValue> {
    let value = value.trim();
    (!value.is_empty()).then(|| FieldValue::List(vec![value.to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Field {
        Name,
        Indian,
        Foreign,
        Age,
    }

    const RULES: &[FieldRule<Field>] = &[
        FieldRule {
            matcher: HeaderMatch::Contains("name"),
            field: Field::Name,
            transform: text,
        },
        FieldRule {
            matcher: HeaderMatch::ContainsAll(&["confirmed", "indian"]),
            field: Field::Indian,
            transform: int,
        },
        FieldRule {
            matcher: HeaderMatch::ContainsAll(&["confirmed", "foreign"]),
            field: Field::Foreign,
            transform: int,
        },
        FieldRule {
            matcher: HeaderMatch::StartsWith("age"),
            field: Field::Age,
            transform: text,
        },
    ];
    const MAP: FieldMap<Field> = FieldMap::new(RULES);

    #[test]
    fn test_resolve_in_priority_order() {
        assert_eq!(MAP.resolve("Name of State / UT").unwrap().field, Field::Name);
        assert_eq!(
            MAP.resolve(" Total Confirmed cases (Indian National) ").unwrap().field,
            Field::Indian
        );
        assert_eq!(
            MAP.resolve("Total Confirmed cases ( Foreign National )").unwrap().field,
            Field::Foreign
        );
        // "name" is checked before anything else
        assert_eq!(MAP.resolve("confirmed indian name").unwrap().field, Field::Name);
        assert!(MAP.resolve("Cured/Discharged").is_none());
        assert!(MAP.resolve("Stage").is_none());
    }

    #[test]
    fn test_columns_keep_positions() {
        let cols = MAP.columns(&["S. No.", "Name", "Age Bracket"]);
        assert!(cols[0].is_none());
        assert_eq!(cols[1].unwrap().field, Field::Name);
        assert_eq!(cols[2].unwrap().field, Field::Age);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("42"), Some(42));
        assert_eq!(parse_count(" 1,071# "), Some(1071));
        assert_eq!(parse_count("33*"), Some(33));
        assert_eq!(parse_count("-3"), Some(-3));
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("n/a"), None);
        assert_eq!(parse_count(",5"), None);
    }

    #[test]
    fn test_transforms() {
        assert_eq!(int("7"), Some(FieldValue::Int(7)));
        assert_eq!(text("  "), None);
        assert_eq!(list(" a "), Some(FieldValue::List(vec!["a".into()])));
    }
}
