//! Keyword parameters and their rendering as module argument fragments.

use std::fmt;

use gmt_clib::Region;

/// Value of one keyword parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// `-F` when true, nothing when false.
    Flag(bool),
    Text(String),
    Number(f64),
    /// Joined with `/`, e.g. a region or a size pair.
    List(Vec<f64>),
    /// The flag repeated once per item.
    Repeat(Vec<String>),
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Flag(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Text(value)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Number(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Number(f64::from(value))
    }
}

impl From<Vec<f64>> for ArgValue {
    fn from(value: Vec<f64>) -> Self {
        ArgValue::List(value)
    }
}

impl<const N: usize> From<[f64; N]> for ArgValue {
    fn from(value: [f64; N]) -> Self {
        ArgValue::List(value.to_vec())
    }
}

impl From<Region> for ArgValue {
    fn from(region: Region) -> Self {
        ArgValue::List(region.wesn().to_vec())
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(value: Vec<String>) -> Self {
        ArgValue::Repeat(value)
    }
}

impl From<&[&str]> for ArgValue {
    fn from(value: &[&str]) -> Self {
        ArgValue::Repeat(value.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Flag(_) => Ok(()),
            ArgValue::Text(text) => f.write_str(text),
            ArgValue::Number(n) => write!(f, "{n}"),
            ArgValue::List(items) => {
                let parts: Vec<String> = items.iter().map(f64::to_string).collect();
                f.write_str(&parts.join("/"))
            }
            ArgValue::Repeat(items) => f.write_str(&items.join(",")),
        }
    }
}

impl ArgValue {
    /// Argument fragments for `flag`, e.g. `-R0/10/0/10`.
    pub fn render(&self, flag: &str) -> Vec<String> {
        match self {
            ArgValue::Flag(true) => vec![format!("-{flag}")],
            ArgValue::Flag(false) => Vec::new(),
            ArgValue::Text(text) => vec![format!("-{flag}{}", quote(text))],
            ArgValue::Number(_) | ArgValue::List(_) => vec![format!("-{flag}{self}")],
            ArgValue::Repeat(items) => items
                .iter()
                .map(|item| format!("-{flag}{}", quote(item)))
                .collect(),
        }
    }
}

/// Modifiers whose text may contain spaces.
const LABEL_MODIFIERS: [char; 4] = ['l', 'L', 'S', 't'];

/// Double-quote text containing whitespace.
///
/// Label modifiers (`+l`, `+L`, `+S`, `+t`) get their own text quoted so
/// the rest of the value stays readable to the module; anything else with a
/// space is quoted whole.
pub fn quote(value: &str) -> String {
    if !value.contains(char::is_whitespace) {
        return value.to_string();
    }
    let mut pieces = value.split('+');
    let head = pieces.next().unwrap_or_default();
    if head.contains(char::is_whitespace) {
        return format!("\"{value}\"");
    }
    let mut out = head.to_string();
    for piece in pieces {
        out.push('+');
        let mut chars = piece.chars();
        match chars.next() {
            Some(m) if LABEL_MODIFIERS.contains(&m) && piece.contains(char::is_whitespace) => {
                out.push(m);
                out.push('"');
                out.push_str(chars.as_str());
                out.push('"');
            }
            _ if piece.contains(char::is_whitespace) => return format!("\"{value}\""),
            _ => out.push_str(piece),
        }
    }
    out
}

/// Ordered keyword parameters for one operation.
///
/// ```
/// use gmt_figure::Params;
///
/// let params = Params::new()
///     .set("region", [0.0, 10.0, 0.0, 10.0])
///     .set("projection", "X10c")
///     .set("frame", true);
/// assert_eq!(params.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, ArgValue)>,
    raw: Vec<String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `keyword`, replacing an earlier value in place.
    pub fn set(mut self, keyword: &str, value: impl Into<ArgValue>) -> Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == keyword) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((keyword.to_string(), value)),
        }
        self
    }

    /// Append a pre-built argument fragment, passed through unchanged.
    pub fn raw(mut self, fragment: &str) -> Self {
        self.raw.push(fragment.to_string());
        self
    }

    pub fn get(&self, keyword: &str) -> Option<&ArgValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn raw_fragments(&self) -> &[String] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_by_kind() {
        assert_eq!(ArgValue::Flag(true).render("B"), vec!["-B"]);
        assert!(ArgValue::Flag(false).render("B").is_empty());
        assert_eq!(ArgValue::from(2.5).render("X"), vec!["-X2.5"]);
        assert_eq!(
            ArgValue::from([0.0, 10.0, -5.0, 5.0]).render("R"),
            vec!["-R0/10/-5/5"]
        );
        assert_eq!(
            ArgValue::from(&["a", "WSne"][..]).render("B"),
            vec!["-Ba", "-BWSne"]
        );
    }

    #[test]
    fn label_text_is_quoted() {
        assert_eq!(quote("afg"), "afg");
        assert_eq!(quote("xaf+lDistance (km)"), "xaf+l\"Distance (km)\"");
        assert_eq!(quote("+tMy Map"), "+t\"My Map\"");
        assert_eq!(quote("+tTitle+lx y"), "+tTitle+l\"x y\"");
        assert_eq!(quote("1p black"), "\"1p black\"");
    }

    #[test]
    fn set_replaces_in_place() {
        let params = Params::new().set("region", "g").set("frame", true).set("region", "d");
        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["region", "frame"]);
        assert_eq!(params.get("region"), Some(&ArgValue::Text("d".into())));
    }
}
