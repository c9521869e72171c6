//! `render` scripts: one drawing call per line.
//!
//! ```text
//! # comments and blank lines are skipped
//! basemap region=0/10/0/10 projection=X10c frame=afg
//! coast land=gray frame="+tMy Map"
//! ```

use gmt_figure::{ArgValue, Params};

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub line: usize,
    pub operation: String,
    pub params: Params,
}

pub fn parse(text: &str) -> Result<Vec<Step>, String> {
    let mut steps = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens = split(trimmed).map_err(|e| format!("line {line_no}: {e}"))?;
        let Some((operation, rest)) = tokens.split_first() else {
            continue;
        };
        let mut params = Params::new();
        for token in rest {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| format!("line {line_no}: expected key=value, got `{token}`"))?;
            if key.is_empty() {
                return Err(format!("line {line_no}: empty key in `{token}`"));
            }
            let value = parse_value(value);
            let value = match params.get(key) {
                // A repeated key passes the flag once per value.
                Some(previous) => {
                    let mut items = repeat_items(previous);
                    items.extend(repeat_items(&value));
                    ArgValue::Repeat(items)
                }
                None => value,
            };
            params = params.set(key, value);
        }
        steps.push(Step {
            line: line_no,
            operation: operation.clone(),
            params,
        });
    }
    Ok(steps)
}

/// `true`/`false`, a number, a `/`-separated number list, or text.
fn parse_value(text: &str) -> ArgValue {
    match text {
        "true" => return ArgValue::Flag(true),
        "false" => return ArgValue::Flag(false),
        _ => {}
    }
    if let Ok(number) = text.parse::<f64>() {
        return ArgValue::Number(number);
    }
    if text.contains('/') {
        let numbers: Result<Vec<f64>, _> = text.split('/').map(str::parse::<f64>).collect();
        if let Ok(numbers) = numbers {
            return ArgValue::List(numbers);
        }
    }
    ArgValue::Text(text.to_string())
}

/// One item per flag occurrence; `true` is a bare flag, `false` none.
fn repeat_items(value: &ArgValue) -> Vec<String> {
    match value {
        ArgValue::Repeat(items) => items.clone(),
        ArgValue::Flag(true) => vec![String::new()],
        ArgValue::Flag(false) => Vec::new(),
        other => vec![other.to_string()],
    }
}

/// Split on whitespace outside double quotes; quotes are dropped.
fn split(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if quoted {
        return Err("unterminated quote".into());
    }
    if pending {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps() {
        let steps = parse(
            "# map\n\nbasemap region=0/10/0/10 projection=X10c frame=true\n\
             coast land=gray frame=\"+tMy Map\" xshift=2.5\n",
        )
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].line, 3);
        assert_eq!(
            steps[0].params.get("region"),
            Some(&ArgValue::List(vec![0.0, 10.0, 0.0, 10.0]))
        );
        assert_eq!(steps[0].params.get("frame"), Some(&ArgValue::Flag(true)));
        assert_eq!(
            steps[1].params.get("frame"),
            Some(&ArgValue::Text("+tMy Map".into()))
        );
        assert_eq!(steps[1].params.get("xshift"), Some(&ArgValue::Number(2.5)));
    }

    #[test]
    fn repeated_key_becomes_repeat() {
        let steps = parse("basemap frame=a frame=WSne").unwrap();
        assert_eq!(
            steps[0].params.get("frame"),
            Some(&ArgValue::Repeat(vec!["a".into(), "WSne".into()]))
        );
    }

    #[test]
    fn repeated_flag_key_keeps_the_bare_flag() {
        let steps = parse("basemap frame=true frame=WSne\nlogo frame=false frame=a").unwrap();
        let frame = steps[0].params.get("frame").unwrap();
        assert_eq!(frame, &ArgValue::Repeat(vec![String::new(), "WSne".into()]));
        assert_eq!(frame.render("B"), vec!["-B".to_string(), "-BWSne".to_string()]);
        assert_eq!(
            steps[1].params.get("frame"),
            Some(&ArgValue::Repeat(vec!["a".into()]))
        );
    }

    #[test]
    fn errors_name_the_line() {
        assert_eq!(
            parse("basemap\nlogo position").unwrap_err(),
            "line 2: expected key=value, got `position`"
        );
        assert!(parse("text text=\"open").unwrap_err().starts_with("line 1:"));
    }
}
