//! The bracketed `[%key value]` sub-annotation scanner.
//!
//! One unambiguous grammar for these tokens: a single compiled pattern
//! matches every `[%key value]` occurrence regardless of which key it
//! carries, and the higher-level helpers below interpret the payload per
//! key.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[%(emt|clk|egt|csl|cal)\s+([^\]]*)\]").expect("static pattern is valid")
});

const TOKEN_KEYS: [&str; 5] = ["emt", "clk", "egt", "csl", "cal"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquareMark {
    pub color: char,
    pub square: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrowMark {
    pub color: char,
    pub from: String,
    pub to: String,
}

fn is_canonical_square(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 2
        && (b'a'..=b'h').contains(&bytes[0])
        && (b'1'..=b'8').contains(&bytes[1])
}

/// Find the value of the first occurrence of `key`, if present.
pub fn extract(comment: &str, key: &str) -> Option<String> {
    TOKEN_RE
        .captures_iter(comment)
        .find(|c| &c[1] == key)
        .map(|c| c[2].trim().to_string())
}

/// Replace the first occurrence of `key`'s payload with `value`, or append
/// a new `[%key value]` token at the end if `key` is not present. Text
/// outside the token is left untouched.
pub fn replace(comment: &str, key: &str, value: &str) -> String {
    let mut found = false;
    let replaced = TOKEN_RE.replace(comment, |c: &regex::Captures| {
        if &c[1] == key && !found {
            found = true;
            format!("[%{} {}]", key, value)
        } else {
            c[0].to_string()
        }
    });
    if found {
        replaced.into_owned()
    } else {
        let mut out = comment.to_string();
        out.push_str(&format!("[%{} {}]", key, value));
        out
    }
}

/// Remove every occurrence of `key`.
pub fn remove(comment: &str, key: &str) -> String {
    TOKEN_RE
        .replace_all(comment, |c: &regex::Captures| {
            if &c[1] == key { String::new() } else { c[0].to_string() }
        })
        .into_owned()
}

/// Strip the `[%emt …]`/`[%clk …]`/`[%egt …]` timing markers, leaving any
/// other bracketed tokens and free text untouched.
pub fn strip_time_tokens(comment: &str) -> String {
    let mut out = comment.to_string();
    for key in ["emt", "clk", "egt"] {
        out = remove(&out, key);
    }
    out
}

/// The free text with every bracketed token removed.
pub fn text_only(comment: &str) -> String {
    TOKEN_RE.replace_all(comment, "").into_owned()
}

/// Every bracketed token concatenated, with free text stripped.
pub fn bracket_tokens_only(comment: &str) -> String {
    TOKEN_RE
        .find_iter(comment)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join("")
}

fn parse_marker(entry: &str) -> Option<(char, &str)> {
    let entry = entry.trim();
    if !entry.is_ascii() {
        return None;
    }
    if entry.len() == 2 && is_canonical_square(entry) {
        Some(('G', entry))
    } else if entry.len() == 3 {
        let color = entry.chars().next().unwrap();
        let square = &entry[1..];
        is_canonical_square(square).then_some((color, square))
    } else {
        None
    }
}

pub fn parse_square_list(comment: &str) -> Vec<SquareMark> {
    let Some(payload) = extract(comment, "csl") else { return Vec::new() };
    payload
        .split(',')
        .filter_map(|entry| {
            parse_marker(entry).map(|(color, square)| SquareMark { color, square: square.to_string() })
        })
        .collect()
}

pub fn format_square_list(marks: &[SquareMark]) -> String {
    marks
        .iter()
        .map(|m| format!("{}{}", m.color, m.square))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_arrow_list(comment: &str) -> Vec<ArrowMark> {
    let Some(payload) = extract(comment, "cal") else { return Vec::new() };
    payload
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if !entry.is_ascii() {
                return None;
            }
            let (color, rest) = if entry.len() == 5 {
                (entry.chars().next().unwrap(), &entry[1..])
            } else if entry.len() == 4 {
                ('G', entry)
            } else {
                return None;
            };
            let (from, to) = rest.split_at(2);
            if is_canonical_square(from) && is_canonical_square(to) {
                Some(ArrowMark { color, from: from.to_string(), to: to.to_string() })
            } else {
                None
            }
        })
        .collect()
}

pub fn format_arrow_list(marks: &[ArrowMark]) -> String {
    marks
        .iter()
        .map(|m| format!("{}{}{}", m.color, m.from, m.to))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn set_square_list(comment: &str, marks: &[SquareMark]) -> String {
    if marks.is_empty() {
        remove(comment, "csl")
    } else {
        replace(comment, "csl", &format_square_list(marks))
    }
}

pub fn set_arrow_list(comment: &str, marks: &[ArrowMark]) -> String {
    if marks.is_empty() {
        remove(comment, "cal")
    } else {
        replace(comment, "cal", &format_arrow_list(marks))
    }
}

/// Add one square marker, replacing any existing entry for the same square.
/// `color == '\0'` removes the entry instead.
pub fn append_square(comment: &str, square: &str, color: char) -> String {
    let mut marks: Vec<SquareMark> = parse_square_list(comment).into_iter().filter(|m| m.square != square).collect();
    if color != '\0' {
        marks.push(SquareMark { color, square: square.to_string() });
    }
    set_square_list(comment, &marks)
}

/// Add one arrow marker, replacing any existing entry with the same
/// endpoints. `color == '\0'` removes the entry instead.
pub fn append_arrow(comment: &str, from: &str, to: &str, color: char) -> String {
    let mut marks: Vec<ArrowMark> = parse_arrow_list(comment)
        .into_iter()
        .filter(|m| !(m.from == from && m.to == to))
        .collect();
    if color != '\0' {
        marks.push(ArrowMark { color, from: from.to_string(), to: to.to_string() });
    }
    set_arrow_list(comment, &marks)
}

/// Merge freshly-edited prose with whatever bracketed tokens are currently
/// present, so editing the free text never drops timing/square/arrow
/// markers.
pub fn merge_text_with_existing_tokens(new_text: &str, previous_comment: &str) -> String {
    let tokens = bracket_tokens_only(previous_comment);
    format!("{}{}", new_text, tokens)
}

pub fn is_bracket_key(key: &str) -> bool {
    TOKEN_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_leaves_surrounding_text_intact() {
        let c = "good move [%emt 0:00:05] keep playing";
        assert_eq!(extract(c, "emt").as_deref(), Some("0:00:05"));
    }

    #[test]
    fn replace_rewrites_existing_payload_only() {
        let c = "x [%clk 0:01:00] y";
        let out = replace(c, "clk", "0:02:00");
        assert_eq!(out, "x [%clk 0:02:00] y");
    }

    #[test]
    fn replace_appends_when_absent() {
        let out = replace("hello", "egt", "1:00:00");
        assert_eq!(out, "hello[%egt 1:00:00]");
    }

    #[test]
    fn mixed_tokens_and_unterminated_brace() {
        // AnnotationTables::set already strips the PGN comment-terminator
        // brace before this text reaches the codec, so only the opening
        // brace survives here.
        let c = "good { move [%emt 0:00:05][%csl Ga1]";
        assert_eq!(extract(c, "emt").as_deref(), Some("0:00:05"));
        let squares = parse_square_list(c);
        assert_eq!(squares, vec![SquareMark { color: 'G', square: "a1".to_string() }]);
        assert_eq!(text_only(c), "good { move ");
    }

    #[test]
    fn square_list_defaults_uncolored_entries_to_green() {
        let c = "[%csl a1,Rb2]";
        let marks = parse_square_list(c);
        assert_eq!(
            marks,
            vec![
                SquareMark { color: 'G', square: "a1".to_string() },
                SquareMark { color: 'R', square: "b2".to_string() },
            ]
        );
    }

    #[test]
    fn arrow_list_rejects_invalid_squares() {
        let c = "[%cal a1z9,Rc3c4]";
        let marks = parse_arrow_list(c);
        assert_eq!(marks, vec![ArrowMark { color: 'R', from: "c3".to_string(), to: "c4".to_string() }]);
    }

    #[test]
    fn append_square_is_idempotent_and_removable() {
        let c = "note";
        let c = append_square(c, "a1", 'R');
        let c = append_square(&c, "a1", 'R');
        assert_eq!(parse_square_list(&c).len(), 1);
        let c = append_square(&c, "a1", '\0');
        assert_eq!(parse_square_list(&c).len(), 0);
    }

    #[test]
    fn strip_time_tokens_keeps_other_bracketed_tokens() {
        let c = "n [%clk 0:01:00][%csl Ga1]";
        assert_eq!(strip_time_tokens(c), "n [%csl Ga1]");
    }

    #[test]
    fn square_list_rejects_multibyte_entries_without_panicking() {
        // "あ" is a single char but 3 bytes encoded, matching the csl
        // colored-entry byte length without being a char boundary at 1.
        let c = "[%csl あ]";
        assert_eq!(parse_square_list(c), Vec::new());
    }

    #[test]
    fn arrow_list_rejects_multibyte_entries_without_panicking() {
        // "あ" + "bc" is 5 bytes, matching the cal colored-entry byte
        // length without being a char boundary at 1.
        let c = "[%cal あbc]";
        assert_eq!(parse_arrow_list(c), Vec::new());
    }
}
