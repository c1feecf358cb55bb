//! SQL table-name heuristic
//!
//! Recognizes when an interpolated value lands exactly in the table or
//! identifier position of a common query shape, so the surrounding finding
//! can be downgraded to a warning. Interpolating a table name is still worth
//! flagging, but it is usually a naming convention rather than attacker
//! data, and erroring on it drowns the real findings.
//!
//! The pattern battery follows the table-name extraction used by WordPress
//! core's database layer. Pure functions, no state; downgrade only, never an
//! exemption.

use regex::Regex;
use std::sync::OnceLock;

// Identifier characters: ASCII word chars plus `$`, `.`, backtick, `-`, and
// the two-byte UTF-8 range MySQL accepts in unquoted names.
const IDENT: &str = r"[0-9a-zA-Z$_.`\-\u{00C0}-\u{07FF}]";

fn dml_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?is)^\s*(?:SELECT.*?\s+FROM|INSERT(?:\s+LOW_PRIORITY|\s+DELAYED|\s+HIGH_PRIORITY)?(?:\s+IGNORE)?(?:\s+INTO)?|REPLACE(?:\s+LOW_PRIORITY|\s+DELAYED)?(?:\s+INTO)?|UPDATE(?:\s+LOW_PRIORITY)?(?:\s+IGNORE)?|DELETE(?:\s+LOW_PRIORITY|\s+QUICK|\s+IGNORE)*(?:.+?FROM)?)\s+({IDENT}+)"
        ))
        .expect("valid regex")
    })
}

fn show_where_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // SHOW TABLE STATUS and SHOW TABLES WHERE Name = 'wp_posts'.
        // The regex crate has no backreferences, so each quote style gets
        // its own alternative.
        Regex::new(&format!(
            r#"(?is)^\s*SHOW\s+(?:TABLE\s+STATUS|(?:FULL\s+)?TABLES).+WHERE\s+Name\s*=\s*(?:'([0-9a-zA-Z$_.\-\u{{00C0}}-\u{{07FF}}]+)'|"([0-9a-zA-Z$_.\-\u{{00C0}}-\u{{07FF}}]+)")"#
        ))
        .expect("valid regex")
    })
}

fn show_like_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // SHOW TABLE STATUS LIKE and SHOW TABLES LIKE 'wp\_123\_%'. The
        // quoted LIKE operand is usually a prefix pattern; strip the
        // trailing % and unescape the _ to get the prefix.
        Regex::new(&format!(
            r#"(?is)^\s*SHOW\s+(?:TABLE\s+STATUS|(?:FULL\s+)?TABLES)\s+(?:WHERE\s+Name\s+)?LIKE\s*(?:'([\\0-9a-zA-Z$_.\-\u{{00C0}}-\u{{07FF}}]+)%?'|"([\\0-9a-zA-Z$_.\-\u{{00C0}}-\u{{07FF}}]+)%?")"#
        ))
        .expect("valid regex")
    })
}

fn ddl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?is)^\s*(?:(?:EXPLAIN\s+(?:EXTENDED\s+)?)?SELECT.*?\s+FROM|DESCRIBE|DESC|EXPLAIN|HANDLER|(?:LOCK|UNLOCK)\s+TABLE(?:S)?|(?:RENAME|OPTIMIZE|BACKUP|RESTORE|CHECK|CHECKSUM|ANALYZE|REPAIR).*\s+TABLE|TRUNCATE(?:\s+TABLE)?|CREATE(?:\s+TEMPORARY)?\s+TABLE(?:\s+IF\s+NOT\s+EXISTS)?|ALTER(?:\s+IGNORE)?\s+TABLE|DROP\s+TABLE(?:\s+IF\s+EXISTS)?|CREATE(?:\s+\w+)?\s+INDEX.*\s+ON|DROP\s+INDEX.*\s+ON|LOAD\s+DATA.*INFILE.*INTO\s+TABLE|(?:GRANT|REVOKE).*ON\s+TABLE|SHOW\s+(?:.*FROM|.*TABLE))\s+\(*\s*({IDENT}+)\s*\)*"
        ))
        .expect("valid regex")
    })
}

/// Extract the table/identifier name from a query, if the query matches one
/// of the recognized shapes.
pub fn table_from_query(query: &str) -> Option<String> {
    // Remove characters that can legally trail the table name, and allow
    // `(select ...) union [...]` style queries to use the first table name.
    let query = query.trim_end_matches([';', '/', '-', '#']);
    let query = query.trim_start_matches(['\r', '\n', '\t', ' ', '(']);
    let query = strip_non_select_parens(query);

    if let Some(caps) = dml_regex().captures(&query) {
        return Some(caps[1].replace('`', ""));
    }

    if let Some(caps) = show_where_name_regex().captures(&query) {
        let name = caps.get(1).or_else(|| caps.get(2))?;
        return Some(name.as_str().to_string());
    }

    if let Some(caps) = show_like_regex().captures(&query) {
        let name = caps.get(1).or_else(|| caps.get(2))?;
        return Some(name.as_str().replace("\\_", "_"));
    }

    if let Some(caps) = ddl_regex().captures(&query) {
        return Some(caps[1].replace('`', ""));
    }

    None
}

/// Does the placeholder land exactly in the table/identifier position of
/// `query`? `query` is the statement text with one interpolation site
/// already substituted by `placeholder`.
pub fn looks_like_table_position(query: &str, placeholder: &str) -> bool {
    let trimmed = query.trim_matches('"');
    table_from_query(trimmed).as_deref() == Some(placeholder)
}

/// Blank out parenthesized groups that do not open a nested select, leaving
/// `()` markers. The original does this with a lookahead; done here with an
/// explicit innermost-first scan since the regex crate has none.
fn strip_non_select_parens(query: &str) -> String {
    let mut current = query.to_string();
    loop {
        let mut replaced = false;
        let bytes = current.as_bytes();
        let mut open_stack = Vec::new();
        let mut span: Option<(usize, usize)> = None;
        for (i, &b) in bytes.iter().enumerate() {
            match b {
                b'(' => open_stack.push(i),
                b')' => {
                    if let Some(open) = open_stack.pop() {
                        let inner = current[open + 1..i].trim_start();
                        let is_select = inner.len() >= 6 && inner[..6].eq_ignore_ascii_case("select");
                        let already_blank = open + 1 == i;
                        if !is_select && !already_blank {
                            span = Some((open, i));
                            break;
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some((open, close)) = span {
            current.replace_range(open..=close, "()");
            replaced = true;
        }
        if !replaced {
            break;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_from() {
        assert_eq!(
            table_from_query("SELECT * FROM wp_posts WHERE id = 1"),
            Some("wp_posts".to_string())
        );
    }

    #[test]
    fn test_insert_into() {
        assert_eq!(
            table_from_query("INSERT INTO `wp_meta` (a, b) VALUES (1, 2)"),
            Some("wp_meta".to_string())
        );
    }

    #[test]
    fn test_delete_from() {
        assert_eq!(
            table_from_query("DELETE FROM logs WHERE ts < 0"),
            Some("logs".to_string())
        );
    }

    #[test]
    fn test_create_table() {
        assert_eq!(
            table_from_query("CREATE TABLE IF NOT EXISTS my_table (id INT)"),
            Some("my_table".to_string())
        );
    }

    #[test]
    fn test_show_tables_like() {
        assert_eq!(
            table_from_query("SHOW TABLES LIKE 'wp\\_123\\_%'"),
            Some("wp_123_".to_string())
        );
    }

    #[test]
    fn test_show_tables_where_name() {
        assert_eq!(
            table_from_query("SHOW TABLES WHERE Name = 'wp_posts'"),
            Some("wp_posts".to_string())
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(
            table_from_query("TRUNCATE TABLE sessions"),
            Some("sessions".to_string())
        );
    }

    #[test]
    fn test_not_a_table_query() {
        assert_eq!(table_from_query("SET NAMES utf8"), None);
    }

    #[test]
    fn test_placeholder_in_table_position() {
        let placeholder = format!("{:x}", md5::compute("$table"));
        let query = format!("\"SELECT * FROM {placeholder}\"");
        assert!(looks_like_table_position(&query, &placeholder));
    }

    #[test]
    fn test_placeholder_in_value_position() {
        let placeholder = format!("{:x}", md5::compute("$val"));
        let query = format!("\"SELECT * FROM x WHERE y = {placeholder}\"");
        assert!(!looks_like_table_position(&query, &placeholder));
    }

    #[test]
    fn test_union_subselect_uses_first_table() {
        assert_eq!(
            table_from_query("(SELECT a FROM t1) UNION (SELECT a FROM t2)"),
            Some("t1".to_string())
        );
    }
}
