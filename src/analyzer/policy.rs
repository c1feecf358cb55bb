//! Sink policies: function classification tables and sink configuration
//!
//! One `SinkPolicy` value per sink kind (SQL vs output) replaces the
//! original's inheritance chain of mutable class-level tables. The policy is
//! immutable during a pass; everything the evaluator and driver need to know
//! about a sink kind lives here.

use crate::tokens::Keyword;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Effect of a function on taint, per sink kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionClass {
    /// Output is fully neutralized for this sink, whatever went in.
    Escaping,
    /// Output is exactly as safe as every argument; taint passes through.
    Neutral,
    /// Assumed safe regardless of arguments. Escaping is still preferred,
    /// but flagging these is noise.
    ImplicitSafe,
    /// Commonly mistaken for an escaping function but is not one. Used only
    /// to annotate diagnostics, never to establish safety.
    Confusable,
}

/// Immutable per-sink-kind configuration.
#[derive(Debug)]
pub struct SinkPolicy {
    /// Short name used in log lines ("sql", "output").
    pub name: &'static str,
    /// Rule ID attached to diagnostics from this policy.
    pub rule_id: &'static str,
    /// CWE identifier for findings.
    pub cwe_id: &'static str,

    classes: HashMap<&'static str, FunctionClass>,
    /// Token values always treated as safe literals (ARRAY_A and friends).
    safe_constants: HashSet<&'static str>,
    /// `prepare`-style calls: first argument checked, the rest are escaped
    /// by the call's own placeholder mechanism.
    parameterized_calls: HashSet<&'static str>,

    /// Variable paths implicitly safe as a whole (`$wpdb`).
    safe_paths: HashSet<&'static str>,
    /// Prefix-safe variable paths (`$wpdb->` table properties).
    safe_path_prefixes: Vec<&'static str>,
    /// Regex-safe variable paths (framework table-name conventions).
    safe_path_patterns: Vec<Regex>,
    /// Access chains the evaluator skips over (`$this->wpdb->prepare(...)`).
    pub blessed_chains: Vec<&'static str>,

    /// Method names that are sinks when called on a sink receiver.
    sink_methods: HashSet<&'static str>,
    /// Receiver chains for method sinks (`$wpdb`, `$this->wpdb`).
    sink_receivers: Vec<&'static str>,
    /// Output-emission keywords that are sinks.
    sink_keywords: Vec<Keyword>,

    /// Parameter names that downgrade a finding to a warning.
    warn_only_parameters: Vec<String>,
    /// Query prefixes that downgrade a finding to a warning.
    warn_only_query_prefixes: Vec<&'static str>,
}

impl SinkPolicy {
    /// Policy for database query sinks (`$wpdb->query()` and friends).
    pub fn sql() -> Self {
        let mut classes = HashMap::new();
        for name in [
            "absint",
            "esc_sql",
            "floatval",
            "intval",
            "json_encode",
            "like_escape",
            "wp_json_encode",
            "wp_parse_id_list",
        ] {
            classes.insert(name, FunctionClass::Escaping);
        }
        for name in [
            "implode",
            "join",
            "array_keys",
            "array_values",
            "array_fill",
            // Sometimes used to format table and column names into queries.
            "sprintf",
            "array_filter",
        ] {
            classes.insert(name, FunctionClass::Neutral);
        }
        for name in [
            "gmdate",
            "current_time",
            "mktime",
            "get_post_types",
            "get_charset_collate",
            "get_blog_prefix",
            "get_post_stati",
            "count",
            "strtotime",
            "uniqid",
            "md5",
            "sha1",
            "rand",
            "mt_rand",
            "max",
        ] {
            classes.insert(name, FunctionClass::ImplicitSafe);
        }
        for name in ["addslashes", "addcslashes", "filter_input"] {
            classes.insert(name, FunctionClass::Confusable);
        }

        Self {
            name: "sql",
            rule_id: "UnescapedDBParameter",
            cwe_id: "CWE-89",
            classes,
            safe_constants: ["ARRAY_A", "OBJECT"].into_iter().collect(),
            parameterized_calls: ["prepare"].into_iter().collect(),
            safe_paths: ["$wpdb"].into_iter().collect(),
            safe_path_prefixes: vec!["$wpdb->", "$this->table"],
            safe_path_patterns: vec![
                // BuddyPress table-name properties: $bp->members->table_name_xx
                Regex::new(r"^\$bp->\w+->table_name(?:\w+)?$").expect("valid regex"),
            ],
            blessed_chains: vec!["$this->wpdb"],
            sink_methods: ["query", "get_var", "get_col", "get_row", "get_results"]
                .into_iter()
                .collect(),
            sink_receivers: vec!["$wpdb", "$this->wpdb", "$this->db"],
            sink_keywords: vec![],
            warn_only_parameters: vec![
                // Object properties are typically initialised safely; warning
                // instead of erroring here helps the signal:noise ratio.
                "$this".to_string(),
                "$table".to_string(),
                "$table_name".to_string(),
            ],
            warn_only_query_prefixes: vec!["SHOW ", "DESCRIBE ", "EXPLAIN "],
        }
    }

    /// Policy for output-emission sinks (`echo`, `print`, `exit`, `<?=`).
    pub fn output() -> Self {
        let mut classes = HashMap::new();
        for name in [
            "esc_html",
            "esc_html__",
            "esc_html_x",
            "esc_html_e",
            "esc_attr",
            "esc_attr__",
            "esc_attr_x",
            "esc_attr_e",
            "esc_url",
            "esc_textarea",
            "sanitize_text_field",
            "intval",
            "absint",
            "json_encode",
            "wp_json_encode",
            "htmlspecialchars",
            "wp_kses",
            "wp_kses_post",
            "wp_kses_data",
            "tag_escape",
        ] {
            classes.insert(name, FunctionClass::Escaping);
        }
        for name in [
            "implode",
            "join",
            "array_keys",
            "array_values",
            "array_fill",
            "sprintf",
            "array_filter",
            "__",
            "_x",
            "date_i18n",
            // Could be unsafe if the format parameter is untrusted.
            "get_the_date",
            "get_comment_time",
            "get_comment_date",
            "comments_number",
            // Separator/args parameters are unescaped.
            "get_the_category_list",
            "get_header_image_tag",
        ] {
            classes.insert(name, FunctionClass::Neutral);
        }
        for name in [
            "gmdate",
            "current_time",
            "mktime",
            "get_post_types",
            "get_charset_collate",
            "get_blog_prefix",
            "get_post_stati",
            "get_avatar",
            "get_search_query",
            "count",
            "strtotime",
            "uniqid",
            "md5",
            "sha1",
            "rand",
            "mt_rand",
            "max",
            "wp_get_attachment_image",
            "post_class",
            // Calls wp_strip_all_tags internally.
            "wp_trim_words",
            "paginate_links",
            "selected",
            "checked",
            "get_the_posts_pagination",
            "get_the_author_posts_link",
            "get_the_password_form",
        ] {
            classes.insert(name, FunctionClass::ImplicitSafe);
        }
        for name in [
            "addslashes",
            "addcslashes",
            "filter_input",
            "wp_strip_all_tags",
        ] {
            classes.insert(name, FunctionClass::Confusable);
        }

        Self {
            name: "output",
            rule_id: "UnescapedOutputParameter",
            cwe_id: "CWE-79",
            classes,
            safe_constants: ["ARRAY_A", "OBJECT"].into_iter().collect(),
            parameterized_calls: ["prepare"].into_iter().collect(),
            safe_paths: ["$wpdb"].into_iter().collect(),
            safe_path_prefixes: vec!["$wpdb->", "$this->table"],
            safe_path_patterns: vec![
                Regex::new(r"^\$bp->\w+->table_name(?:\w+)?$").expect("valid regex"),
            ],
            blessed_chains: vec!["$this->wpdb"],
            sink_methods: HashSet::new(),
            sink_receivers: vec![],
            sink_keywords: vec![Keyword::Echo, Keyword::Print, Keyword::Exit],
            warn_only_parameters: vec!["$this".to_string()],
            warn_only_query_prefixes: vec![],
        }
    }

    pub fn classify(&self, func_name: &str) -> Option<FunctionClass> {
        self.classes.get(func_name).copied()
    }

    pub fn is_escaping(&self, func_name: &str) -> bool {
        self.classify(func_name) == Some(FunctionClass::Escaping)
    }

    pub fn is_confusable(&self, func_name: &str) -> bool {
        self.classify(func_name) == Some(FunctionClass::Confusable)
    }

    pub fn is_safe_constant(&self, token_text: &str) -> bool {
        self.safe_constants.contains(token_text)
    }

    pub fn is_parameterized_call(&self, func_name: &str) -> bool {
        self.parameterized_calls.contains(func_name)
    }

    /// Built-in always-safe variable paths: database-handle table properties
    /// and framework table-name conventions.
    pub fn path_is_implicitly_safe(&self, path: &str) -> bool {
        if self.safe_paths.contains(path) {
            return true;
        }
        if self.safe_path_prefixes.iter().any(|p| path.starts_with(p)) {
            return true;
        }
        self.safe_path_patterns.iter().any(|re| re.is_match(path))
    }

    pub fn is_sink_method(&self, method: &str) -> bool {
        self.sink_methods.contains(method)
    }

    pub fn is_sink_receiver(&self, receiver_path: &str) -> bool {
        self.sink_receivers.iter().any(|r| *r == receiver_path)
    }

    pub fn is_sink_keyword(&self, kw: Keyword) -> bool {
        self.sink_keywords.contains(&kw)
    }

    /// Does this parameter name match the warn-only list? Matches on a word
    /// boundary so `$this` covers `$this->foo` but not `$thistle`.
    pub fn is_warning_parameter(&self, parameter: &str) -> bool {
        self.warn_only_parameters.iter().any(|warn| {
            parameter == warn
                || parameter
                    .strip_prefix(warn.as_str())
                    .map(|rest| {
                        rest.chars()
                            .next()
                            .map(|c| !c.is_alphanumeric() && c != '_')
                            .unwrap_or(true)
                    })
                    .unwrap_or(false)
        })
    }

    /// Does this query text start with a warn-only prefix (after stripping
    /// any leading quotes)?
    pub fn is_warning_query(&self, sql: &str) -> bool {
        let sql = sql.trim_start_matches(['\'', '"']);
        self.warn_only_query_prefixes
            .iter()
            .any(|prefix| sql.len() >= prefix.len() && sql[..prefix.len()].eq_ignore_ascii_case(prefix))
    }
}
