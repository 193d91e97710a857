//! Command-string construction and reply parsing.
//!
//! The server treats command text as opaque; these helpers only build the
//! conventional command strings (`open`, `xquery`, `set bindings`) and
//! decode the tabular `list` reply.

use once_cell::sync::Lazy;
use regex::Regex;

/// One row of the server's `list` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub name: String,
    pub resources: u64,
    pub size: u64,
}

static LIST_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>.+)\s+(?P<resources>\d+)\s+(?P<size>\d+)").expect("list row pattern")
});

pub(crate) fn open(database: &str) -> String {
    format!("open {}", database)
}

pub(crate) fn xquery(query: &str) -> String {
    format!("xquery {}", query)
}

pub(crate) fn set_bindings(vars: &[(&str, &str)]) -> String {
    format!("set bindings {}", bindings_string(vars))
}

/// Build the `name=value,...` list for `set bindings`.
///
/// Variables whose names are not valid element names are skipped rather
/// than rejected, so one bad entry does not sink the whole command.
pub fn bindings_string(vars: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (name, value) in vars {
        if !is_valid_variable_name(name) {
            continue;
        }
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Variable names must satisfy the same rules as XML element names.
pub(crate) fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

/// Replace quote characters with numeric character references so a query
/// can be embedded inside a quoted query-string literal.
pub fn escape_quotes(query: &str) -> String {
    query.replace('\'', "&#34;").replace('"', "&#39;")
}

/// Parse the tabular `list` reply: two header lines, then
/// `name resources size` rows until the first blank line.
pub(crate) fn parse_database_list(listing: &str) -> Vec<Database> {
    let mut rows = Vec::new();
    for line in listing.lines().skip(2) {
        if line.trim().is_empty() {
            break;
        }
        let Some(caps) = LIST_ROW.captures(line) else {
            continue;
        };
        let name = caps["name"].trim().to_string();
        let (Ok(resources), Ok(size)) = (caps["resources"].parse::<u64>(), caps["size"].parse::<u64>())
        else {
            continue;
        };
        rows.push(Database {
            name,
            resources,
            size,
        });
    }
    rows
}
