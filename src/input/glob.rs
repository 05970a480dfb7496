//! Wildcard input patterns are handled by splitting them into a literal
//! directory root to walk and an anchored regex to match walked paths
//! against. Supported wildcards: `*` (any run of non-separator bytes),
//! `?` (any single character), `{a,b}` alternation, and `[...]` character
//! classes, which regex syntax already covers.

/// The longest prefix of `input` with no wildcard, cut at a directory
/// boundary. Empty when the first path component already contains a
/// wildcard.
pub fn extract_root(input: &str) -> String {
    let mut root = String::new();
    let mut part = String::new();

    for c in input.chars() {
        match c {
            '*' | '?' | '{' | '[' => return root,
            '/' => {
                root.push_str(&part);
                root.push(c);
                part.clear();
            }
            _ => part.push(c),
        }
    }

    root
}

/// Translate a wildcard pattern into an anchored regex: `.` `$` `(` `)`
/// `|` `+` are escaped, `*` becomes `[^/]*`, `?` becomes `.`, `{a,b}`
/// becomes `(?:a|b)`, everything else passes through.
pub fn glob_to_regex(input: &str) -> String {
    format!("^{}$", translate(input))
}

/// The regex the tree walk matches files against. Besides exact pattern
/// matches it accepts paths *under* a matched directory, which is what
/// makes a plain directory a valid `--input`.
pub(crate) fn walk_regex(input: &str) -> String {
    format!("^{}(/.*)?$", translate(input))
}

fn translate(input: &str) -> String {
    let mut regex = String::with_capacity(input.len() + 8);

    for c in input.chars() {
        match c {
            '.' | '$' | '(' | ')' | '|' | '+' => {
                regex.push('\\');
                regex.push(c);
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push('.'),
            '{' => regex.push_str("(?:"),
            ',' => regex.push('|'),
            '}' => regex.push(')'),
            _ => regex.push(c),
        }
    }

    regex
}
