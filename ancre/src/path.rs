//! Path expressions: `count`, `inner.count`, `[3]`, `[1, -2]`.

use smallvec::SmallVec;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PathExpr<'a> {
    Fields(SmallVec<[&'a str; 4]>),
    Indexes(SmallVec<[isize; 4]>),
}

/// An identifier, or the all-digit name of a tuple field.
fn is_ident(name: &str) -> bool {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// Parse a path expression; the error is a human-readable reason.
pub(crate) fn parse(input: &str) -> Result<PathExpr<'_>, String> {
    let expr = input.trim();
    if expr.is_empty() {
        return Err("empty path".to_owned());
    }

    if let Some(rest) = expr.strip_prefix('[') {
        let body = rest
            .strip_suffix(']')
            .ok_or_else(|| format!("`{expr}` is missing a closing `]`"))?;
        let mut indexes = SmallVec::new();
        for part in body.split(',') {
            let part = part.trim();
            let index = part
                .parse::<isize>()
                .map_err(|_| format!("`{part}` in `{expr}` is not an index"))?;
            indexes.push(index);
        }
        return Ok(PathExpr::Indexes(indexes));
    }

    let mut fields = SmallVec::new();
    for name in expr.split('.') {
        if !is_ident(name) {
            return Err(format!("`{name}` in `{expr}` is not a field name"));
        }
        fields.push(name);
    }
    Ok(PathExpr::Fields(fields))
}
